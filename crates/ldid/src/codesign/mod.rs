//! Code signature blobs: CodeDirectory, Requirements, Entitlements, SuperBlob

pub mod code_directory;
pub mod constants;
pub mod superblob;

pub use code_directory::{CodeDirectoryBuilder, CodeDirectoryHeader};
pub use superblob::{build_entitlements_blob, SuperBlob, SuperBlobBuilder};
