pub mod builder;
pub mod codesign;
pub mod error;
pub mod file;
pub mod hash;
pub mod macho;

pub use builder::{ArchFilter, BatchSummary, FileReport, Ldid, Processed, SliceReport};
pub use error::Error;
pub use macho::mutate::TimestampMode;
pub use macho::MachOFile;

pub type Result<T> = std::result::Result<T, Error>;

/// Ad-hoc sign every slice of an in-memory image.
pub fn sign_bytes(data: &[u8], identifier: &str, entitlements: Option<&[u8]>) -> Result<Vec<u8>> {
    let mut ldid = Ldid::new().identifier(identifier).sign();
    if let Some(entitlements) = entitlements {
        ldid = ldid.entitlements(entitlements);
    }
    let processed = ldid.process_bytes(data, identifier)?;
    Ok(processed.data.unwrap_or_else(|| data.to_vec()))
}

/// Remove the signature from every slice of an in-memory image.
pub fn strip_bytes(data: &[u8]) -> Result<Vec<u8>> {
    let processed = Ldid::new().strip().process_bytes(data, "")?;
    Ok(processed.data.unwrap_or_else(|| data.to_vec()))
}
