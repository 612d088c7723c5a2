pub mod endian;
pub mod load_command;
pub mod mutate;
pub mod parser;
pub mod planner;
pub mod signer;
pub mod writer;

pub use parser::{ArchSlice, MachOFile};
pub use signer::write_signature;
pub use writer::{plan_layout, relocate};
