//! Error types for ldid operations.
//!
//! This module defines the [`enum@Error`] enum covering every way processing a
//! single file can fail. Errors are values: the batch driver in
//! [`crate::builder`] collects them per file and moves on to the next input.
//!
//! # See Also
//!
//! - [`crate::Result`] - Convenience type alias using this error

use thiserror::Error;

/// Error type for ldid operations.
///
/// All public functions in this crate return [`crate::Result<T>`], which uses this error type.
///
/// # Examples
///
/// ```no_run
/// use ldid::{Error, Ldid};
///
/// match Ldid::new().sign().process_file("cat") {
///     Ok(report) => println!("signed {} slice(s)", report.slices.len()),
///     Err(Error::Malformed(msg)) => eprintln!("not a usable Mach-O: {msg}"),
///     Err(Error::MissingCommand(cmd)) => eprintln!("missing {cmd}"),
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// ```
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed.
    ///
    /// Occurs when mapping an input, reading an entitlements file, or
    /// replacing the original file with the rewritten image.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The container or one of its slices is structurally invalid.
    ///
    /// Bad magic, unsupported file type, a load command that overruns the
    /// command area, or offsets that point outside the slice.
    #[error("Malformed Mach-O: {0}")]
    Malformed(String),

    /// A load command or segment the requested operation depends on is absent.
    #[error("Missing required load command: {0}")]
    MissingCommand(&'static str),

    /// The generated signature does not fit the space reserved for it.
    ///
    /// The planner and generator share one size formula, so this indicates
    /// an internal inconsistency rather than bad input.
    #[error("Signature capacity overflow: used {used} bytes of {reserved} reserved")]
    CapacityOverflow { used: usize, reserved: usize },

    /// Appending a load command would overwrite segment or section content.
    #[error("No room for load command: need {needed} bytes, {available} available")]
    NoLoadCommandSpace { needed: usize, available: usize },

    /// No section contains the requested virtual address.
    #[error("Address {0:#x} is not mapped by any section")]
    AddressNotMapped(u64),

    /// Invalid or contradictory options.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<scroll::Error> for Error {
    fn from(e: scroll::Error) -> Self {
        Error::Malformed(e.to_string())
    }
}

impl Error {
    /// Shorthand for [`Error::Malformed`].
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Error::Malformed(msg.into())
    }
}
