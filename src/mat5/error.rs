//! Custom error types for the mat5-reader crate.

use thiserror::Error;

/// The primary error type for all operations in this crate.
#[derive(Debug, Error)]
pub enum Mat5Error {
    /// An error originating from I/O operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file does not begin with a valid MAT-file header.
    #[error("Invalid MAT-file header: {0}")]
    InvalidHeader(&'static str),

    /// The header's version field is not the supported Level-5 value.
    #[error("Unsupported MAT-file version: {0:#06x}")]
    UnsupportedVersion(u16),

    /// The element stream is structurally invalid. Carries the literal
    /// diagnostic produced at the point of failure.
    #[error("{0}")]
    Read(String),
}

/// A convenience `Result` type alias using the crate's `Mat5Error` type.
pub type Result<T> = std::result::Result<T, Mat5Error>;
