//! Error types for pool operations

use provider::ResourceIdentity;

/// Errors from pool operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Shutdown was requested while waiting. Not a failure of the job.
    #[error("shutdown requested")]
    Cancelled,

    #[error("unknown resource identity: {0}")]
    UnknownIdentity(ResourceIdentity),

    #[error("invalid pool configuration: {0}")]
    Config(String),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
