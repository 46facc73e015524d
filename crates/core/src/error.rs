//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid import path: {0}")]
    InvalidImportPath(String),

    #[error("invalid revision: {0}")]
    InvalidRevision(String),

    #[error("invalid storage tier: {0}")]
    InvalidTier(String),

    /// A persisted setting (for example a block rule expression) that cannot be used.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
