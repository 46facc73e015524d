//! Provider error types.

use thiserror::Error;

/// Errors from provider lookup, revision resolution and archive fetching.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No registry prefix matches the import path. Permanent for that input.
    #[error("no provider matches import path: {0}")]
    NoMatchingProvider(String),

    /// The provider could not be reached or its response had no revision.
    #[error("revision lookup failed for {import_path}: {reason}")]
    RevisionLookupFailed { import_path: String, reason: String },

    /// The archive could not be downloaded.
    #[error("archive download failed for {import_path}: {reason}")]
    ArchiveDownloadFailed { import_path: String, reason: String },

    #[error("invalid path: {0}")]
    InvalidPath(#[from] depot_core::Error),

    #[error("storage error: {0}")]
    Storage(#[from] depot_storage::StorageError),

    #[error("http client error: {0}")]
    Client(String),
}

impl ProviderError {
    pub(crate) fn lookup(import_path: impl ToString, reason: impl Into<String>) -> Self {
        Self::RevisionLookupFailed {
            import_path: import_path.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn download(import_path: impl ToString, reason: impl Into<String>) -> Self {
        Self::ArchiveDownloadFailed {
            import_path: import_path.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RevisionLookupFailed { .. } | Self::ArchiveDownloadFailed { .. }
        )
    }
}

/// Result type alias for provider operations.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;
