//! API error types.

use crate::resolver::ResolveError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use depot_provider::ProviderError;
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The import path is on the block list. Carries the block note.
    #[error("package is blocked: {0}")]
    Blocked(String),

    #[error("package name is not recognized by any provider: {0}")]
    UnknownProvider(String),

    #[error("upstream failure, retry later: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] depot_storage::StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] depot_metadata::MetadataError),

    #[error("core error: {0}")]
    Core(#[from] depot_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Conflict(_) => "conflict",
            Self::Blocked(_) => "blocked",
            Self::UnknownProvider(_) => "unknown_provider",
            Self::Upstream(_) => "upstream_unavailable",
            Self::Internal(_) => "internal_error",
            Self::Storage(_) => "storage_error",
            Self::Metadata(_) => "metadata_error",
            Self::Core(_) => "core_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Blocked(_) => StatusCode::FORBIDDEN,
            Self::UnknownProvider(_) => StatusCode::NOT_FOUND,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(e) => match e {
                depot_storage::StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Metadata(e) => match e {
                depot_metadata::MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
                depot_metadata::MetadataError::AlreadyExists(_) => StatusCode::CONFLICT,
                depot_metadata::MetadataError::Constraint(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NoMatchingProvider(path) => Self::UnknownProvider(path),
            ProviderError::InvalidPath(e) => Self::Core(e),
            ProviderError::Storage(e) => Self::Storage(e),
            ProviderError::Client(msg) => Self::Internal(msg),
            e @ (ProviderError::RevisionLookupFailed { .. }
            | ProviderError::ArchiveDownloadFailed { .. }) => Self::Upstream(e.to_string()),
        }
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Invalid(e) => Self::Core(e),
            ResolveError::Blocked(note) => Self::Blocked(note),
            ResolveError::Provider(e) => e.into(),
            ResolveError::RecordConflict(msg) => Self::Conflict(msg),
            ResolveError::Metadata(e) => Self::Metadata(e),
            ResolveError::Storage(e) => Self::Storage(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_distinguish_unknown_from_transient() {
        let unknown: ApiError = ProviderError::NoMatchingProvider("example.com/pkgA".into()).into();
        assert_eq!(unknown.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(unknown.code(), "unknown_provider");

        let transient: ApiError = ProviderError::RevisionLookupFailed {
            import_path: "github.com/a/b".into(),
            reason: "timed out".into(),
        }
        .into();
        assert_eq!(transient.status_code(), StatusCode::BAD_GATEWAY);
        assert!(transient.to_string().contains("retry later"));
    }

    #[test]
    fn blocked_carries_note() {
        let err: ApiError = ResolveError::Blocked("license violation".into()).into();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert!(err.to_string().contains("license violation"));
    }
}
