//! Metadata store error types.

use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint rejected an insert. Callers racing on the same
    /// key re-read the existing row.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Database(sqlx::Error::Io(err))
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

/// True when the error is a UNIQUE / primary key violation
/// (SQLite message or PostgreSQL SQLSTATE 23505).
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505")
                || db_err.message().contains("UNIQUE constraint")
        }
        _ => false,
    }
}

/// Map an insert error, turning unique violations into `AlreadyExists`.
pub(crate) fn map_insert_error(err: sqlx::Error, what: impl FnOnce() -> String) -> MetadataError {
    if is_unique_violation(&err) {
        MetadataError::AlreadyExists(what())
    } else {
        MetadataError::Database(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_database_errors_are_not_unique_violations() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
        let mapped = map_insert_error(sqlx::Error::RowNotFound, || "x".to_string());
        assert!(matches!(mapped, MetadataError::Database(_)));
    }
}
