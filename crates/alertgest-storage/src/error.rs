use sea_orm::{DbErr, SqlErr};

/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use alertgest_storage::StorageError;
///
/// let err = StorageError::NotFound {
///     entity: "capture_window",
///     id: "w-1".to_string(),
/// };
/// assert!(err.to_string().contains("capture_window"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A required record was not found in the database.
    #[error("Storage: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// A uniqueness constraint rejected the write.
    #[error("Storage: {entity} conflicts with an existing row: {detail}")]
    Conflict { entity: &'static str, detail: String },

    /// The row exists but is not in a state that allows the operation.
    #[error("Storage: {entity} {id} is {status}, expected {expected}")]
    InvalidState {
        entity: &'static str,
        id: String,
        status: String,
        expected: &'static str,
    },

    /// A column held a value this version cannot interpret.
    #[error("Storage: unexpected value '{value}' in column '{column}'")]
    Corrupt { column: &'static str, value: String },

    #[error("Storage: database error: {0}")]
    Db(DbErr),

    /// JSON serialization or deserialization failure (labels/annotations).
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<DbErr> for StorageError {
    fn from(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(detail)) => StorageError::Conflict {
                entity: "row",
                detail,
            },
            _ => StorageError::Db(err),
        }
    }
}

impl StorageError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
