//! Error type for data-access operations

/// Errors raised by the gateway, builders, repositories, transactions and
/// the migration tracker
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("Database query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("UPDATE requires at least one WHERE condition")]
    UpdateWithoutWhere,

    #[error("DELETE requires at least one WHERE condition")]
    DeleteWithoutWhere,

    #[error("No valid fields to update")]
    NoUpdateFields,

    #[error("Transaction already completed")]
    TransactionCompleted,

    #[error("Invalid relationship configuration: {0}")]
    Relation(String),

    #[error("Migration {name} failed: {source}")]
    Migration {
        name: String,
        source: Box<DataError>,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unexpected result: {0}")]
    Decode(String),
}

impl DataError {
    /// True for the guards that stop an unbounded UPDATE/DELETE
    pub fn is_safety_violation(&self) -> bool {
        matches!(
            self,
            DataError::UpdateWithoutWhere | DataError::DeleteWithoutWhere | DataError::NoUpdateFields
        )
    }
}

/// Result type for data-access operations
pub type DataResult<T> = Result<T, DataError>;
