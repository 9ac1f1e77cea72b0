use thiserror::Error;

pub type Result<T> = std::result::Result<T, DatabaseError>;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Collection names end up in SQL, so only `[A-Za-z0-9_]` is accepted
    #[error("Invalid collection name: {0}")]
    InvalidCollection(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// A write would give two documents the same value of a unique field
    #[error("Duplicate document in {collection}: {reason}")]
    Duplicate { collection: String, reason: String },

    /// A stored row is not a JSON object or lacks its `_id`
    #[error("Corrupt document in {collection}: {reason}")]
    CorruptDocument { collection: String, reason: String },
}
