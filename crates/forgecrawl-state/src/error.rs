//! Typed errors for the state layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    /// The backing store failed (connection, query, transaction).
    #[error("store operation failed: {0}")]
    Store(String),

    /// A stored value could not be decoded back into its domain type.
    #[error("corrupt state record: {0}")]
    Decode(String),
}

impl From<sqlx::Error> for StateError {
    fn from(e: sqlx::Error) -> Self {
        StateError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(e: serde_json::Error) -> Self {
        StateError::Decode(e.to_string())
    }
}
