//! Error types for the state store.

use ladder_core::PositionPhase;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored value could not be parsed back into its domain type.
    #[error("corrupt row in {table}: {message}")]
    Corrupt { table: String, message: String },

    /// A phase write would have moved a position backwards.
    #[error("illegal phase transition for position {position_id}: {from} -> {to}")]
    IllegalTransition {
        position_id: Uuid,
        from: PositionPhase,
        to: PositionPhase,
    },

    /// Position does not exist.
    #[error("position not found: {0}")]
    PositionNotFound(Uuid),
}

impl StoreError {
    pub fn corrupt(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            table: table.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
