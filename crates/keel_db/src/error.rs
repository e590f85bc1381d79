//! Error types for the PostgreSQL engine.

use keel_migrator::EngineError;
use std::time::Duration;
use thiserror::Error;

/// Engine-internal result type.
pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Error, Debug)]
pub enum DbError {
    /// SQLx error (connection, query, etc.)
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// IO error (reading migration files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid migration source: {0}")]
    InvalidSource(String),

    #[error("Invalid database URL: {0}")]
    InvalidUrl(String),

    #[error("No migration found for version {0}")]
    MissingMigration(u64),

    #[error("Invalid schema version {0}")]
    InvalidVersion(i64),

    #[error("Database is dirty at version {0}, force a version first")]
    Dirty(i64),

    #[error("Timed out acquiring migration lock after {0:?}")]
    LockTimeout(Duration),

    /// Matches the controller's default already-closed pattern.
    #[error("connection is already closed")]
    Closed,

    #[error("Migration stopped before reaching the target version")]
    Stopped,
}

impl DbError {
    pub fn invalid_source(msg: impl Into<String>) -> Self {
        Self::InvalidSource(msg.into())
    }

    pub fn invalid_url(msg: impl Into<String>) -> Self {
        Self::InvalidUrl(msg.into())
    }
}

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Io(e) => EngineError::Io(e),
            DbError::InvalidSource(msg) => EngineError::Source(msg),
            DbError::MissingMigration(version) => EngineError::MissingMigration(version),
            DbError::LockTimeout(timeout) => EngineError::LockTimeout(timeout),
            DbError::Stopped => EngineError::Stopped,
            DbError::Sqlx(_)
            | DbError::InvalidUrl(_)
            | DbError::InvalidVersion(_)
            | DbError::Dirty(_)
            | DbError::Closed => EngineError::Database(err.to_string()),
        }
    }
}
