//! Error types for the migration controller.

use std::time::Duration;
use thiserror::Error;

/// Controller operation result type.
pub type Result<T> = std::result::Result<T, MigratorError>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Caller-visible classification of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The deadline envelope elapsed (or the context was cancelled) first.
    TimedOut,
    /// Everything else.
    Generic,
}

/// Errors returned by [`crate::Migrator`] operations.
#[derive(Error, Debug)]
pub enum MigratorError {
    /// The operation did not confirm completion before the context expired.
    #[error("migrator timed out")]
    TimedOut,

    /// Connection failure, dirty schema, direction violation, engine failure.
    #[error("migrator failed: {message}")]
    Generic {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl MigratorError {
    /// Create a generic error with a descriptive message and no cause.
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic {
            message: msg.into(),
            source: None,
        }
    }

    /// Wrap an underlying cause as a generic error.
    pub fn wrap<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Generic {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MigratorError::TimedOut => ErrorKind::TimedOut,
            MigratorError::Generic { .. } => ErrorKind::Generic,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        self.kind() == ErrorKind::TimedOut
    }
}

/// Errors reported by an [`crate::Engine`] or [`crate::Connector`].
#[derive(Error, Debug)]
pub enum EngineError {
    /// The migration source has no script for the requested version.
    #[error("no migration found for version {0}")]
    MissingMigration(u64),

    /// The database advisory lock could not be taken in time.
    #[error("timed out acquiring migration lock after {0:?}")]
    LockTimeout(Duration),

    /// Reading or parsing the migration source failed.
    #[error("migration source error: {0}")]
    Source(String),

    /// The database rejected a statement or the connection failed.
    #[error("database error: {0}")]
    Database(String),

    /// A graceful stop was requested between migration steps.
    #[error("migration stopped before reaching the target version")]
    Stopped,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn source_error(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }
}

/// Both halves of an engine close failed; kept together so neither is lost.
#[derive(Error, Debug)]
#[error("{first}; {second}")]
pub struct CombinedError {
    pub first: EngineError,
    pub second: EngineError,
}
