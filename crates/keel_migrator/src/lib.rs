//! Schema-migration controller for Keel.
//!
//! Drives a database from its observed schema version to a desired one
//! through a strict assert / apply / rollback state machine. Every
//! operation runs inside a deadline envelope, and closing the controller
//! waits for any in-flight operation before releasing the engine.
//!
//! # Usage
//!
//! ```rust,ignore
//! use keel_migrator::{Context, DatabaseConfig, Migrator, MigratorConfig};
//! use std::time::Duration;
//!
//! let ctx = Context::with_timeout(Duration::from_secs(30));
//! let config = MigratorConfig::new(DatabaseConfig::default());
//!
//! let migrator = Migrator::connect(&ctx, keel_db::PgConnector::new(), config).await?;
//! migrator.apply(&ctx, 3).await?;
//! migrator.assert(&ctx, 3).await?;
//! migrator.close(&ctx).await?;
//! ```

mod config;
mod context;
mod engine;
mod envelope;
mod error;
mod gate;
mod migrator;
mod retry;

pub use config::{
    clean_path, DatabaseConfig, MigratorConfig, RetryConfig, DEFAULT_ALREADY_CLOSED_PATTERN,
    DEFAULT_MIGRATIONS_PATH,
};
pub use context::Context;
pub use engine::{
    CloseResult, Connector, Engine, GracefulStop, SchemaVersion, StopSignal,
    DEFAULT_LOCK_TIMEOUT,
};
pub use error::{CombinedError, EngineError, ErrorKind, MigratorError, Result};
pub use migrator::Migrator;
