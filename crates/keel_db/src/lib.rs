//! PostgreSQL migration engine for Keel.
//!
//! Provides [`PgConnector`], which the [`keel_migrator::Migrator`] uses to
//! open a [`PgEngine`]: a file-based migration source, one database
//! connection, a single-row version table and an advisory lock that keeps
//! concurrent migrators apart.

pub mod connector;
pub mod engine;
pub mod error;
pub mod lock;
pub mod source;
pub mod target;

pub use connector::PgConnector;
pub use engine::PgEngine;
pub use error::{DbError, Result};
pub use source::{Direction, FileSource, MigrationFile, Step};
pub use target::{ConnectTarget, DEFAULT_MIGRATIONS_TABLE};
