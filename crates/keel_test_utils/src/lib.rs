//! Keel Test Utilities
//!
//! Two kinds of fixtures:
//!
//! - [`FakeEngine`] / [`FakeConnector`]: an in-memory, scriptable engine for
//!   exercising the controller without a database.
//! - Docker-backed PostgreSQL: [`TestPgPool`] starts the compose service and
//!   [`TestDatabase`] creates a throwaway database per test.
//!
//! # Features
//!
//! - `docker-tests`: Enable tests that require Docker containers
//!
//! # Usage
//!
//! ```rust,ignore
//! use keel_test_utils::{FakeConnector, FakeEngine};
//!
//! let engine = FakeEngine::new().with_migrations(3);
//! let handle = engine.handle();
//! let migrator = Migrator::connect(&ctx, FakeConnector::new(engine), config).await?;
//! migrator.apply(&ctx, 3).await?;
//! assert_eq!(handle.version(), Some(3));
//! ```

pub mod config;
pub mod containers;
pub mod database;
pub mod fake;
pub mod pools;

// Re-exports for convenience
pub use config::{PgServer, ServerAccess};
pub use containers::lifecycle::{ensure_container_running, wait_for_healthy};
pub use database::TestDatabase;
pub use fake::{EngineCall, FakeConnector, FakeEngine, FakeEngineHandle};
pub use pools::postgres::TestPgPool;
