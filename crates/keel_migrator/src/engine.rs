//! Engine collaborator contract.
//!
//! The controller never executes migration scripts itself. It drives an
//! [`Engine`] that owns the database connection and the migration source,
//! and obtains one through a [`Connector`] during connection establishment.

use crate::error::EngineError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// Lock timeout an engine uses when no deadline overrides it.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(15);

/// Version recorded by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaVersion {
    pub version: u64,
    /// The transition that produced `version` did not finish.
    pub dirty: bool,
}

impl SchemaVersion {
    pub fn clean(version: u64) -> Self {
        Self {
            version,
            dirty: false,
        }
    }

    pub fn dirty(version: u64) -> Self {
        Self {
            version,
            dirty: true,
        }
    }
}

/// Outcome of [`Engine::close`]: the source and database sides fail
/// independently.
#[derive(Debug, Default)]
pub struct CloseResult {
    pub source: Option<EngineError>,
    pub database: Option<EngineError>,
}

impl CloseResult {
    pub fn ok() -> Self {
        Self::default()
    }
}

/// Sending half of an engine's graceful-stop channel.
///
/// Requests never block: if a stop is already pending or the engine has gone
/// away, the request is dropped.
#[derive(Debug, Clone)]
pub struct GracefulStop {
    tx: mpsc::Sender<()>,
}

/// Receiving half, polled by the engine between migration steps.
#[derive(Debug)]
pub struct StopSignal {
    rx: mpsc::Receiver<()>,
}

impl GracefulStop {
    pub fn channel() -> (GracefulStop, StopSignal) {
        let (tx, rx) = mpsc::channel(1);
        (GracefulStop { tx }, StopSignal { rx })
    }

    /// Best-effort stop request. Returns whether the request was queued.
    pub fn request(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

impl StopSignal {
    /// Consume a pending stop request, if any.
    pub fn requested(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }
}

/// A connected, versioned-schema engine.
///
/// Only the [`crate::Migrator`] that owns an engine calls these methods.
#[async_trait]
pub trait Engine: Send + 'static {
    /// Current version, or `None` when the database has never been migrated.
    async fn version(&mut self) -> Result<Option<SchemaVersion>, EngineError>;

    /// Move the schema to `version`, in whichever direction is needed.
    async fn migrate_to(&mut self, version: u64) -> Result<(), EngineError>;

    /// Record `version` as current and clean without running any script.
    /// `-1` clears the recorded version.
    async fn force(&mut self, version: i64) -> Result<(), EngineError>;

    /// Release the source and the database connection.
    async fn close(&mut self) -> CloseResult;

    fn lock_timeout(&self) -> Duration;

    fn set_lock_timeout(&mut self, timeout: Duration);

    fn default_lock_timeout(&self) -> Duration {
        DEFAULT_LOCK_TIMEOUT
    }

    /// Handle used to ask a running migration to stop after its current step.
    fn graceful_stop(&self) -> GracefulStop;
}

/// Opens engines from a migration source URL and a database URL.
#[async_trait]
pub trait Connector: Send + Sync {
    type Engine: Engine;

    async fn open(&self, source_url: &str, database_url: &str)
        -> Result<Self::Engine, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graceful_stop_never_blocks() {
        let (stop, mut signal) = GracefulStop::channel();

        assert!(stop.request());
        // Second request is skipped while the first is pending
        assert!(!stop.request());

        assert!(signal.requested());
        assert!(!signal.requested());
    }

    #[test]
    fn test_graceful_stop_after_engine_dropped() {
        let (stop, signal) = GracefulStop::channel();
        drop(signal);
        assert!(!stop.request());
    }
}
