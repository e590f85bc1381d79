//! In-memory engine with scripted behaviour.
//!
//! The engine is moved into the controller under test; the cloneable
//! [`FakeEngineHandle`] stays with the test to script failures and inspect
//! what the controller asked for.

use async_trait::async_trait;
use keel_migrator::{
    CloseResult, Connector, Engine, EngineError, GracefulStop, SchemaVersion, StopSignal,
    DEFAULT_LOCK_TIMEOUT,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Engine calls recorded by [`FakeEngine`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Version,
    MigrateTo(u64),
    Force(i64),
    Close,
}

#[derive(Debug)]
struct FakeState {
    version: Option<u64>,
    dirty: bool,
    latest_available: u64,
    step_delay: Duration,
    migrate_error: Option<String>,
    close_source_error: Option<String>,
    close_database_error: Option<String>,
    closed: bool,
    calls: Vec<EngineCall>,
    lock_timeouts: Vec<Duration>,
    steps_applied: u64,
}

/// Scriptable [`Engine`] keeping its schema version in memory.
#[derive(Debug)]
pub struct FakeEngine {
    state: Arc<Mutex<FakeState>>,
    lock_timeout: Duration,
    stop: GracefulStop,
    stop_signal: StopSignal,
}

/// Test-side view of a [`FakeEngine`].
#[derive(Debug, Clone)]
pub struct FakeEngineHandle {
    state: Arc<Mutex<FakeState>>,
}

fn lock(state: &Mutex<FakeState>) -> MutexGuard<'_, FakeState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeEngine {
    /// A fresh database: no recorded version, ten migrations available.
    pub fn new() -> Self {
        let (stop, stop_signal) = GracefulStop::channel();
        Self {
            state: Arc::new(Mutex::new(FakeState {
                version: None,
                dirty: false,
                latest_available: 10,
                step_delay: Duration::ZERO,
                migrate_error: None,
                close_source_error: None,
                close_database_error: None,
                closed: false,
                calls: Vec::new(),
                lock_timeouts: Vec::new(),
                steps_applied: 0,
            })),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            stop,
            stop_signal,
        }
    }

    pub fn handle(&self) -> FakeEngineHandle {
        FakeEngineHandle {
            state: self.state.clone(),
        }
    }

    pub fn at_version(self, version: u64) -> Self {
        {
            let mut state = lock(&self.state);
            state.version = Some(version);
            state.dirty = false;
        }
        self
    }

    pub fn dirty_at(self, version: u64) -> Self {
        {
            let mut state = lock(&self.state);
            state.version = Some(version);
            state.dirty = true;
        }
        self
    }

    /// Highest version the fake source knows about.
    pub fn with_migrations(self, latest: u64) -> Self {
        lock(&self.state).latest_available = latest;
        self
    }

    /// Time spent per migration step, to simulate a slow database.
    pub fn with_step_delay(self, delay: Duration) -> Self {
        lock(&self.state).step_delay = delay;
        self
    }

    pub fn failing_migrate(self, message: &str) -> Self {
        lock(&self.state).migrate_error = Some(message.to_string());
        self
    }

    pub fn with_close_errors(self, source: Option<&str>, database: Option<&str>) -> Self {
        {
            let mut state = lock(&self.state);
            state.close_source_error = source.map(str::to_string);
            state.close_database_error = database.map(str::to_string);
        }
        self
    }
}

impl FakeEngineHandle {
    pub fn version(&self) -> Option<u64> {
        lock(&self.state).version
    }

    pub fn is_dirty(&self) -> bool {
        lock(&self.state).dirty
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        lock(&self.state).calls.clone()
    }

    /// Every value passed to `set_lock_timeout`, in order.
    pub fn lock_timeouts(&self) -> Vec<Duration> {
        lock(&self.state).lock_timeouts.clone()
    }

    /// Migration steps executed so far, in either direction.
    pub fn steps_applied(&self) -> u64 {
        lock(&self.state).steps_applied
    }

    /// Mark the connection as already torn down, as a timed-out caller might.
    pub fn close_connection(&self) {
        lock(&self.state).closed = true;
    }

    pub fn set_dirty(&self, version: u64) {
        let mut state = lock(&self.state);
        state.version = Some(version);
        state.dirty = true;
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn version(&mut self) -> Result<Option<SchemaVersion>, EngineError> {
        let mut state = lock(&self.state);
        state.calls.push(EngineCall::Version);
        if state.closed {
            return Err(EngineError::database("connection is already closed"));
        }
        Ok(state.version.map(|version| SchemaVersion {
            version,
            dirty: state.dirty,
        }))
    }

    async fn migrate_to(&mut self, target: u64) -> Result<(), EngineError> {
        let (step_delay, mut current) = {
            let mut state = lock(&self.state);
            state.calls.push(EngineCall::MigrateTo(target));
            if let Some(message) = state.migrate_error.clone() {
                return Err(EngineError::database(message));
            }
            if target > state.latest_available {
                return Err(EngineError::MissingMigration(target));
            }
            (state.step_delay, state.version.unwrap_or(0))
        };

        while current != target {
            if self.stop_signal.requested() {
                debug!(current, target, "Fake engine stopping early");
                return Err(EngineError::Stopped);
            }

            let next = if target > current { current + 1 } else { current - 1 };
            {
                let mut state = lock(&self.state);
                state.version = Some(next);
                state.dirty = true;
            }
            if !step_delay.is_zero() {
                tokio::time::sleep(step_delay).await;
            }
            {
                let mut state = lock(&self.state);
                state.dirty = false;
                state.steps_applied += 1;
                if next == 0 {
                    state.version = None;
                }
            }
            current = next;
        }
        Ok(())
    }

    async fn force(&mut self, version: i64) -> Result<(), EngineError> {
        let mut state = lock(&self.state);
        state.calls.push(EngineCall::Force(version));
        state.version = u64::try_from(version).ok();
        state.dirty = false;
        Ok(())
    }

    async fn close(&mut self) -> CloseResult {
        let mut state = lock(&self.state);
        state.calls.push(EngineCall::Close);

        let database = if state.closed {
            Some(EngineError::database("connection is already closed"))
        } else {
            state
                .close_database_error
                .clone()
                .map(EngineError::database)
        };
        state.closed = true;

        CloseResult {
            source: state.close_source_error.clone().map(EngineError::source_error),
            database,
        }
    }

    fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    fn set_lock_timeout(&mut self, timeout: Duration) {
        lock(&self.state).lock_timeouts.push(timeout);
        self.lock_timeout = timeout;
    }

    fn graceful_stop(&self) -> GracefulStop {
        self.stop.clone()
    }
}

/// Hands out one [`FakeEngine`], optionally after refusing some attempts.
#[derive(Debug)]
pub struct FakeConnector {
    engine: Mutex<Option<FakeEngine>>,
    refusals: Mutex<u32>,
    open_delay: Duration,
    urls: Arc<Mutex<Vec<(String, String)>>>,
}

impl FakeConnector {
    pub fn new(engine: FakeEngine) -> Self {
        Self {
            engine: Mutex::new(Some(engine)),
            refusals: Mutex::new(0),
            open_delay: Duration::ZERO,
            urls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Refuse the first `count` attempts with a connection error.
    pub fn refusing(self, count: u32) -> Self {
        *self.refusals.lock().unwrap_or_else(PoisonError::into_inner) = count;
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Shared log of `(source_url, database_url)` per attempt.
    pub fn attempts(&self) -> Arc<Mutex<Vec<(String, String)>>> {
        self.urls.clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Engine = FakeEngine;

    async fn open(&self, source_url: &str, database_url: &str) -> Result<FakeEngine, EngineError> {
        self.urls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((source_url.to_string(), database_url.to_string()));

        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }

        {
            let mut refusals = self.refusals.lock().unwrap_or_else(PoisonError::into_inner);
            if *refusals > 0 {
                *refusals -= 1;
                return Err(EngineError::database("connection refused"));
            }
        }

        self.engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| EngineError::database("fake engine already handed out"))
    }
}
