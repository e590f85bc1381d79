//! The migration controller.

use crate::config::MigratorConfig;
use crate::context::Context;
use crate::engine::{CloseResult, Connector, Engine, GracefulStop, SchemaVersion};
use crate::envelope::run_with_deadline;
use crate::error::{CombinedError, EngineError, MigratorError, Result};
use crate::gate::QuiescenceGate;
use crate::retry::exponential_retry;
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, info_span, Instrument};

/// Drives a connected [`Engine`] between schema versions.
///
/// Assert, apply and rollback must not be called concurrently on the same
/// controller; callers serialize them. The quiescence gate only lets
/// [`Migrator::close`] wait for the most recent operation, it does not make
/// overlapping operations safe.
pub struct Migrator<E: Engine> {
    config: MigratorConfig,
    engine: Arc<Mutex<E>>,
    gate: Arc<QuiescenceGate>,
    stop: GracefulStop,
    already_closed: Regex,
}

impl<E: Engine> fmt::Debug for Migrator<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migrator")
            .field("config", &self.config)
            .field("idle", &self.gate.is_idle())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Assert,
    Apply,
    Rollback,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transition::Assert => "assert",
            Transition::Apply => "apply",
            Transition::Rollback => "rollback",
        };
        f.write_str(name)
    }
}

impl<E: Engine> Migrator<E> {
    /// Open an engine through `connector`, retrying per `config.retry`
    /// within `ctx`.
    ///
    /// Reports [`MigratorError::TimedOut`] if `ctx` expires first, otherwise
    /// wraps the last connection error as Generic.
    pub async fn connect<C>(ctx: &Context, connector: C, config: MigratorConfig) -> Result<Self>
    where
        C: Connector<Engine = E> + 'static,
    {
        let already_closed = Regex::new(&config.already_closed_pattern).map_err(|e| {
            MigratorError::generic(format!("invalid already-closed pattern: {}", e))
        })?;
        let source_url = config.source_url();
        let database_url = config.database.connection_url()?;
        let database_name = config.database.name.clone();
        let retry = config.retry.clone();
        let connector = Arc::new(connector);
        let inner_ctx = ctx.clone();

        let (engine, attempt) = run_with_deadline(ctx, async move {
            let attempts = retry.attempts.max(1);
            exponential_retry(&inner_ctx, &retry, |attempt| {
                let connector = connector.clone();
                let source_url = source_url.clone();
                let database_url = database_url.clone();
                let database_name = database_name.clone();
                async move {
                    info!(
                        "Trying to connect to the {} database {}/{}",
                        database_name, attempt, attempts
                    );
                    connector
                        .open(&source_url, &database_url)
                        .await
                        .map(|engine| (engine, attempt))
                }
            })
            .await
            .map_err(MigratorError::wrap)
        })
        .await?;

        info!(
            attempt,
            "Connected to the {} database", config.database.name
        );

        let stop = engine.graceful_stop();
        Ok(Self {
            config,
            engine: Arc::new(Mutex::new(engine)),
            gate: Arc::new(QuiescenceGate::new()),
            stop,
            already_closed,
        })
    }

    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    /// Whether no operation currently owns the engine.
    pub fn is_idle(&self) -> bool {
        self.gate.is_idle()
    }

    /// Check, without changing anything, that the schema is exactly at
    /// `version` and clean.
    pub async fn assert(&self, ctx: &Context, version: u64) -> Result<()> {
        self.transition(ctx, Transition::Assert, version).await
    }

    /// Migrate forward to `version`. A no-op when already there; never
    /// moves backward and refuses a dirty schema.
    pub async fn apply(&self, ctx: &Context, version: u64) -> Result<()> {
        self.transition(ctx, Transition::Apply, version).await
    }

    /// Migrate backward to `version`, clearing a dirty flag first. A no-op
    /// when already there; never moves forward.
    pub async fn rollback(&self, ctx: &Context, version: u64) -> Result<()> {
        self.transition(ctx, Transition::Rollback, version).await
    }

    /// Stop the engine once every in-flight operation has finished.
    ///
    /// A database-side "already closed" error is not a failure: a timed-out
    /// operation may have torn the connection down already.
    pub async fn close(self, ctx: &Context) -> Result<()> {
        let Migrator {
            engine,
            gate,
            stop,
            already_closed,
            ..
        } = self;

        run_with_deadline(ctx, async move {
            info!("Closing migrator");

            if stop.request() {
                debug!("Graceful stop requested");
            }

            gate.wait_idle().await;

            let CloseResult { source, database } = engine.lock().await.close().await;
            let database = database.filter(|err| {
                let benign = already_closed.is_match(&err.to_string());
                if benign {
                    debug!("Ignoring close error on an already closed connection: {}", err);
                }
                !benign
            });

            if let Some(err) = combine_close_errors(source, database) {
                return Err(err);
            }

            info!("Closed migrator");
            Ok(())
        }
        .instrument(info_span!("migrator", op = "close")))
        .await
    }

    async fn transition(&self, ctx: &Context, kind: Transition, desired: u64) -> Result<()> {
        let guard = self.gate.arm();
        let engine = self.engine.clone();
        let inner_ctx = ctx.clone();

        run_with_deadline(ctx, async move {
            let mut engine = engine.lock().await;
            let result = {
                let mut scope = LockTimeoutScope::new(&mut *engine, inner_ctx.remaining());
                kind.run(&mut *scope, desired).await
            };
            guard.release();
            result
        }
        .instrument(info_span!("migrator", op = %kind, desired)))
        .await
    }
}

impl Transition {
    async fn run<E: Engine>(self, engine: &mut E, desired: u64) -> Result<()> {
        match self {
            Transition::Assert => assert_version(engine, desired).await,
            Transition::Apply => apply_version(engine, desired).await,
            Transition::Rollback => rollback_version(engine, desired).await,
        }
    }
}

async fn read_version<E: Engine>(engine: &mut E) -> Result<SchemaVersion> {
    let version = engine.version().await.map_err(MigratorError::wrap)?;
    Ok(version.unwrap_or(SchemaVersion::clean(0)))
}

async fn assert_version<E: Engine>(engine: &mut E, desired: u64) -> Result<()> {
    let current = read_version(engine).await?;
    if current.dirty {
        return Err(dirty(current.version));
    }

    match current.version.cmp(&desired) {
        Ordering::Greater => Err(behind(desired, current.version)),
        Ordering::Less => Err(ahead(desired, current.version)),
        Ordering::Equal => {
            info!("Desired schema version {} asserted", desired);
            Ok(())
        }
    }
}

async fn apply_version<E: Engine>(engine: &mut E, desired: u64) -> Result<()> {
    let current = read_version(engine).await?;
    if current.dirty {
        return Err(dirty(current.version));
    }

    match current.version.cmp(&desired) {
        Ordering::Equal => {
            info!("No migrations to apply");
            Ok(())
        }
        Ordering::Greater => Err(behind(desired, current.version)),
        Ordering::Less => {
            info!("{} migrations to be applied", desired - current.version);
            engine
                .migrate_to(desired)
                .await
                .map_err(MigratorError::wrap)?;
            info!("Applied all migrations successfully");
            Ok(())
        }
    }
}

async fn rollback_version<E: Engine>(engine: &mut E, desired: u64) -> Result<()> {
    let current = read_version(engine).await?;
    if current.dirty {
        info!("Current schema version {} is dirty, ignoring", current.version);
        let forced = i64::try_from(current.version).map_err(|_| {
            MigratorError::generic(format!(
                "current schema version {} cannot be forced",
                current.version
            ))
        })?;
        engine.force(forced).await.map_err(MigratorError::wrap)?;
    }

    match current.version.cmp(&desired) {
        Ordering::Equal => {
            info!("No migrations to rollback");
            Ok(())
        }
        Ordering::Less => Err(ahead(desired, current.version)),
        Ordering::Greater => {
            info!("{} migrations to be rolled back", current.version - desired);
            engine
                .migrate_to(desired)
                .await
                .map_err(MigratorError::wrap)?;
            info!("Rolled back all migrations successfully");
            Ok(())
        }
    }
}

fn dirty(current: u64) -> MigratorError {
    MigratorError::generic(format!("current schema version {} is dirty", current))
}

fn behind(desired: u64, current: u64) -> MigratorError {
    MigratorError::generic(format!(
        "desired schema version {} behind from current one {}",
        desired, current
    ))
}

fn ahead(desired: u64, current: u64) -> MigratorError {
    MigratorError::generic(format!(
        "desired schema version {} ahead of current one {}",
        desired, current
    ))
}

fn combine_close_errors(
    source: Option<EngineError>,
    database: Option<EngineError>,
) -> Option<MigratorError> {
    match (source, database) {
        (None, None) => None,
        (Some(err), None) | (None, Some(err)) => Some(MigratorError::wrap(err)),
        (Some(first), Some(second)) => Some(MigratorError::wrap(CombinedError { first, second })),
    }
}

/// Holds the engine with a deadline-derived lock timeout and puts the
/// engine default back on drop.
struct LockTimeoutScope<'a, E: Engine> {
    engine: &'a mut E,
}

impl<'a, E: Engine> LockTimeoutScope<'a, E> {
    fn new(engine: &'a mut E, timeout: Option<Duration>) -> Self {
        if let Some(timeout) = timeout {
            engine.set_lock_timeout(timeout);
        }
        Self { engine }
    }
}

impl<E: Engine> Deref for LockTimeoutScope<'_, E> {
    type Target = E;

    fn deref(&self) -> &E {
        self.engine
    }
}

impl<E: Engine> DerefMut for LockTimeoutScope<'_, E> {
    fn deref_mut(&mut self) -> &mut E {
        self.engine
    }
}

impl<E: Engine> Drop for LockTimeoutScope<'_, E> {
    fn drop(&mut self) {
        let default = self.engine.default_lock_timeout();
        self.engine.set_lock_timeout(default);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_messages() {
        assert_eq!(
            behind(1, 5).to_string(),
            "migrator failed: desired schema version 1 behind from current one 5"
        );
        assert_eq!(
            ahead(3, 0).to_string(),
            "migrator failed: desired schema version 3 ahead of current one 0"
        );
        assert_eq!(
            dirty(2).to_string(),
            "migrator failed: current schema version 2 is dirty"
        );
    }

    #[test]
    fn test_combine_close_errors() {
        assert!(combine_close_errors(None, None).is_none());

        let single = combine_close_errors(Some(EngineError::source_error("gone")), None).unwrap();
        assert!(single.to_string().contains("gone"));

        let both = combine_close_errors(
            Some(EngineError::source_error("gone")),
            Some(EngineError::database("reset")),
        )
        .unwrap();
        let text = both.to_string();
        assert!(text.contains("gone") && text.contains("reset"), "{}", text);
    }
}
