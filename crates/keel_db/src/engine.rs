//! PostgreSQL implementation of [`keel_migrator::Engine`].

use crate::error::{DbError, Result};
use crate::lock;
use crate::source::{FileSource, Step};
use crate::target::ConnectTarget;
use async_trait::async_trait;
use keel_migrator::{
    CloseResult, Engine, EngineError, GracefulStop, SchemaVersion, StopSignal,
    DEFAULT_LOCK_TIMEOUT,
};
use sqlx::{Connection, Executor, PgConnection};
use std::time::Duration;
use tracing::{debug, info, info_span, Instrument};

/// Recorded value meaning "no version".
const NIL_VERSION: i64 = -1;

/// A single PostgreSQL connection plus the scripts it migrates with.
pub struct PgEngine {
    conn: Option<PgConnection>,
    source: FileSource,
    target: ConnectTarget,
    lock_key: i64,
    lock_timeout: Duration,
    stop: GracefulStop,
    stop_signal: StopSignal,
}

impl std::fmt::Debug for PgEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgEngine")
            .field("source", &self.source.root())
            .field("target", &self.target)
            .field("connected", &self.conn.is_some())
            .field("lock_timeout", &self.lock_timeout)
            .finish()
    }
}

impl PgEngine {
    /// Load the migration source, connect, and make sure the version table
    /// exists.
    pub async fn open(source_url: &str, database_url: &str) -> Result<Self> {
        let source = FileSource::open(source_url)?;
        let target = ConnectTarget::parse(database_url)?;

        let conn = PgConnection::connect(&target.connection_url).await?;
        let (stop, stop_signal) = GracefulStop::channel();

        let mut engine = Self {
            conn: Some(conn),
            source,
            lock_key: target.lock_key(),
            target,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            stop,
            stop_signal,
        };
        engine.ensure_version_table().await?;
        Ok(engine)
    }

    pub fn source(&self) -> &FileSource {
        &self.source
    }

    pub fn migrations_table(&self) -> &str {
        &self.target.migrations_table
    }

    async fn ensure_version_table(&mut self) -> Result<()> {
        let sql = format!(
            r#"CREATE TABLE IF NOT EXISTS "{}" (version BIGINT NOT NULL PRIMARY KEY, dirty BOOLEAN NOT NULL)"#,
            self.target.migrations_table
        );
        let conn = self.conn.as_mut().ok_or(DbError::Closed)?;

        lock::acquire(conn, self.lock_key, self.lock_timeout).await?;
        let created = (&mut *conn).execute(sqlx::raw_sql(&sql)).await.map_err(DbError::from);
        let released = lock::release(conn, self.lock_key).await;
        created?;
        released
    }

    async fn read_version(&mut self) -> Result<Option<SchemaVersion>> {
        let conn = self.conn.as_mut().ok_or(DbError::Closed)?;
        read_version(conn, &self.target.migrations_table).await
    }

    async fn migrate(&mut self, version: u64) -> Result<()> {
        let Self {
            conn,
            source,
            target,
            lock_key,
            lock_timeout,
            stop_signal,
            ..
        } = self;
        let conn = conn.as_mut().ok_or(DbError::Closed)?;

        lock::acquire(conn, *lock_key, *lock_timeout).await?;
        let result = migrate_locked(conn, source, target, stop_signal, version).await;
        let released = lock::release(conn, *lock_key).await;
        result?;
        released
    }

    async fn force_version(&mut self, version: i64) -> Result<()> {
        if version < NIL_VERSION {
            return Err(DbError::InvalidVersion(version));
        }
        let table = &self.target.migrations_table;
        let conn = self.conn.as_mut().ok_or(DbError::Closed)?;

        lock::acquire(conn, self.lock_key, self.lock_timeout).await?;
        let result = set_version(conn, table, version, false).await;
        let released = lock::release(conn, self.lock_key).await;
        result?;
        released?;

        info!("Forced schema version {}", version);
        Ok(())
    }
}

#[async_trait]
impl Engine for PgEngine {
    async fn version(&mut self) -> std::result::Result<Option<SchemaVersion>, EngineError> {
        Ok(self.read_version().await?)
    }

    async fn migrate_to(&mut self, version: u64) -> std::result::Result<(), EngineError> {
        let span = info_span!("migrate_to", target = version);
        Ok(self.migrate(version).instrument(span).await?)
    }

    async fn force(&mut self, version: i64) -> std::result::Result<(), EngineError> {
        Ok(self.force_version(version).await?)
    }

    async fn close(&mut self) -> CloseResult {
        let database: Option<EngineError> = match self.conn.take() {
            Some(conn) => conn.close().await.err().map(|e| DbError::from(e).into()),
            None => Some(DbError::Closed.into()),
        };
        CloseResult {
            source: None,
            database,
        }
    }

    fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    fn set_lock_timeout(&mut self, timeout: Duration) {
        self.lock_timeout = timeout;
    }

    fn graceful_stop(&self) -> GracefulStop {
        self.stop.clone()
    }
}

async fn migrate_locked(
    conn: &mut PgConnection,
    source: &FileSource,
    target: &ConnectTarget,
    stop_signal: &mut StopSignal,
    version: u64,
) -> Result<()> {
    let table = &target.migrations_table;
    let current = read_version(conn, table).await?;
    if let Some(current) = current.filter(|v| v.dirty) {
        return Err(DbError::Dirty(current.version as i64));
    }

    let steps = source.plan(current.map(|v| v.version), version)?;
    debug!("{} steps planned", steps.len());

    for step in steps {
        if stop_signal.requested() {
            info!("Stop requested, leaving schema at the last completed step");
            return Err(DbError::Stopped);
        }

        let script = match step {
            Step::Up { version } => source.read_up(version).await?,
            Step::Down { version, .. } => source.read_down(version).await?,
        };
        let recorded = step.target().map_or(NIL_VERSION, |v| v as i64);

        set_version(conn, table, recorded, true).await?;
        run_script(conn, &script, target.multi_statement).await?;
        set_version(conn, table, recorded, false).await?;

        match step {
            Step::Up { version } => info!("Applied migration {}", version),
            Step::Down { version, .. } => info!("Reverted migration {}", version),
        }
    }
    Ok(())
}

async fn run_script(conn: &mut PgConnection, script: &str, multi_statement: bool) -> Result<()> {
    if script.trim().is_empty() {
        return Ok(());
    }
    if multi_statement {
        (&mut *conn).execute(sqlx::raw_sql(script)).await?;
    } else {
        sqlx::query(script).execute(&mut *conn).await?;
    }
    Ok(())
}

async fn read_version(conn: &mut PgConnection, table: &str) -> Result<Option<SchemaVersion>> {
    let sql = format!(r#"SELECT version, dirty FROM "{}" LIMIT 1"#, table);
    let row: Option<(i64, bool)> = sqlx::query_as(&sql).fetch_optional(&mut *conn).await?;

    Ok(match row {
        None => None,
        Some((version, dirty)) => match u64::try_from(version) {
            Ok(version) => Some(SchemaVersion { version, dirty }),
            // Interrupted while undoing the first migration
            Err(_) if dirty => Some(SchemaVersion::dirty(0)),
            Err(_) => None,
        },
    })
}

async fn set_version(conn: &mut PgConnection, table: &str, version: i64, dirty: bool) -> Result<()> {
    let mut tx = conn.begin().await?;

    sqlx::query(&format!(r#"TRUNCATE "{}""#, table))
        .execute(&mut *tx)
        .await?;
    if version >= 0 || dirty {
        sqlx::query(&format!(
            r#"INSERT INTO "{}" (version, dirty) VALUES ($1, $2)"#,
            table
        ))
        .bind(version)
        .bind(dirty)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}
