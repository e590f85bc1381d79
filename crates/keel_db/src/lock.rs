//! Session-level advisory locking.
//!
//! Only one migrator may change a schema at a time. The lock is a PostgreSQL
//! advisory lock held by the engine's connection for the duration of a
//! locked operation.

use crate::error::{DbError, Result};
use sqlx::PgConnection;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Derive a stable lock key from the database and version table names.
pub fn lock_key(database: &str, table: &str) -> i64 {
    let hash = blake3::hash(format!("{}:{}", database, table).as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    i64::from_be_bytes(bytes)
}

/// Poll `pg_try_advisory_lock` until acquired or `timeout` elapses.
pub async fn acquire(conn: &mut PgConnection, key: i64, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await?;
        if acquired {
            debug!(key, "Acquired migration lock");
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(DbError::LockTimeout(timeout));
        }
        tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
    }
}

pub async fn release(conn: &mut PgConnection, key: i64) -> Result<()> {
    let released: bool = sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
        .bind(key)
        .fetch_one(&mut *conn)
        .await?;
    if released {
        debug!(key, "Released migration lock");
    } else {
        warn!(key, "Migration lock was not held");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key_is_stable() {
        assert_eq!(
            lock_key("app", "schema_migrations"),
            lock_key("app", "schema_migrations")
        );
        assert_ne!(
            lock_key("app", "schema_migrations"),
            lock_key("billing", "schema_migrations")
        );
        assert_ne!(
            lock_key("app", "schema_migrations"),
            lock_key("app", "app_versions")
        );
    }
}
