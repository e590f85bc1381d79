//! Throwaway database per test.

use crate::pools::postgres::TestPgPool;
use anyhow::{Context, Result};
use keel_migrator::DatabaseConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

/// RAII guard around a freshly created database.
///
/// Migrations are database-wide (version table, advisory lock), so unlike
/// schema-level isolation each test gets a whole database. It is dropped
/// when the guard goes out of scope; call [`TestDatabase::cleanup`] to wait
/// for the drop and observe its result.
pub struct TestDatabase {
    admin: TestPgPool,
    name: String,
    dropped: bool,
}

impl TestDatabase {
    pub async fn create(admin: &TestPgPool) -> Result<Self> {
        let name = format!("keel_test_{}", Uuid::new_v4().simple());
        debug!("Creating test database: {}", name);

        sqlx::query(&format!("CREATE DATABASE {}", name))
            .execute(&admin.pool)
            .await
            .with_context(|| format!("Failed to create test database {}", name))?;

        Ok(Self {
            admin: admin.clone(),
            name,
            dropped: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Controller connection parameters for this database.
    pub fn database_config(&self) -> DatabaseConfig {
        self.admin.access().database_config(&self.name)
    }

    /// Pool connected to this database, for inspecting what migrations did.
    pub async fn pool(&self) -> Result<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&self.admin.access().url_for(&self.name))
            .await?;
        Ok(pool)
    }

    pub async fn cleanup(mut self) -> Result<()> {
        self.dropped = true;
        drop_database(&self.admin.pool, &self.name).await
    }
}

async fn drop_database(pool: &PgPool, name: &str) -> Result<()> {
    debug!("Dropping test database: {}", name);
    sqlx::query(&format!("DROP DATABASE IF EXISTS {} WITH (FORCE)", name))
        .execute(pool)
        .await?;
    Ok(())
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        if self.dropped {
            return;
        }

        // No async in Drop: hand the statement to the runtime if there is one
        let pool = self.admin.pool.clone();
        let name = self.name.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = drop_database(&pool, &name).await {
                    warn!("Failed to drop test database {}: {}", name, e);
                }
            });
        } else {
            warn!("Not in async context, cannot drop test database: {}", name);
        }
    }
}
