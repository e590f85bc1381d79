//! Administrative PostgreSQL pool for tests.

use crate::config::{PgServer, ServerAccess};
use crate::containers::lifecycle::ensure_container_running;
use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;

/// Pool connected to the compose service's default database.
///
/// Used to create and drop per-test databases and to inspect them; the
/// controller itself opens its own connection.
#[derive(Debug, Clone)]
pub struct TestPgPool {
    pub pool: PgPool,
    pub server: PgServer,
}

impl TestPgPool {
    /// Ensure the container is up and connect to it.
    pub async fn new(server: PgServer) -> Result<Self> {
        ensure_container_running(server).await?;

        let access = ServerAccess::new(server);
        info!("Creating PostgreSQL pool for {} on port {}", server, server.host_port());

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&access.admin_url())
            .await?;

        Ok(Self { pool, server })
    }

    pub async fn execute(&self, query: &str) -> Result<()> {
        sqlx::query(query).execute(&self.pool).await?;
        Ok(())
    }

    pub fn access(&self) -> ServerAccess {
        ServerAccess::new(self.server)
    }
}
