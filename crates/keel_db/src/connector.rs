use crate::engine::PgEngine;
use async_trait::async_trait;
use keel_migrator::{Connector, EngineError};
use tracing::debug;

/// Opens [`PgEngine`]s for the migrator.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector;

impl PgConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Engine = PgEngine;

    async fn open(&self, source_url: &str, database_url: &str) -> Result<PgEngine, EngineError> {
        debug!("Opening PostgreSQL engine with source {}", source_url);
        Ok(PgEngine::open(source_url, database_url).await?)
    }
}
