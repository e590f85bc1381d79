//! Database URL handling.
//!
//! Connection descriptors carry engine options as `x-*` query parameters.
//! They are read here and removed before the URL reaches the driver.

use crate::error::{DbError, Result};
use regex::Regex;
use std::sync::OnceLock;
use url::Url;

pub const DEFAULT_MIGRATIONS_TABLE: &str = "schema_migrations";

const ENGINE_PARAM_PREFIX: &str = "x-";

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("identifier pattern is valid")
    })
}

/// Parsed database descriptor.
#[derive(Clone)]
pub struct ConnectTarget {
    /// URL handed to the driver, with engine parameters stripped.
    pub connection_url: String,
    pub database: String,
    pub migrations_table: String,
    pub multi_statement: bool,
}

impl std::fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("database", &self.database)
            .field("migrations_table", &self.migrations_table)
            .field("multi_statement", &self.multi_statement)
            .finish_non_exhaustive()
    }
}

impl ConnectTarget {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut url = Url::parse(raw).map_err(|e| DbError::invalid_url(e.to_string()))?;

        match url.scheme() {
            "postgres" | "postgresql" => {}
            other => {
                return Err(DbError::invalid_url(format!(
                    "unsupported scheme '{}', expected postgres or postgresql",
                    other
                )))
            }
        }

        let database = url.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(DbError::invalid_url("missing database name"));
        }

        let mut migrations_table = DEFAULT_MIGRATIONS_TABLE.to_string();
        let mut multi_statement = false;
        let mut driver_params = Vec::new();

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "x-migrations-table" => {
                    if !identifier_pattern().is_match(&value) {
                        return Err(DbError::invalid_url(format!(
                            "invalid migrations table name '{}'",
                            value
                        )));
                    }
                    migrations_table = value.into_owned();
                }
                "x-multi-statement" => {
                    multi_statement = parse_flag(&value)?;
                }
                k if k.starts_with(ENGINE_PARAM_PREFIX) => {
                    tracing::debug!("Ignoring unknown engine parameter {}", k);
                }
                _ => driver_params.push((key.into_owned(), value.into_owned())),
            }
        }

        if driver_params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(driver_params);
        }

        Ok(Self {
            connection_url: url.to_string(),
            database,
            migrations_table,
            multi_statement,
        })
    }

    /// Advisory lock key for this database and version table.
    pub fn lock_key(&self) -> i64 {
        crate::lock::lock_key(&self.database, &self.migrations_table)
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(DbError::invalid_url(format!(
            "invalid boolean '{}' for x-multi-statement",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_engine_params() {
        let target = ConnectTarget::parse(
            "postgresql://keel:pw@db:5433/app?sslmode=require&x-multi-statement=true",
        )
        .unwrap();
        assert_eq!(target.connection_url, "postgresql://keel:pw@db:5433/app?sslmode=require");
        assert_eq!(target.database, "app");
        assert_eq!(target.migrations_table, DEFAULT_MIGRATIONS_TABLE);
        assert!(target.multi_statement);
    }

    #[test]
    fn test_drops_empty_query() {
        let target =
            ConnectTarget::parse("postgres://localhost/app?x-migrations-table=app_versions")
                .unwrap();
        assert_eq!(target.connection_url, "postgres://localhost/app");
        assert_eq!(target.migrations_table, "app_versions");
        assert!(!target.multi_statement);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(ConnectTarget::parse("mysql://localhost/app").is_err());
        assert!(ConnectTarget::parse("postgresql://localhost/").is_err());
        assert!(ConnectTarget::parse("postgresql://localhost/app?x-migrations-table=a;drop").is_err());
        assert!(ConnectTarget::parse("postgresql://localhost/app?x-multi-statement=maybe").is_err());
    }

    #[test]
    fn test_debug_hides_credentials() {
        let target = ConnectTarget::parse("postgresql://keel:s3cret@db/app").unwrap();
        assert!(!format!("{:?}", target).contains("s3cret"));
    }
}
