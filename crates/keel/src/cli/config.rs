//! Configuration resolution.
//!
//! Values come from three layers, highest first: command-line flags (or
//! their `KEEL_*` environment variables), the TOML file named by `--config`,
//! and the built-in defaults of [`MigratorConfig`].

use anyhow::{Context, Result};
use keel_migrator::{DatabaseConfig, MigratorConfig, RetryConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Layout of the `--config` file.
///
/// ```toml
/// migrations_path = "db/migrations"
/// timeout_secs = 60
///
/// [database]
/// host = "db.internal"
/// name = "orders"
///
/// [retry]
/// attempts = 5
/// initial_delay_ms = 200
/// limit_delay_ms = 5000
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub migrations_path: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub retry: RetrySection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
    pub sslmode: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySection {
    pub attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub limit_delay_ms: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub migrations_path: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub sslmode: Option<String>,
    pub timeout_secs: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub retry_initial_delay_ms: Option<u64>,
    pub retry_limit_delay_ms: Option<u64>,
}

/// Fully resolved settings for one run.
#[derive(Debug)]
pub struct Settings {
    pub migrator: MigratorConfig,
    /// Budget for connect plus the operation. `None` means no deadline.
    pub timeout: Option<Duration>,
}

pub fn resolve(file: FileConfig, cli: Overrides) -> Settings {
    let defaults = MigratorConfig::default();
    let db_defaults = DatabaseConfig::default();
    let retry_defaults = RetryConfig::default();
    let db = file.database;
    let retry = file.retry;

    let database = DatabaseConfig {
        host: cli.host.or(db.host).unwrap_or(db_defaults.host),
        port: cli.port.or(db.port).unwrap_or(db_defaults.port),
        user: cli.user.or(db.user).unwrap_or(db_defaults.user),
        password: cli.password.or(db.password).unwrap_or(db_defaults.password),
        name: cli.database.or(db.name).unwrap_or(db_defaults.name),
        ssl_mode: cli.sslmode.or(db.sslmode).unwrap_or(db_defaults.ssl_mode),
    };

    let retry = RetryConfig {
        attempts: cli
            .retry_attempts
            .or(retry.attempts)
            .unwrap_or(retry_defaults.attempts),
        initial_delay: cli
            .retry_initial_delay_ms
            .or(retry.initial_delay_ms)
            .map(Duration::from_millis)
            .unwrap_or(retry_defaults.initial_delay),
        limit_delay: cli
            .retry_limit_delay_ms
            .or(retry.limit_delay_ms)
            .map(Duration::from_millis)
            .unwrap_or(retry_defaults.limit_delay),
    };

    let migrations_path = cli
        .migrations_path
        .or(file.migrations_path)
        .unwrap_or(defaults.migrations_path);

    Settings {
        migrator: MigratorConfig {
            migrations_path,
            database,
            retry,
            already_closed_pattern: defaults.already_closed_pattern,
        },
        timeout: cli
            .timeout_secs
            .or(file.timeout_secs)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_migrator::DEFAULT_MIGRATIONS_PATH;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
migrations_path = "db/migrations"
timeout_secs = 60

[database]
host = "db.internal"
port = 5433
name = "orders"
password = "from-file"

[retry]
attempts = 5
initial_delay_ms = 200
limit_delay_ms = 5000
"#;

    #[test]
    fn test_defaults_without_file_or_flags() {
        let settings = resolve(FileConfig::default(), Overrides::default());
        assert_eq!(
            settings.migrator.migrations_path,
            PathBuf::from(DEFAULT_MIGRATIONS_PATH)
        );
        assert_eq!(settings.migrator.database.host, "localhost");
        assert_eq!(settings.migrator.database.port, 5432);
        assert_eq!(settings.migrator.retry.attempts, 1);
        assert!(settings.timeout.is_none());
    }

    #[test]
    fn test_file_values_apply() {
        let file = FileConfig::parse(SAMPLE).unwrap();
        let settings = resolve(file, Overrides::default());

        assert_eq!(settings.migrator.migrations_path, PathBuf::from("db/migrations"));
        assert_eq!(settings.migrator.database.host, "db.internal");
        assert_eq!(settings.migrator.database.port, 5433);
        assert_eq!(settings.migrator.database.name, "orders");
        // Not in the file
        assert_eq!(settings.migrator.database.user, "postgres");
        assert_eq!(settings.migrator.retry.attempts, 5);
        assert_eq!(settings.migrator.retry.initial_delay, Duration::from_millis(200));
        assert_eq!(settings.migrator.retry.limit_delay, Duration::from_secs(5));
        assert_eq!(settings.timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_flags_override_file() {
        let file = FileConfig::parse(SAMPLE).unwrap();
        let cli = Overrides {
            host: Some("override.internal".to_string()),
            password: Some("from-flag".to_string()),
            retry_attempts: Some(2),
            timeout_secs: Some(0),
            ..Overrides::default()
        };
        let settings = resolve(file, cli);

        assert_eq!(settings.migrator.database.host, "override.internal");
        assert_eq!(settings.migrator.database.password, "from-flag");
        assert_eq!(settings.migrator.database.port, 5433);
        assert_eq!(settings.migrator.retry.attempts, 2);
        // Zero disables the deadline
        assert!(settings.timeout.is_none());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let err = FileConfig::parse("[database]\nhostname = \"x\"\n").unwrap_err();
        assert!(format!("{:#}", err).contains("hostname"));
    }

    #[test]
    fn test_load_reports_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("keel.toml");
        std::fs::write(&path, "timeout_secs = \"soon\"").unwrap();

        let err = FileConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("keel.toml"));

        let missing = FileConfig::load(&tmp.path().join("absent.toml")).unwrap_err();
        assert!(missing.to_string().contains("Failed to read config file"));
    }
}
