//! Shared logging setup for Keel binaries.

use anyhow::{anyhow, Context, Result};
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const DEFAULT_LOG_FILTER: &str = "keel=info,keel_migrator=info,keel_db=info";
const VERBOSE_LOG_FILTER: &str = "keel=debug,keel_migrator=debug,keel_db=debug";
const HOME_ENV: &str = "KEEL_HOME";

pub struct LogConfig<'a> {
    /// Prefix of the daily log files.
    pub app_name: &'a str,
    pub verbose: bool,
    /// Also write to `$KEEL_HOME/logs`. Console output is always on.
    pub log_to_file: bool,
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes buffered file output.
pub fn init_logging(config: LogConfig<'_>) -> Result<Option<WorkerGuard>> {
    if !config.log_to_file {
        tracing_subscriber::registry()
            .with(console_layer(config.verbose))
            .try_init()
            .context("Failed to install tracing subscriber")?;
        return Ok(None);
    }

    let log_dir = ensure_logs_dir().context("Failed to ensure log directory")?;
    let appender = tracing_appender::rolling::daily(&log_dir, format!("{}.log", config.app_name));
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(env_filter()),
        )
        .with(console_layer(config.verbose))
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(Some(guard))
}

fn console_layer<S>(verbose: bool) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    let filter = if verbose {
        EnvFilter::new(VERBOSE_LOG_FILTER)
    } else {
        env_filter()
    };
    tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter)
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Keel home directory: `$KEEL_HOME`, else `~/.keel`.
pub fn keel_home() -> Result<PathBuf> {
    resolve_home(std::env::var_os(HOME_ENV), dirs::home_dir())
}

fn resolve_home(override_path: Option<OsString>, home: Option<PathBuf>) -> Result<PathBuf> {
    match override_path.filter(|p| !p.is_empty()) {
        Some(path) => Ok(PathBuf::from(path)),
        None => home
            .map(|h| h.join(".keel"))
            .ok_or_else(|| anyhow!("Could not determine home directory, set {}", HOME_ENV)),
    }
}

pub fn logs_dir() -> Result<PathBuf> {
    Ok(keel_home()?.join("logs"))
}

pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir()?;
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_wins() {
        let home = resolve_home(Some("/srv/keel".into()), Some(PathBuf::from("/home/ops"))).unwrap();
        assert_eq!(home, PathBuf::from("/srv/keel"));
    }

    #[test]
    fn test_defaults_under_user_home() {
        let home = resolve_home(None, Some(PathBuf::from("/home/ops"))).unwrap();
        assert_eq!(home, PathBuf::from("/home/ops/.keel"));

        let home = resolve_home(Some(OsString::new()), Some(PathBuf::from("/home/ops"))).unwrap();
        assert_eq!(home, PathBuf::from("/home/ops/.keel"));
    }

    #[test]
    fn test_no_home_is_an_error() {
        assert!(resolve_home(None, None).is_err());
    }

    #[test]
    fn test_default_filter_parses() {
        let filter = EnvFilter::new(DEFAULT_LOG_FILTER);
        assert!(filter.to_string().contains("keel_migrator=info"));
    }
}
