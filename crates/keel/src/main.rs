//! Keel command line.
//!
//! ```text
//! keel [global options] <assert|apply|rollback> <VERSION>
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use keel_migrator::MigratorError;
use std::path::PathBuf;
use std::process::ExitCode;

mod cli;

use cli::config::{self, FileConfig, Overrides};
use cli::run::Operation;

/// Exit code for a deadline that expired or an interrupted run.
const EXIT_TIMED_OUT: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "keel", version, about = "Move a PostgreSQL schema between migration versions")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "KEEL_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding <version>_<title>.<up|down>.sql files
    #[arg(long, global = true, env = "KEEL_MIGRATIONS")]
    migrations: Option<PathBuf>,

    #[arg(long, global = true, env = "KEEL_HOST")]
    host: Option<String>,

    #[arg(long, global = true, env = "KEEL_PORT")]
    port: Option<u16>,

    #[arg(long, global = true, env = "KEEL_USER")]
    user: Option<String>,

    #[arg(long, global = true, env = "KEEL_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Database name
    #[arg(long, global = true, env = "KEEL_DATABASE")]
    database: Option<String>,

    #[arg(long, global = true, env = "KEEL_SSLMODE")]
    sslmode: Option<String>,

    /// Overall deadline in seconds, 0 for none
    #[arg(long, global = true, env = "KEEL_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Connection attempts before giving up
    #[arg(long, global = true, env = "KEEL_RETRY_ATTEMPTS")]
    retry_attempts: Option<u32>,

    #[arg(long, global = true, env = "KEEL_RETRY_INITIAL_DELAY_MS")]
    retry_initial_delay_ms: Option<u64>,

    #[arg(long, global = true, env = "KEEL_RETRY_LIMIT_DELAY_MS")]
    retry_limit_delay_ms: Option<u64>,

    /// Enable debug logging on stderr
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check that the schema is exactly at VERSION
    Assert { version: u64 },
    /// Migrate up to VERSION
    Apply { version: u64 },
    /// Migrate down to VERSION, repairing a dirty version first
    Rollback { version: u64 },
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            migrations_path: self.migrations.clone(),
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
            sslmode: self.sslmode.clone(),
            timeout_secs: self.timeout_secs,
            retry_attempts: self.retry_attempts,
            retry_initial_delay_ms: self.retry_initial_delay_ms,
            retry_limit_delay_ms: self.retry_limit_delay_ms,
        }
    }
}

impl Commands {
    fn operation(&self) -> (Operation, u64) {
        match self {
            Commands::Assert { version } => (Operation::Assert, *version),
            Commands::Apply { version } => (Operation::Apply, *version),
            Commands::Rollback { version } => (Operation::Rollback, *version),
        }
    }
}

fn run_command(cli: Cli) -> Result<()> {
    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let settings = config::resolve(file, cli.overrides());
    let (operation, version) = cli.command.operation();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(cli::run::run(operation, version, settings))
}

fn exit_code(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<MigratorError>() {
        Some(e) if e.is_timed_out() => ExitCode::from(EXIT_TIMED_OUT),
        _ => ExitCode::from(1),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _log_guard = match keel_logging::init_logging(keel_logging::LogConfig {
        app_name: "keel",
        verbose: cli.verbose,
        log_to_file: true,
    }) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Warning: failed to initialize logging: {:#}", err);
            None
        }
    };

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{:#}", err);
            eprintln!("Error: {:#}", err);
            exit_code(&err)
        }
    }
}
