//! Connect, run one transition, close.

use crate::cli::config::Settings;
use anyhow::Result;
use keel_db::PgConnector;
use keel_migrator::{Context, Migrator};
use std::fmt;
use std::time::Duration;
use tracing::{error, info, warn};

/// Budget for closing the controller once the operation is over.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Assert,
    Apply,
    Rollback,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Assert => write!(f, "assert"),
            Operation::Apply => write!(f, "apply"),
            Operation::Rollback => write!(f, "rollback"),
        }
    }
}

pub async fn run(operation: Operation, version: u64, settings: Settings) -> Result<()> {
    let ctx = match settings.timeout {
        Some(timeout) => Context::with_timeout(timeout),
        None => Context::background(),
    };
    let interrupt = spawn_interrupt_handler(&ctx);

    let result = run_with_context(&ctx, operation, version, settings).await;
    interrupt.abort();
    result
}

async fn run_with_context(
    ctx: &Context,
    operation: Operation,
    version: u64,
    settings: Settings,
) -> Result<()> {
    info!(
        "Migrations source {}",
        settings.migrator.migrations_path.display()
    );
    let migrator = Migrator::connect(ctx, PgConnector::new(), settings.migrator).await?;

    let outcome = match operation {
        Operation::Assert => migrator.assert(ctx, version).await,
        Operation::Apply => migrator.apply(ctx, version).await,
        Operation::Rollback => migrator.rollback(ctx, version).await,
    };

    let close_ctx = Context::with_timeout(CLOSE_TIMEOUT);
    let closed = migrator.close(&close_ctx).await;

    match (outcome, closed) {
        (Ok(()), Ok(())) => {
            info!("{} {} finished", operation, version);
            Ok(())
        }
        (Ok(()), Err(close_err)) => Err(close_err.into()),
        (Err(err), closed) => {
            if let Err(close_err) = closed {
                error!("Failed to close migrator: {}", close_err);
            }
            Err(err.into())
        }
    }
}

/// Cancel `ctx` on Ctrl-C.
fn spawn_interrupt_handler(ctx: &Context) -> tokio::task::JoinHandle<()> {
    let token = ctx.cancellation_token();
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    warn!("Interrupted, cancelling");
                    token.cancel();
                }
                Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
            },
            _ = token.cancelled() => {}
        }
    })
}
