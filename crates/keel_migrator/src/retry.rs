//! Exponential retry for the connection phase.

use crate::config::RetryConfig;
use crate::context::Context;
use std::fmt::Display;
use std::future::Future;
use tracing::debug;

/// Call `op` with the 1-based attempt number until it succeeds, the policy
/// runs out of attempts, or `ctx` expires. Returns the last error on failure.
pub(crate) async fn exponential_retry<T, E, F, Fut>(
    ctx: &Context,
    policy: &RetryConfig,
    mut op: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if attempt >= attempts || ctx.is_done() {
            return Err(err);
        }

        let delay = policy.delay_before_retry(attempt - 1);
        debug!(attempt, attempts, ?delay, error = %err, "Attempt failed, retrying");

        if !delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.done() => return Err(err),
            }
        }

        attempt += 1;
    }
}
