//! Deadline envelope shared by every controller operation.
//!
//! The operation body runs on its own task and is raced against the
//! context. When the context wins, TimedOut is reported right away but the
//! task is NOT aborted: it keeps running in the background so that it can
//! restore the engine lock timeout and release the quiescence gate when the
//! in-flight engine call eventually returns. Callers must not assume engine
//! resources are free the instant TimedOut comes back; `Migrator::close`
//! is the only operation that waits for them.

use crate::context::Context;
use crate::error::{MigratorError, Result};
use std::future::Future;
use tracing::debug;

/// Run `op` under `ctx`, mapping an expired context to [`MigratorError::TimedOut`].
///
/// TimedOut takes priority: if the context has expired by the time the
/// body finishes, its result (success or failure) is discarded.
pub(crate) async fn run_with_deadline<T, F>(ctx: &Context, op: F) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    let mut task = tokio::spawn(op);

    let joined = tokio::select! {
        biased;
        _ = ctx.done() => {
            debug!("Deadline reached before operation finished, detaching it");
            return Err(MigratorError::TimedOut);
        }
        joined = &mut task => joined,
    };

    if ctx.is_done() {
        return Err(MigratorError::TimedOut);
    }

    match joined {
        Ok(result) => result,
        Err(err) => Err(MigratorError::generic(format!(
            "operation task failed: {}",
            err
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_passes_through_success() {
        let ctx = Context::with_timeout(Duration::from_secs(5));
        let value = run_with_deadline(&ctx, async { Ok(42) }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_passes_through_generic_failure() {
        let ctx = Context::background();
        let err = run_with_deadline(&ctx, async {
            Err::<(), _>(MigratorError::generic("boom"))
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Generic);
    }

    #[tokio::test]
    async fn test_deadline_first_reports_timed_out_and_detaches() {
        let finished = Arc::new(AtomicBool::new(false));
        let ctx = Context::with_timeout(Duration::from_millis(10));

        let flag = finished.clone();
        let err = run_with_deadline(&ctx, async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap_err();

        assert!(err.is_timed_out());
        assert!(!finished.load(Ordering::SeqCst));

        // The detached body still runs to completion
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_timed_out_wins_over_concurrent_failure() {
        let ctx = Context::background();
        let inner = ctx.clone();
        let err = run_with_deadline(&ctx, async move {
            inner.cancel();
            Err::<(), _>(MigratorError::generic("lost the race"))
        })
        .await
        .unwrap_err();
        assert!(err.is_timed_out());
    }

    #[tokio::test]
    async fn test_already_expired_context() {
        let ctx = Context::with_timeout(Duration::ZERO);
        let err = run_with_deadline(&ctx, async { Ok(()) }).await.unwrap_err();
        assert!(err.is_timed_out());
    }

    #[tokio::test]
    async fn test_panicking_body_is_generic() {
        let ctx = Context::background();
        let err = run_with_deadline(&ctx, async {
            if true {
                panic!("body panicked");
            }
            Ok(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Generic);
        assert!(err.to_string().contains("operation task failed"));
    }
}
