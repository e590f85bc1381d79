//! Quiescence gate: "the last requested operation has finished".
//!
//! Every operation arms the gate with a fresh one-shot channel and holds the
//! sending half in a [`GateGuard`]. Dropping the guard releases the gate, so
//! the release happens exactly once on every exit path, panics included.
//! Close consumes the receiving half and waits on it.

use std::sync::{Mutex, PoisonError};
use tokio::sync::oneshot;

#[derive(Debug, Default)]
pub(crate) struct QuiescenceGate {
    pending: Mutex<Option<oneshot::Receiver<()>>>,
}

/// Proof that an operation owns the gate. Releases it on drop.
#[derive(Debug)]
pub(crate) struct GateGuard {
    tx: Option<oneshot::Sender<()>>,
}

impl QuiescenceGate {
    /// A gate in the idle state.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Mark the gate busy for the operation that holds the returned guard.
    ///
    /// Re-arming replaces the previous signal; only the most recent
    /// operation is tracked.
    pub(crate) fn arm(&self) -> GateGuard {
        let (tx, rx) = oneshot::channel();
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(rx);
        GateGuard { tx: Some(tx) }
    }

    pub(crate) fn is_idle(&self) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match pending.as_mut() {
            None => true,
            Some(rx) => match rx.try_recv() {
                Err(oneshot::error::TryRecvError::Empty) => false,
                _ => {
                    *pending = None;
                    true
                }
            },
        }
    }

    /// Wait until the most recent operation has released the gate.
    pub(crate) async fn wait_idle(&self) {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(rx) = pending {
            // A dropped sender means the guard went away, which also releases.
            let _ = rx.await;
        }
    }
}

impl GateGuard {
    /// Release the gate now instead of at drop.
    pub(crate) fn release(mut self) {
        self.signal();
    }

    fn signal(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.signal();
    }
}
