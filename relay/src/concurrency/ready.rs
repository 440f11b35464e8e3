//! One-shot readiness result channel for pipeline startup.
//!
//! A capture pipeline becomes ready after its first successful capture cycle.
//! The readiness signal resolves exactly once, either with success or with the
//! error that prevented the pipeline from ever becoming ready. Repeated
//! success notifications from later cycles are no-ops. A terminal failure
//! after readiness cannot travel through this channel and is surfaced through
//! the worker handle's result instead.

use tokio::sync::oneshot;

use crate::error::{ErrorKind, RelayResult};
use crate::relay_error;

/// Transmitter side of the readiness channel.
///
/// Held by the capture worker. Resolution consumes the inner sender, which is
/// what makes repeated calls no-ops.
#[derive(Debug)]
pub struct ReadyTx(Option<oneshot::Sender<RelayResult<()>>>);

impl ReadyTx {
    /// Marks the pipeline as ready.
    ///
    /// A no-op when the channel already resolved.
    pub fn resolve_ok(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(Ok(()));
        }
    }

    /// Rejects readiness with the given terminal error.
    ///
    /// A no-op when the channel already resolved.
    pub fn resolve_err(&mut self, err: crate::error::RelayError) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(Err(err));
        }
    }

    /// Returns true when the channel has not resolved yet.
    pub fn is_pending(&self) -> bool {
        self.0.is_some()
    }
}

/// Receiver side of the readiness channel.
#[derive(Debug)]
pub struct ReadyRx(oneshot::Receiver<RelayResult<()>>);

impl ReadyRx {
    /// Waits until the pipeline becomes ready or fails before readiness.
    ///
    /// Errors with [`ErrorKind::InvalidState`] when the worker went away
    /// without resolving, which happens when the pipeline is stopped before
    /// its first capture cycle completes.
    pub async fn ready(self) -> RelayResult<()> {
        self.0.await.unwrap_or_else(|_| {
            Err(relay_error!(
                ErrorKind::InvalidState,
                "Pipeline stopped before completing its first capture cycle"
            ))
        })
    }
}

/// Creates a new readiness channel.
pub fn create_ready_signal() -> (ReadyTx, ReadyRx) {
    let (tx, rx) = oneshot::channel();
    (ReadyTx(Some(tx)), ReadyRx(rx))
}
