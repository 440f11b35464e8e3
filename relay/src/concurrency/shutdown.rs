//! Broadcast shutdown channel used as the capture loop's cancellation token.
//!
//! Replaces the classic background-thread-plus-shared-boolean pattern: the
//! receiver side is selected against at every suspension point (polling
//! sleeps, batch pulls, publish awaits), so cancellation is observed within a
//! small bounded delay rather than after a full sleep interval. The signal is
//! a latched flag, not an edge: a `select!` arm that consumes the wakeup does
//! not lose it, and every later wait resolves immediately.

use tokio::sync::watch;

/// Transmitter side of the shutdown channel.
///
/// Cloneable; any holder can request shutdown, and all subscribed receivers
/// observe it.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

impl ShutdownTx {
    /// Signals shutdown to all subscribed receivers.
    ///
    /// Returns an error when no receivers are subscribed, which means no
    /// worker is running.
    pub fn shutdown(&self) -> Result<(), watch::error::SendError<bool>> {
        self.0.send(true)
    }

    /// Creates a new receiver subscribed to this channel.
    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

/// Receiver side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    /// Completes when shutdown has been signalled.
    ///
    /// Cancellation-safe; intended for use inside `select!` arms. Checks the
    /// latched flag before suspending, so a signal raised earlier (or already
    /// consumed by another wait) still completes this one.
    pub async fn shutting_down(&mut self) {
        // The channel sender lives in the pipeline for its whole lifetime, so
        // a closed channel also means the pipeline is gone and we should stop.
        let _ = self.0.wait_for(|shutdown| *shutdown).await;
    }

    /// Returns true when shutdown has already been signalled.
    pub fn is_shutting_down(&self) -> bool {
        *self.0.borrow() || self.0.has_changed().is_err()
    }
}

/// Creates a new shutdown channel.
///
/// The channel starts in the "running" state; receivers only observe shutdown
/// after [`ShutdownTx::shutdown`] is called.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(tx), ShutdownRx(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn receivers_observe_shutdown() {
        let (tx, mut rx) = create_shutdown_channel();
        assert!(!rx.is_shutting_down());

        tx.shutdown().unwrap();

        rx.shutting_down().await;
        assert!(rx.is_shutting_down());
    }

    #[tokio::test]
    async fn shutdown_interrupts_a_pending_wait() {
        let (tx, mut rx) = create_shutdown_channel();

        let waiter = tokio::spawn(async move {
            rx.shutting_down().await;
        });

        tx.shutdown().unwrap();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn signal_stays_latched_after_being_observed() {
        let (tx, mut rx) = create_shutdown_channel();

        tx.shutdown().unwrap();

        // A wait that already consumed the wakeup must not clear the signal.
        rx.shutting_down().await;
        rx.shutting_down().await;
        assert!(rx.is_shutting_down());
    }

    #[tokio::test]
    async fn dropped_sender_counts_as_shutdown() {
        let (tx, mut rx) = create_shutdown_channel();

        drop(tx);

        rx.shutting_down().await;
        assert!(rx.is_shutting_down());
    }
}
