use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::RelayResult;

/// Exclusive leadership lease for one source identity.
///
/// Issued by the coordination service, which remains its owner: the lease is
/// ephemeral and revocable at any time (network partition, session expiry,
/// process death). Holders observe revocation through the lost channel and
/// must treat it as an immediate stop signal.
///
/// The fencing token increases monotonically across acquisitions of the same
/// source id. Checking [`Lease::is_lost`] before acknowledging progress is
/// advisory; correctness ultimately rests on the coordination service's own
/// guarantees.
#[derive(Debug)]
pub struct Lease {
    source_id: String,
    holder_id: String,
    fencing_token: u64,
    lost_rx: watch::Receiver<bool>,
}

impl Lease {
    /// Creates a lease handle; called by coordination service implementations.
    pub fn new(
        source_id: impl Into<String>,
        holder_id: impl Into<String>,
        fencing_token: u64,
        lost_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            holder_id: holder_id.into(),
            fencing_token,
            lost_rx,
        }
    }

    /// Identity of the captured source this lease covers.
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Identity of the holding pipeline instance.
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Monotonically increasing fencing token.
    pub fn fencing_token(&self) -> u64 {
        self.fencing_token
    }

    /// Returns true when the lease has been revoked or released.
    pub fn is_lost(&self) -> bool {
        *self.lost_rx.borrow()
    }

    /// Completes when the lease is lost.
    ///
    /// Cancellation-safe; intended for use inside `select!` arms. A dropped
    /// coordination-service channel counts as loss, which errs on the safe
    /// side.
    pub async fn wait_lost(&mut self) {
        while !*self.lost_rx.borrow() {
            if self.lost_rx.changed().await.is_err() {
                break;
            }
        }
    }
}

/// External lease-based mutual exclusion keyed by source identity.
///
/// The engine treats this as an opaque lock primitive supporting bounded
/// acquisition attempts, session-loss notification through the lease's lost
/// channel, and monotonic fencing tokens.
#[async_trait]
pub trait CoordinationService: Send + Sync {
    /// Attempts to acquire the lease for `source_id` on behalf of `holder_id`.
    ///
    /// Returns `None` when another holder currently owns the lease. The call
    /// is non-blocking or bounded-wait; retry pacing is the coordinator's
    /// job, not the service's.
    async fn try_acquire(&self, source_id: &str, holder_id: &str) -> RelayResult<Option<Lease>>;

    /// Releases a held lease so another instance can take over.
    async fn release(&self, lease: &Lease) -> RelayResult<()>;
}

#[async_trait]
impl<T: CoordinationService + ?Sized> CoordinationService for Arc<T> {
    async fn try_acquire(&self, source_id: &str, holder_id: &str) -> RelayResult<Option<Lease>> {
        (**self).try_acquire(source_id, holder_id).await
    }

    async fn release(&self, lease: &Lease) -> RelayResult<()> {
        (**self).release(lease).await
    }
}
