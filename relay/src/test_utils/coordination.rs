use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::{ErrorKind, RelayResult};
use crate::leadership::base::{CoordinationService, Lease};
use crate::relay_error;

#[derive(Debug)]
struct HeldLease {
    holder_id: String,
    fencing_token: u64,
    lost_tx: watch::Sender<bool>,
}

#[derive(Debug, Default)]
struct CoordinationInner {
    leases: HashMap<String, HeldLease>,
    next_token: u64,
    fail_next_acquire: bool,
}

/// Process-local coordination service granting one lease per source id.
///
/// Fencing tokens increase monotonically across acquisitions of the same
/// source. Leases can be revoked out-of-band with [`Self::revoke`] to
/// simulate session loss.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCoordinationService {
    inner: Arc<Mutex<CoordinationInner>>,
}

impl InMemoryCoordinationService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Revokes the lease currently held for `source_id`, if any.
    ///
    /// The holder observes the loss through its lease's lost channel.
    pub fn revoke(&self, source_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(held) = inner.leases.remove(source_id) {
            let _ = held.lost_tx.send(true);
        }
    }

    /// Identity of the current holder for `source_id`, if any.
    pub fn holder(&self, source_id: &str) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .leases
            .get(source_id)
            .map(|held| held.holder_id.clone())
    }

    /// Fencing token of the currently held lease for `source_id`, if any.
    pub fn fencing_token(&self, source_id: &str) -> Option<u64> {
        self.inner
            .lock()
            .unwrap()
            .leases
            .get(source_id)
            .map(|held| held.fencing_token)
    }

    /// Makes the next `try_acquire` call fail once.
    pub fn fail_next_acquire(&self) {
        self.inner.lock().unwrap().fail_next_acquire = true;
    }
}

#[async_trait]
impl CoordinationService for InMemoryCoordinationService {
    async fn try_acquire(&self, source_id: &str, holder_id: &str) -> RelayResult<Option<Lease>> {
        let mut inner = self.inner.lock().unwrap();

        if inner.fail_next_acquire {
            inner.fail_next_acquire = false;
            return Err(relay_error!(
                ErrorKind::SourceConnectionFailed,
                "Injected coordination failure"
            ));
        }

        if inner.leases.contains_key(source_id) {
            return Ok(None);
        }

        inner.next_token += 1;
        let fencing_token = inner.next_token;
        let (lost_tx, lost_rx) = watch::channel(false);

        inner.leases.insert(
            source_id.to_string(),
            HeldLease {
                holder_id: holder_id.to_string(),
                fencing_token,
                lost_tx,
            },
        );

        Ok(Some(Lease::new(source_id, holder_id, fencing_token, lost_rx)))
    }

    async fn release(&self, lease: &Lease) -> RelayResult<()> {
        let mut inner = self.inner.lock().unwrap();

        // Only the current holder may release; a revoked-and-reissued lease
        // must not be torn down by the previous holder.
        let held_by_caller = inner
            .leases
            .get(lease.source_id())
            .is_some_and(|held| held.holder_id == lease.holder_id());
        if held_by_caller {
            inner.leases.remove(lease.source_id());
        }

        Ok(())
    }
}
