use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use relay_config::shared::LeadershipConfig;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::concurrency::shutdown::ShutdownRx;
use crate::error::RelayResult;
use crate::leadership::base::{CoordinationService, Lease};

/// Bookkeeping of consecutive failed leadership acquisition attempts.
///
/// Mutated only by the [`LeadershipCoordinator`]; reset on successful
/// acquisition. The consecutive-failure count feeds the backoff computation.
#[derive(Debug, Default)]
pub struct TakeLeadershipAttemptTracker {
    consecutive_failures: u32,
    last_attempt: Option<Instant>,
}

impl TakeLeadershipAttemptTracker {
    /// Creates a tracker with no recorded attempts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failed acquisition attempt.
    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_attempt = Some(Instant::now());
    }

    /// Resets the tracker after a successful acquisition.
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.last_attempt = Some(Instant::now());
    }

    /// Number of consecutive failed attempts since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Timestamp of the most recent attempt, successful or not.
    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }
}

/// Bounded exponential backoff policy for leadership retries.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    initial: Duration,
    max: Duration,
}

impl BackoffPolicy {
    /// Creates a policy with the given initial delay and cap.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Creates a policy from leadership configuration.
    pub fn from_config(config: &LeadershipConfig) -> Self {
        Self::new(
            Duration::from_millis(config.backoff_initial_ms),
            Duration::from_millis(config.backoff_max_ms),
        )
    }

    /// Computes the retry delay after `attempt` consecutive failures.
    ///
    /// Pure function of the attempt count: zero failures mean no delay, then
    /// the delay doubles per failure up to the cap.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        // Cap the shift; the multiplication saturates long before u32::MAX
        // attempts anyway.
        let factor = 1u32 << (attempt - 1).min(16);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

/// Acquires and releases the exclusive lease for one source.
///
/// Owns the attempt tracker and retry pacing; the coordination service only
/// answers individual acquisition attempts.
pub struct LeadershipCoordinator {
    service: Arc<dyn CoordinationService>,
    source_id: String,
    holder_id: String,
    backoff: BackoffPolicy,
    tracker: TakeLeadershipAttemptTracker,
}

impl LeadershipCoordinator {
    /// Creates a coordinator for the given source.
    ///
    /// The holder identity is a fresh UUID per coordinator, so every pipeline
    /// instance competes under its own name.
    pub fn new(
        service: Arc<dyn CoordinationService>,
        source_id: impl Into<String>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            service,
            source_id: source_id.into(),
            holder_id: uuid::Uuid::new_v4().to_string(),
            backoff,
            tracker: TakeLeadershipAttemptTracker::new(),
        }
    }

    /// Identity under which this coordinator competes for the lease.
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Read-only view of the attempt tracker.
    pub fn tracker(&self) -> &TakeLeadershipAttemptTracker {
        &self.tracker
    }

    /// Acquires the lease, retrying with backoff until successful or shut down.
    ///
    /// Returns `Ok(None)` when shutdown was requested before leadership could
    /// be taken.
    pub async fn acquire(&mut self, shutdown_rx: &mut ShutdownRx) -> RelayResult<Option<Lease>> {
        loop {
            if shutdown_rx.is_shutting_down() {
                return Ok(None);
            }

            match self
                .service
                .try_acquire(&self.source_id, &self.holder_id)
                .await
            {
                Ok(Some(lease)) => {
                    self.tracker.reset();
                    info!(
                        source_id = self.source_id,
                        fencing_token = lease.fencing_token(),
                        "acquired leadership"
                    );
                    return Ok(Some(lease));
                }
                Ok(None) => {
                    self.tracker.record_failure();
                }
                Err(err) => {
                    self.tracker.record_failure();
                    warn!(
                        source_id = self.source_id,
                        "leadership acquisition attempt failed: {err}"
                    );
                }
            }

            let delay = jittered(self.backoff.delay(self.tracker.consecutive_failures()));
            debug!(
                source_id = self.source_id,
                attempts = self.tracker.consecutive_failures(),
                delay_ms = delay.as_millis() as u64,
                "leadership busy, retrying after backoff"
            );

            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown_rx.shutting_down() => return Ok(None),
            }
        }
    }

    /// Releases a held lease.
    pub async fn release(&self, lease: &Lease) -> RelayResult<()> {
        self.service.release(lease).await
    }
}

/// Adds up to 25% random jitter so competing instances do not retry in
/// lockstep.
fn jittered(delay: Duration) -> Duration {
    if delay.is_zero() {
        return delay;
    }

    let jitter = rand::thread_rng().gen_range(Duration::ZERO..=delay / 4);
    delay + jitter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_up_to_the_cap() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(2));

        assert_eq!(policy.delay(0), Duration::ZERO);
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
        assert_eq!(policy.delay(5), Duration::from_millis(1600));
        assert_eq!(policy.delay(6), Duration::from_secs(2));
        assert_eq!(policy.delay(60), Duration::from_secs(2));
    }

    #[test]
    fn tracker_counts_failures_and_resets_on_success() {
        let mut tracker = TakeLeadershipAttemptTracker::new();
        assert_eq!(tracker.consecutive_failures(), 0);
        assert!(tracker.last_attempt().is_none());

        tracker.record_failure();
        tracker.record_failure();
        assert_eq!(tracker.consecutive_failures(), 2);
        assert!(tracker.last_attempt().is_some());

        tracker.reset();
        assert_eq!(tracker.consecutive_failures(), 0);
    }
}
