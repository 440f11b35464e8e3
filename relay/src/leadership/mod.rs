//! Distributed leader election for capture pipelines.
//!
//! Exactly one pipeline instance across the fleet may actively relay for a
//! given source. Mutual exclusion is mediated entirely by an external
//! coordination service behind the [`base::CoordinationService`] seam; no
//! in-process locking is involved. The [`coordinator::LeadershipCoordinator`]
//! owns acquisition retries with bounded exponential backoff and the
//! attempt-tracker state behind them.

pub mod base;
pub mod coordinator;

pub use base::{CoordinationService, Lease};
pub use coordinator::{BackoffPolicy, LeadershipCoordinator, TakeLeadershipAttemptTracker};
