//! Change sources: ordered producers of raw change records.
//!
//! Two strategies exist for observing committed changes. [`polling`] queries
//! the source table for rows not yet marked published; [`log`] tails the
//! database's transaction log. Both yield [`crate::types::ChangeRecord`]s in
//! commit order behind the single [`base::ChangeSource`] capability, which is
//! what lets the capture loop stay source-agnostic.

pub mod base;
pub mod log;
pub mod polling;

pub use base::ChangeSource;
