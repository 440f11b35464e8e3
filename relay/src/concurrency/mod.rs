//! Concurrency primitives for coordinating capture pipelines.
//!
//! The engine runs one capture worker task per pipeline. Two primitives tie
//! the lifecycle together:
//!
//! - [`shutdown`] implements a broadcast cancellation token, checked at every
//!   suspension point of the capture loop so that a stop request or a lost
//!   lease interrupts sleeps and waits promptly.
//! - [`ready`] implements the one-shot readiness result channel resolved after
//!   the first successful capture cycle, or rejected when the pipeline fails
//!   before becoming ready.

pub mod ready;
pub mod shutdown;
