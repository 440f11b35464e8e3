//! Durable bookkeeping of how far a pipeline has progressed.

pub mod base;
pub mod memory;
pub mod postgres;

pub use base::OffsetStore;
