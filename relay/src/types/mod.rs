//! Core data types flowing through the capture pipeline.

mod event;
mod position;

pub use event::*;
pub use position::*;
