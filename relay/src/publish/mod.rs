//! Eligibility, routing, and broker publication of converted events.

pub mod filter;
pub mod producer;
pub mod strategy;

pub use filter::PublishingFilter;
pub use producer::Producer;
pub use strategy::{PublishingStrategy, TopicTarget};
