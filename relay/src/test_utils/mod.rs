//! In-memory collaborators for exercising capture pipelines in tests.

pub mod coordination;
pub mod dao;
pub mod log;
pub mod pipeline;
pub mod producer;
