//! Background workers driving capture pipelines.

pub mod base;
pub mod capture;
