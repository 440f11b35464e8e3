pub mod concurrency;
pub mod conversion;
pub mod error;
pub mod factory;
pub mod leadership;
mod macros;
pub mod offset;
pub mod pipeline;
pub mod publish;
pub mod source;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod validation;
pub mod workers;
