//! Pre-start environment validation.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RelayResult;

/// Validates external preconditions before a pipeline starts capturing.
///
/// Invoked exactly once from [`crate::pipeline::Pipeline::start`]; a failure
/// is fatal to startup and prevents the pipeline from ever entering capture.
/// What gets validated (source connectivity, broker reachability, table
/// shape) is up to the wiring layer.
#[async_trait]
pub trait StartupValidator: Send + Sync {
    /// Checks the environment, failing with an
    /// [`crate::error::ErrorKind::EnvironmentInvalid`] error when capture
    /// cannot safely begin.
    async fn validate(&self) -> RelayResult<()>;
}

#[async_trait]
impl<T: StartupValidator + ?Sized> StartupValidator for Arc<T> {
    async fn validate(&self) -> RelayResult<()> {
        (**self).validate().await
    }
}

/// Validator that accepts any environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopValidator;

#[async_trait]
impl StartupValidator for NoopValidator {
    async fn validate(&self) -> RelayResult<()> {
        Ok(())
    }
}

/// Runs several validators in order, failing on the first error.
#[derive(Default)]
pub struct CompositeValidator {
    validators: Vec<Arc<dyn StartupValidator>>,
}

impl CompositeValidator {
    /// Creates an empty composite validator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a validator to the chain.
    pub fn with(mut self, validator: Arc<dyn StartupValidator>) -> Self {
        self.validators.push(validator);
        self
    }
}

#[async_trait]
impl StartupValidator for CompositeValidator {
    async fn validate(&self) -> RelayResult<()> {
        for validator in &self.validators {
            validator.validate().await?;
        }

        Ok(())
    }
}
