use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The pipeline name must be set and unique per process.
    #[error("`name` cannot be empty")]
    PipelineNameEmpty,
    /// The source identity used for leader election must be set.
    #[error("`source_id` cannot be empty")]
    SourceIdEmpty,
    /// The source technology tag must be set.
    #[error("`technology` cannot be empty")]
    TechnologyEmpty,
    /// The broker endpoint must be set.
    #[error("`broker.endpoint` cannot be empty")]
    BrokerEndpointEmpty,
    /// A generic field constraint violation.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
}
