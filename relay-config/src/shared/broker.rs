use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Connection settings for the message broker that receives published events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BrokerConfig {
    /// Address of the broker (for example a bootstrap-servers string).
    pub endpoint: String,
    /// Optional client identifier reported to the broker.
    #[serde(default)]
    pub client_id: Option<String>,
}

impl BrokerConfig {
    /// Validates broker configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.endpoint.is_empty() {
            return Err(ValidationError::BrokerEndpointEmpty);
        }

        Ok(())
    }
}
