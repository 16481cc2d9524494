use serde::Deserialize;
use utoipa::ToSchema;

/// PIN submitted to enter manager mode.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PinRequest {
    pub pin: String,
}
