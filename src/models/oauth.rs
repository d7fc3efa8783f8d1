use crate::models::session::DeviceInfo;
use crate::models::token::AuthResponse;
use chrono::{DateTime, Utc};
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use validator::Validate;

/// CSRF state handed to the browser before the provider redirect.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OAuthState {
    pub state: String,
    pub provider: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct OAuthStateResponse {
    pub state: String,
    pub expires_in: u64,
}

/// Result of a completed provider callback, parked until the frontend
/// exchanges the one-time token for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempAuthData {
    pub auth: AuthResponse,
    pub device: Option<DeviceInfo>,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct OAuthExchangeRequest {
    #[validate(length(min = 1, max = 128))]
    pub temp_token: String,
}
