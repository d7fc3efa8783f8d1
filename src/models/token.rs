use crate::models::user::UserResponse;
use chrono::{DateTime, Utc};
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use uuid::Uuid;
use validator::Validate;

/// Claim set carried inside every bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    /// Token identity, distinct from the session id.
    pub id: Uuid,
    pub user_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

/// Returned by register, login, refresh and the OAuth hand-off.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AuthResponse {
    pub session_id: String,
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
    pub user: UserResponse,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct RefreshRequest {
    #[validate(length(min = 1))]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct UnblacklistRequest {
    #[validate(length(min = 1, max = 4096))]
    pub token: String,
}

/// Reason recorded the last time every token of the user was revoked.
#[derive(Debug, Serialize, JsonSchema)]
pub struct UserBlacklistStatus {
    pub user_id: Uuid,
    pub reason: Option<String>,
}
