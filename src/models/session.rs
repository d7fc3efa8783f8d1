use chrono::{DateTime, Utc};
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use uuid::Uuid;

/// Client device a session is bound to. Serialized as a flat string map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DeviceInfo {
    pub device_id: String,
    pub device_name: String,
    pub device_type: String,
    pub user_agent: String,
    pub ip_address: String,
}

/// One authenticated device/token-pair binding, stored as JSON under
/// `session:id:<id>`. The token indices only hold the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: Uuid,
    pub access_token: String,
    pub refresh_token: String,
    pub device_info: DeviceInfo,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub is_active: bool,
}

/// Session as shown to its owner. Tokens are never echoed back.
#[derive(Debug, Serialize, JsonSchema)]
pub struct SessionResponse {
    pub id: String,
    pub device_info: DeviceInfo,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub is_current: bool,
}

impl SessionResponse {
    pub fn from_session(session: &Session, current_session_id: &str) -> Self {
        Self {
            id: session.id.clone(),
            device_info: session.device_info.clone(),
            created_at: session.created_at,
            last_active_at: session.last_active_at,
            is_current: session.id == current_session_id,
        }
    }
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct RevokeAllResponse {
    pub revoked: usize,
}
