use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Advisory numbers sent back on every gated response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    /// Unix seconds at which the window has fully slid past this request.
    pub reset_at: i64,
    /// Seconds until the oldest request in the window ages out. Only set when rejected.
    pub retry_after: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub info: RateLimitInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitResetScope {
    All,
    Ip,
    User,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
#[validate(schema(function = "validate_reset_target"))]
pub struct RateLimitResetRequest {
    pub scope: RateLimitResetScope,
    pub ip_address: Option<String>,
    pub user_id: Option<Uuid>,
}

fn validate_reset_target(request: &RateLimitResetRequest) -> Result<(), ValidationError> {
    match request.scope {
        RateLimitResetScope::Ip if request.ip_address.is_none() => Err(ValidationError::new("ip_address_required")),
        RateLimitResetScope::User if request.user_id.is_none() => Err(ValidationError::new("user_id_required")),
        _ => Ok(()),
    }
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct RateLimitResetResponse {
    pub deleted_keys: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_reset_requires_ip() {
        let request = RateLimitResetRequest {
            scope: RateLimitResetScope::Ip,
            ip_address: None,
            user_id: None,
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn reset_all_needs_no_target() {
        let request = RateLimitResetRequest {
            scope: RateLimitResetScope::All,
            ip_address: None,
            user_id: None,
        };
        assert!(request.validate().is_ok());
    }
}
