use chrono::{DateTime, Utc};
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LockoutType {
    Account,
    Ip,
    Both,
}

impl LockoutType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockoutType::Account => "account",
            LockoutType::Ip => "ip",
            LockoutType::Both => "both",
        }
    }
}

impl fmt::Display for LockoutType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockoutType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "account" => Ok(LockoutType::Account),
            "ip" => Ok(LockoutType::Ip),
            "both" => Ok(LockoutType::Both),
            other => Err(format!("unknown lockout type: {}", other)),
        }
    }
}

impl TryFrom<String> for LockoutType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A temporary deny-gate on login attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema, sqlx::FromRow)]
pub struct AccountLockout {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub ip_address: Option<String>,
    #[sqlx(try_from = "String")]
    pub lockout_type: LockoutType,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl AccountLockout {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone)]
pub struct NewLockout {
    pub user_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub lockout_type: LockoutType,
    pub expires_at: DateTime<Utc>,
}

/// Administrative lockout. The type is derived from which subjects are given.
#[derive(Debug, Deserialize, Validate, JsonSchema)]
#[validate(schema(function = "validate_lockout_subject"))]
pub struct CreateLockoutRequest {
    pub user_id: Option<Uuid>,
    #[validate(length(min = 1, max = 64))]
    pub ip_address: Option<String>,
    #[validate(range(min = 1, max = 43200))]
    pub duration_minutes: i64,
}

fn validate_lockout_subject(request: &CreateLockoutRequest) -> Result<(), ValidationError> {
    if request.user_id.is_none() && request.ip_address.is_none() {
        return Err(ValidationError::new("lockout_requires_user_or_ip"));
    }
    Ok(())
}

impl CreateLockoutRequest {
    pub fn lockout_type(&self) -> LockoutType {
        match (self.user_id.is_some(), self.ip_address.is_some()) {
            (true, true) => LockoutType::Both,
            (false, true) => LockoutType::Ip,
            _ => LockoutType::Account,
        }
    }
}
