use chrono::{DateTime, Utc};
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub mod activity_types {
    pub const LOGIN_SUCCESS: &str = "login_success";
    pub const FAILED_LOGIN: &str = "failed_login";
    pub const MULTIPLE_FAILED_LOGINS: &str = "multiple_failed_logins";
    pub const ACCOUNT_LOCKED: &str = "account_locked";
    pub const IP_LOCKED: &str = "ip_locked";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

impl TryFrom<String> for Severity {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Append-only observation. Only `resolved` ever changes.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema, sqlx::FromRow)]
pub struct SuspiciousActivity {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub activity_type: String,
    pub ip_address: String,
    pub user_agent: String,
    pub description: String,
    #[sqlx(try_from = "String")]
    pub severity: Severity,
    pub metadata: JsonValue,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSuspiciousActivity {
    pub user_id: Option<Uuid>,
    pub activity_type: &'static str,
    pub ip_address: String,
    pub user_agent: String,
    pub description: String,
    pub severity: Severity,
    pub metadata: JsonValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severities_are_ordered() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn severity_round_trips_through_text() {
        for severity in [Severity::Low, Severity::Medium, Severity::High, Severity::Critical] {
            assert_eq!(Severity::try_from(severity.to_string()).unwrap(), severity);
        }
    }
}
