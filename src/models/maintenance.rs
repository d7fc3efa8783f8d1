use rocket::serde::Serialize;
use schemars::JsonSchema;

/// Counters from one reconciliation sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
pub struct CleanupReport {
    pub dangling_session_ids: u64,
    pub expired_lockouts: u64,
    pub stale_activities: u64,
}
