pub mod memory;
pub mod redis_store;

use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store command timed out after {0:?}")]
    Timeout(Duration),
    #[error("store command failed: {0}")]
    Command(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
            StoreError::Unavailable(e.to_string())
        } else {
            StoreError::Command(e.to_string())
        }
    }
}

/// Outcome of one sliding-window pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Entries that survived pruning, counted before the current hit was added.
    pub count: u64,
    /// Score (unix millis) of the oldest surviving entry.
    pub oldest_ms: Option<i64>,
}

/// The capabilities the session, blacklist and rate-limit layers need from a
/// networked key-value store with TTLs, sets and sorted sets.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;
    /// `SET key value EX ttl XX`: overwrites only a live key. Returns whether it wrote.
    async fn set_ex_if_exists(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;
    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError>;
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;
    /// Keys matching a glob pattern where `*` matches any run of characters.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError>;
    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError>;
    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Atomically: drop entries scored at or before `window_start_ms`, count the
    /// rest, read the oldest, add `member` scored `now_ms`, refresh the TTL.
    async fn record_window_hit(&self, key: &str, window_start_ms: i64, now_ms: i64, member: &str, ttl: Duration) -> Result<WindowSnapshot, StoreError>;
}

/// Key namespaces. Each one carries its own TTL policy.
pub mod keys {
    pub fn session_by_id(session_id: &str) -> String {
        format!("session:id:{}", session_id)
    }

    pub fn session_by_access_token(fingerprint: &str) -> String {
        format!("session:token:{}", fingerprint)
    }

    pub fn session_by_refresh_token(fingerprint: &str) -> String {
        format!("session:refresh:{}", fingerprint)
    }

    pub fn user_sessions(user_id: &str) -> String {
        format!("user_sessions:{}", user_id)
    }

    pub const USER_SESSIONS_PATTERN: &str = "user_sessions:*";

    pub fn blacklisted_token(fingerprint: &str) -> String {
        format!("blacklist:token:{}", fingerprint)
    }

    pub fn blacklisted_user_status(user_id: &str) -> String {
        format!("blacklist:user:{}:status", user_id)
    }

    pub fn blacklist_event(user_id: &str, unix_seconds: i64) -> String {
        format!("blacklist:events:{}:{}", user_id, unix_seconds)
    }

    pub fn rate_limit_by_ip(route: &str, ip: &str) -> String {
        format!("rate_limit:{}:{}", route, ip)
    }

    pub fn rate_limit_by_user(user_id: &str, route: &str) -> String {
        format!("rate_limit:user:{}:{}", user_id, route)
    }

    pub const RATE_LIMIT_PATTERN: &str = "rate_limit:*";

    pub fn rate_limit_ip_pattern(ip: &str) -> String {
        format!("rate_limit:*:{}", ip)
    }

    pub fn rate_limit_user_pattern(user_id: &str) -> String {
        format!("rate_limit:user:{}:*", user_id)
    }

    pub fn oauth_temp(token: &str) -> String {
        format!("oauth_temp:{}", token)
    }

    pub fn oauth_state(state: &str) -> String {
        format!("oauth_state:{}", state)
    }
}

/// Hex SHA-256 of a bearer token, used wherever a token is part of a key.
pub fn token_fingerprint(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Redis-style glob matching restricted to `*`.
pub(crate) fn glob_match(pattern: &str, candidate: &str) -> bool {
    let pattern = pattern.as_bytes();
    let candidate = candidate.as_bytes();
    let (mut p, mut c) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut star_c = 0usize;

    while c < candidate.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            star = Some(p);
            star_c = c;
            p += 1;
        } else if p < pattern.len() && pattern[p] == candidate[c] {
            p += 1;
            c += 1;
        } else if let Some(star_p) = star {
            p = star_p + 1;
            star_c += 1;
            c = star_c;
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }

    p == pattern.len()
}
