use crate::clock::Clock;
use crate::config::RateLimitPolicy;
use crate::models::rate_limit::{RateLimitDecision, RateLimitInfo};
use crate::store::{KeyValueStore, StoreError, keys};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Sliding-window limiter over the store's sorted-set pipeline.
///
/// The prune/count/add sequence runs as one atomic pipeline, so concurrent
/// requests for the same key cannot both observe a free slot.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn check_rate_limit(&self, key: &str, policy: RateLimitPolicy) -> Result<RateLimitDecision, StoreError> {
        let now = self.clock.now();
        let now_ms = now.timestamp_millis();
        let window = Duration::from_secs(policy.window_seconds.max(1));
        let window_ms = window.as_millis() as i64;
        let window_start_ms = now_ms - window_ms;

        // Several hits can land in the same millisecond; the member must stay unique.
        let member = format!("{}-{}", now_ms, Uuid::new_v4().simple());
        let snapshot = self.store.record_window_hit(key, window_start_ms, now_ms, &member, window).await?;

        let limit = policy.requests;
        let allowed = snapshot.count < u64::from(limit);
        let remaining = u64::from(limit).saturating_sub(snapshot.count) as u32;

        let retry_after = if allowed {
            None
        } else {
            let oldest_ms = snapshot.oldest_ms.unwrap_or(now_ms);
            let wait_ms = (oldest_ms + window_ms - now_ms).max(0);
            Some(((wait_ms + 999) / 1000).max(1) as u64)
        };

        Ok(RateLimitDecision {
            allowed,
            info: RateLimitInfo {
                limit,
                remaining,
                reset_at: now.timestamp() + window.as_secs() as i64,
                retry_after,
            },
        })
    }

    /// Same as [`Self::check_rate_limit`] but fails open: a store error is
    /// logged and `None` is returned so the request proceeds ungated.
    pub async fn check_fail_open(&self, key: &str, policy: RateLimitPolicy) -> Option<RateLimitDecision> {
        match self.check_rate_limit(key, policy).await {
            Ok(decision) => Some(decision),
            Err(e) => {
                warn!(key = %key, error = %e, "rate limit check failed, allowing request");
                None
            }
        }
    }

    pub async fn reset_all(&self) -> Result<u64, StoreError> {
        self.delete_matching(keys::RATE_LIMIT_PATTERN).await
    }

    pub async fn reset_by_ip(&self, ip: &str) -> Result<u64, StoreError> {
        self.delete_matching(&keys::rate_limit_ip_pattern(ip)).await
    }

    pub async fn reset_by_user(&self, user_id: &Uuid) -> Result<u64, StoreError> {
        self.delete_matching(&keys::rate_limit_user_pattern(&user_id.to_string())).await
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64, StoreError> {
        let matching = self.store.keys(pattern).await?;
        let deleted = self.store.delete(&matching).await?;
        info!(category = "audit", pattern = %pattern, deleted = deleted, "rate limits reset");
        Ok(deleted)
    }
}
