use crate::clock::Clock;
use crate::store::{KeyValueStore, StoreError, keys, token_fingerprint};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

const BLACKLISTED: &str = "blacklisted";
const USER_MARKER_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const USER_EVENT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Denylist of bearer tokens invalidated before their natural expiry.
/// Tokens are keyed by fingerprint; the raw string never reaches the store.
#[derive(Clone)]
pub struct TokenBlacklist {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl TokenBlacklist {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Idempotent; a second call only refreshes the TTL.
    pub async fn blacklist(&self, token: &str, ttl: Duration) -> Result<(), StoreError> {
        let key = keys::blacklisted_token(&token_fingerprint(token));
        self.store.set_ex(&key, BLACKLISTED, ttl).await
    }

    pub async fn is_blacklisted(&self, token: &str) -> Result<bool, StoreError> {
        self.store.exists(&keys::blacklisted_token(&token_fingerprint(token))).await
    }

    /// Authorized un-blacklist. Returns whether the token was blacklisted.
    pub async fn remove_from_blacklist(&self, token: &str) -> Result<bool, StoreError> {
        let removed = self.store.delete(&[keys::blacklisted_token(&token_fingerprint(token))]).await?;
        Ok(removed > 0)
    }

    /// Audit marker only. Enforcement comes from revoking every session of
    /// the user, which blacklists their known tokens one by one.
    pub async fn blacklist_all_for_user(&self, user_id: &Uuid, reason: &str) -> Result<(), StoreError> {
        let user = user_id.to_string();
        self.store.set_ex(&keys::blacklisted_user_status(&user), reason, USER_MARKER_TTL).await?;

        let event_key = keys::blacklist_event(&user, self.clock.now().timestamp());
        self.store.set_ex(&event_key, reason, USER_EVENT_TTL).await?;

        info!(category = "audit", user_id = %user_id, reason = %reason, "user tokens blacklisted");
        Ok(())
    }

    /// Reason recorded by the last [`Self::blacklist_all_for_user`], if still live.
    pub async fn user_marker(&self, user_id: &Uuid) -> Result<Option<String>, StoreError> {
        self.store.get(&keys::blacklisted_user_status(&user_id.to_string())).await
    }
}
