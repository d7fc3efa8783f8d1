use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::error::app_error::AppError;
use crate::models::session::{DeviceInfo, Session};
use crate::service::blacklist::TokenBlacklist;
use crate::store::{KeyValueStore, StoreError, keys, token_fingerprint};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Session records plus their three lookup indices and the per-user id set.
///
/// The record under `session:id:<id>` is the single source of truth; the
/// token indices only hold the id. Cross-key writes are not atomic, so every
/// read treats "pointer present, record gone" as not found.
#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn KeyValueStore>,
    blacklist: TokenBlacklist,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    blacklist_ttl: Duration,
}

fn generate_session_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

impl SessionService {
    pub fn new(store: Arc<dyn KeyValueStore>, blacklist: TokenBlacklist, clock: Arc<dyn Clock>, config: &SessionConfig) -> Self {
        Self {
            store,
            blacklist,
            clock,
            ttl: Duration::from_secs(config.ttl_seconds.max(1)),
            blacklist_ttl: Duration::from_secs(config.blacklist_ttl_seconds.max(1)),
        }
    }

    pub async fn create_session(&self, user_id: &Uuid, access_token: &str, refresh_token: &str, device_info: DeviceInfo) -> Result<Session, AppError> {
        let now = self.clock.now();
        let session = Session {
            id: generate_session_id(),
            user_id: *user_id,
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            device_info,
            created_at: now,
            last_active_at: now,
            is_active: true,
        };

        let mut written = Vec::with_capacity(3);
        if let Err(e) = self.write_indices(&session, &mut written).await {
            self.rollback(&session, &written).await;
            return Err(e);
        }

        info!(
            category = "audit",
            session_id = %session.id,
            user_id = %user_id,
            device_id = %session.device_info.device_id,
            ip = %session.device_info.ip_address,
            "session created"
        );
        Ok(session)
    }

    async fn write_indices(&self, session: &Session, written: &mut Vec<String>) -> Result<(), AppError> {
        let record = serde_json::to_string(session)?;

        let id_key = keys::session_by_id(&session.id);
        self.store.set_ex(&id_key, &record, self.ttl).await?;
        written.push(id_key);

        let access_key = keys::session_by_access_token(&token_fingerprint(&session.access_token));
        self.store.set_ex(&access_key, &session.id, self.ttl).await?;
        written.push(access_key);

        let refresh_key = keys::session_by_refresh_token(&token_fingerprint(&session.refresh_token));
        self.store.set_ex(&refresh_key, &session.id, self.ttl).await?;
        written.push(refresh_key);

        let user_key = keys::user_sessions(&session.user_id.to_string());
        self.store.set_add(&user_key, &session.id).await?;
        self.store.expire(&user_key, self.ttl).await?;

        Ok(())
    }

    async fn rollback(&self, session: &Session, written: &[String]) {
        if let Err(e) = self.store.delete(written).await {
            warn!(session_id = %session.id, error = %e, "failed to roll back partially created session");
        }
        let user_key = keys::user_sessions(&session.user_id.to_string());
        if let Err(e) = self.store.set_remove(&user_key, &session.id).await {
            warn!(session_id = %session.id, error = %e, "failed to roll back session set membership");
        }
    }

    pub async fn get_session(&self, access_token: &str) -> Result<Session, AppError> {
        let pointer = keys::session_by_access_token(&token_fingerprint(access_token));
        self.resolve_pointer(&pointer).await
    }

    pub async fn get_session_by_refresh_token(&self, refresh_token: &str) -> Result<Session, AppError> {
        let pointer = keys::session_by_refresh_token(&token_fingerprint(refresh_token));
        self.resolve_pointer(&pointer).await
    }

    async fn resolve_pointer(&self, pointer: &str) -> Result<Session, AppError> {
        let session_id = self.store.get(pointer).await?.ok_or(AppError::SessionNotFound)?;
        self.get_session_by_id(&session_id).await
    }

    pub async fn get_session_by_id(&self, session_id: &str) -> Result<Session, AppError> {
        match self.store.get(&keys::session_by_id(session_id)).await? {
            Some(record) => Ok(serde_json::from_str(&record)?),
            None => {
                debug!(session_id = %session_id, "session record missing");
                Err(AppError::SessionNotFound)
            }
        }
    }

    /// Attempts every cleanup step even when one fails and reports the first
    /// error. A half-revoked session is worse than a half-reported error.
    pub async fn revoke_session(&self, session_id: &str) -> Result<(), AppError> {
        let session = self.get_session_by_id(session_id).await?;
        let mut first_error: Option<StoreError> = None;
        let mut note = |result: Result<(), StoreError>, step: &str| {
            if let Err(e) = result {
                warn!(session_id = %session_id, step = step, error = %e, "session revocation step failed");
                first_error.get_or_insert(e);
            }
        };

        let user_key = keys::user_sessions(&session.user_id.to_string());
        note(self.store.set_remove(&user_key, session_id).await, "remove_from_user_set");

        let index_keys = [
            keys::session_by_id(session_id),
            keys::session_by_access_token(&token_fingerprint(&session.access_token)),
            keys::session_by_refresh_token(&token_fingerprint(&session.refresh_token)),
        ];
        note(self.store.delete(&index_keys).await.map(|_| ()), "delete_indices");

        note(self.blacklist.blacklist(&session.access_token, self.blacklist_ttl).await, "blacklist_access_token");
        note(self.blacklist.blacklist(&session.refresh_token, self.blacklist_ttl).await, "blacklist_refresh_token");

        match first_error {
            Some(e) => Err(e.into()),
            None => {
                info!(category = "audit", session_id = %session_id, user_id = %session.user_id, "session revoked");
                Ok(())
            }
        }
    }

    pub async fn revoke_session_by_token(&self, access_token: &str) -> Result<(), AppError> {
        let session = self.get_session(access_token).await?;
        self.revoke_session(&session.id).await
    }

    /// Revokes every session in the user's set without stopping at the first
    /// failure. Returns how many sessions were revoked.
    pub async fn revoke_all_user_sessions(&self, user_id: &Uuid, reason: &str) -> Result<usize, AppError> {
        let user_key = keys::user_sessions(&user_id.to_string());
        let session_ids = self.store.set_members(&user_key).await?;

        let mut revoked = 0;
        let mut first_error: Option<AppError> = None;
        for session_id in &session_ids {
            match self.revoke_session(session_id).await {
                Ok(()) => revoked += 1,
                Err(AppError::SessionNotFound) => {}
                Err(e) => {
                    warn!(session_id = %session_id, user_id = %user_id, error = %e, "failed to revoke session");
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Err(e) = self.store.delete(&[user_key]).await {
            warn!(user_id = %user_id, error = %e, "failed to clear user session set");
            first_error.get_or_insert(e.into());
        }

        if let Err(e) = self.blacklist.blacklist_all_for_user(user_id, reason).await {
            warn!(user_id = %user_id, error = %e, "failed to record user blacklist marker");
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(revoked),
        }
    }

    /// Live sessions of the user. Ids whose record is gone are pruned from the set.
    pub async fn get_user_sessions(&self, user_id: &Uuid) -> Result<Vec<Session>, AppError> {
        let user_key = keys::user_sessions(&user_id.to_string());
        let session_ids = self.store.set_members(&user_key).await?;

        let mut sessions = Vec::with_capacity(session_ids.len());
        for session_id in session_ids {
            match self.get_session_by_id(&session_id).await {
                Ok(session) => sessions.push(session),
                Err(AppError::SessionNotFound) => {
                    debug!(session_id = %session_id, user_id = %user_id, "pruning dangling session id");
                    self.store.set_remove(&user_key, &session_id).await?;
                }
                Err(e) => return Err(e),
            }
        }

        sessions.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        Ok(sessions)
    }

    /// Token rotation. The record is only rewritten while it still exists, so
    /// a session revoked mid-rotation stays revoked. If the new indices cannot
    /// be written the session keeps its old pair. Once they are, the old pair
    /// is blacklisted before its indices are dropped, and every retirement step
    /// runs even if one fails.
    pub async fn update_session_tokens(&self, session_id: &str, new_access_token: &str, new_refresh_token: &str) -> Result<Session, AppError> {
        let old = self.get_session_by_id(session_id).await?;

        let mut rotated = old.clone();
        rotated.access_token = new_access_token.to_string();
        rotated.refresh_token = new_refresh_token.to_string();
        rotated.last_active_at = self.clock.now();

        let id_key = keys::session_by_id(session_id);
        if !self.store.set_ex_if_exists(&id_key, &serde_json::to_string(&rotated)?, self.ttl).await? {
            debug!(session_id = %session_id, "session vanished before rotation");
            return Err(AppError::SessionNotFound);
        }

        let new_index_keys = vec![
            keys::session_by_access_token(&token_fingerprint(new_access_token)),
            keys::session_by_refresh_token(&token_fingerprint(new_refresh_token)),
        ];
        if let Err(e) = self.write_pointers(&new_index_keys, session_id).await {
            warn!(session_id = %session_id, error = %e, "token rotation failed, restoring previous pair");
            self.abandon_rotation(&old, &new_index_keys).await;
            return Err(e);
        }

        // A revoke that landed between the rewrite and the pointers removed
        // the record; the fresh pointers would dangle, so take them back.
        if !self.store.exists(&id_key).await? {
            if let Err(e) = self.store.delete(&new_index_keys).await {
                warn!(session_id = %session_id, error = %e, "failed to drop pointers of a revoked session");
            }
            return Err(AppError::SessionNotFound);
        }

        let mut first_error: Option<StoreError> = None;
        let mut note = |result: Result<(), StoreError>, step: &str| {
            if let Err(e) = result {
                warn!(session_id = %session_id, step = step, error = %e, "token rotation step failed");
                first_error.get_or_insert(e);
            }
        };

        note(self.blacklist.blacklist(&old.access_token, self.blacklist_ttl).await, "blacklist_access_token");
        note(self.blacklist.blacklist(&old.refresh_token, self.blacklist_ttl).await, "blacklist_refresh_token");

        let old_index_keys = [
            keys::session_by_access_token(&token_fingerprint(&old.access_token)),
            keys::session_by_refresh_token(&token_fingerprint(&old.refresh_token)),
        ];
        note(self.store.delete(&old_index_keys).await.map(|_| ()), "delete_old_indices");

        let user_key = keys::user_sessions(&rotated.user_id.to_string());
        note(self.store.expire(&user_key, self.ttl).await.map(|_| ()), "refresh_user_set");

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(rotated),
        }
    }

    async fn write_pointers(&self, pointer_keys: &[String], session_id: &str) -> Result<(), AppError> {
        for key in pointer_keys {
            self.store.set_ex(key, session_id, self.ttl).await?;
        }
        Ok(())
    }

    /// Puts the pre-rotation record back, unless the session was revoked meanwhile.
    async fn abandon_rotation(&self, old: &Session, new_index_keys: &[String]) {
        if let Err(e) = self.store.delete(new_index_keys).await {
            warn!(session_id = %old.id, error = %e, "failed to drop pointers of an abandoned rotation");
        }
        let restored = match serde_json::to_string(old) {
            Ok(record) => self.store.set_ex_if_exists(&keys::session_by_id(&old.id), &record, self.ttl).await,
            Err(e) => {
                warn!(session_id = %old.id, error = %e, "failed to encode previous session record");
                return;
            }
        };
        if let Err(e) = restored {
            warn!(session_id = %old.id, error = %e, "failed to restore previous session record");
        }
    }

    /// Touches `last_active_at` and slides every index TTL forward together.
    /// A session revoked since it was read is not brought back.
    pub async fn update_activity(&self, access_token: &str) -> Result<(), AppError> {
        let mut session = self.get_session(access_token).await?;
        session.last_active_at = self.clock.now();

        if !self
            .store
            .set_ex_if_exists(&keys::session_by_id(&session.id), &serde_json::to_string(&session)?, self.ttl)
            .await?
        {
            return Err(AppError::SessionNotFound);
        }
        self.store
            .expire(&keys::session_by_access_token(&token_fingerprint(&session.access_token)), self.ttl)
            .await?;
        self.store
            .expire(&keys::session_by_refresh_token(&token_fingerprint(&session.refresh_token)), self.ttl)
            .await?;
        self.store.expire(&keys::user_sessions(&session.user_id.to_string()), self.ttl).await?;

        Ok(())
    }

    /// Drops set members whose record expired on its own. Returns the number removed.
    pub async fn cleanup_expired_sessions(&self) -> Result<u64, AppError> {
        let mut cleaned = 0;
        for user_key in self.store.keys(keys::USER_SESSIONS_PATTERN).await? {
            let session_ids = match self.store.set_members(&user_key).await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(key = %user_key, error = %e, "failed to read user session set");
                    continue;
                }
            };

            for session_id in session_ids {
                match self.store.exists(&keys::session_by_id(&session_id)).await {
                    Ok(true) => {}
                    Ok(false) => {
                        self.store.set_remove(&user_key, &session_id).await?;
                        cleaned += 1;
                    }
                    Err(e) => warn!(session_id = %session_id, error = %e, "failed to check session existence"),
                }
            }
        }

        info!(cleaned = cleaned, "session reconciliation finished");
        Ok(cleaned)
    }
}
