use crate::clock::Clock;
use crate::config::OAuthConfig;
use crate::error::app_error::AppError;
use crate::models::oauth::{OAuthState, TempAuthData};
use crate::store::{KeyValueStore, keys};
use base64::{Engine as _, engine::general_purpose};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

fn one_time_token() -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(rand::random::<[u8; 32]>())
}

/// Short-lived one-time records for the OAuth round trip: the CSRF state
/// handed out before the provider redirect, and the finished auth result
/// parked until the frontend exchanges its token for it. Both live in the
/// shared store so any instance can complete a flow another one started.
#[derive(Clone)]
pub struct OAuthTempStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    state_ttl: Duration,
    temp_data_ttl: Duration,
}

impl OAuthTempStore {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, config: &OAuthConfig) -> Self {
        Self {
            store,
            clock,
            state_ttl: Duration::from_secs(config.state_ttl_seconds),
            temp_data_ttl: Duration::from_secs(config.temp_data_ttl_seconds),
        }
    }

    pub fn state_ttl(&self) -> Duration {
        self.state_ttl
    }

    pub async fn issue_state(&self, provider: &str) -> Result<OAuthState, AppError> {
        let state = OAuthState {
            state: one_time_token(),
            provider: provider.to_string(),
            created_at: self.clock.now(),
        };

        let value = serde_json::to_string(&state)?;
        self.store.set_ex(&keys::oauth_state(&state.state), &value, self.state_ttl).await?;
        Ok(state)
    }

    /// Valid once. An unknown, expired or already used state is a bad request.
    pub async fn consume_state(&self, state: &str) -> Result<OAuthState, AppError> {
        let key = keys::oauth_state(state);
        let Some(value) = self.store.get(&key).await? else {
            debug!("oauth state not found or expired");
            return Err(AppError::BadRequest("Invalid or expired OAuth state".to_string()));
        };

        // Delete before trusting it so a replay in flight cannot succeed too.
        if self.store.delete(&[key]).await? == 0 {
            return Err(AppError::BadRequest("Invalid or expired OAuth state".to_string()));
        }

        Ok(serde_json::from_str(&value)?)
    }

    pub async fn store_temporary_auth_data(&self, data: &TempAuthData) -> Result<String, AppError> {
        let token = one_time_token();
        let value = serde_json::to_string(data)?;
        self.store.set_ex(&keys::oauth_temp(&token), &value, self.temp_data_ttl).await?;
        Ok(token)
    }

    pub async fn take_temporary_auth_data(&self, token: &str) -> Result<TempAuthData, AppError> {
        let key = keys::oauth_temp(token);
        let Some(value) = self.store.get(&key).await? else {
            return Err(AppError::NotFound("Temporary token not found or expired".to_string()));
        };

        if self.store.delete(&[key]).await? == 0 {
            return Err(AppError::NotFound("Temporary token not found or expired".to_string()));
        }

        Ok(serde_json::from_str(&value)?)
    }
}
