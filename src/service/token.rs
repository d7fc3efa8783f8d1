use crate::clock::Clock;
use crate::error::app_error::AppError;
use crate::models::token::TokenPayload;
use chrono::Duration;
use pasetors::Local;
use pasetors::keys::SymmetricKey;
use pasetors::token::UntrustedToken;
use pasetors::version4::{LocalToken, V4};
use std::sync::Arc;
use uuid::Uuid;

pub const SYMMETRIC_KEY_LEN: usize = 32;

/// Mints and verifies PASETO v4.local bearer tokens. Pure: it never
/// touches the store, so blacklist checks are the caller's job.
pub struct TokenCodec {
    key: SymmetricKey<V4>,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    pub fn new(symmetric_key: &str, clock: Arc<dyn Clock>) -> Result<Self, AppError> {
        if symmetric_key.len() != SYMMETRIC_KEY_LEN {
            return Err(AppError::InvalidConfiguration(format!(
                "token symmetric key must be exactly {} bytes, got {}",
                SYMMETRIC_KEY_LEN,
                symmetric_key.len()
            )));
        }

        let key = SymmetricKey::<V4>::from(symmetric_key.as_bytes())
            .map_err(|e| AppError::InvalidConfiguration(format!("invalid token symmetric key: {}", e)))?;

        Ok(Self { key, clock })
    }

    pub fn create_token(&self, user_id: Uuid, duration: Duration) -> Result<(String, TokenPayload), AppError> {
        let issued_at = self.clock.now();
        let payload = TokenPayload {
            id: Uuid::now_v7(),
            user_id,
            issued_at,
            expired_at: issued_at + duration,
        };

        let message = serde_json::to_vec(&payload)?;
        let token = LocalToken::encrypt(&self.key, &message, None, None).map_err(|_| AppError::InvalidToken)?;

        Ok((token, payload))
    }

    pub fn verify_token(&self, token: &str) -> Result<TokenPayload, AppError> {
        let untrusted = UntrustedToken::<Local, V4>::try_from(token).map_err(|_| AppError::InvalidToken)?;
        let trusted = LocalToken::decrypt(&self.key, &untrusted, None, None).map_err(|_| AppError::InvalidToken)?;
        let payload: TokenPayload = serde_json::from_str(trusted.payload()).map_err(|_| AppError::InvalidToken)?;

        if self.clock.now() > payload.expired_at {
            return Err(AppError::ExpiredToken);
        }

        Ok(payload)
    }
}
