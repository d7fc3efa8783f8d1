use crate::clock::Clock;
use crate::config::TokenConfig;
use crate::database::user::UserRepository;
use crate::error::app_error::AppError;
use crate::models::oauth::TempAuthData;
use crate::models::session::{DeviceInfo, Session};
use crate::models::token::{AuthResponse, TokenPayload};
use crate::models::user::{LoginRequest, RegisterRequest, User, UserResponse, normalize_email};
use crate::service::blacklist::TokenBlacklist;
use crate::service::oauth_temp::OAuthTempStore;
use crate::service::security::{LoginContext, SecurityService};
use crate::service::session::SessionService;
use crate::service::token::TokenCodec;
use argon2::Argon2;
use chrono::Duration;
use password_hash::rand_core::OsRng;
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, Salt, SaltString};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

/// Password hashing and checking, kept behind a trait so the login flow can
/// be exercised without paying for Argon2 in every test.
pub trait CredentialVerifier: Send + Sync {
    fn hash_password(&self, password: &str) -> Result<String, AppError>;

    /// `Ok(false)` on mismatch; `Err` only when the stored hash is unusable.
    fn verify_password(&self, password: &str, password_hash: &str) -> Result<bool, AppError>;

    /// Burns the same work as a real check for emails that match no account.
    fn dummy_verify(&self, password: &str);
}

pub struct Argon2Credentials {
    /// A real Argon2 hash used as a timing decoy for unknown emails.
    dummy_hash: String,
}

impl Argon2Credentials {
    pub fn new() -> Result<Self, AppError> {
        let salt = SaltString::generate(&mut OsRng);
        let dummy_hash = Argon2::default()
            .hash_password(b"dummy-never-matches", Salt::from(&salt))
            .map_err(|e| AppError::password_hash("Failed to generate dummy hash", e))?
            .to_string();
        Ok(Self { dummy_hash })
    }
}

impl CredentialVerifier for Argon2Credentials {
    fn hash_password(&self, password: &str) -> Result<String, AppError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), Salt::from(&salt))
            .map_err(|e| AppError::password_hash("Failed to hash password", e))?;
        Ok(hash.to_string())
    }

    fn verify_password(&self, password: &str, password_hash: &str) -> Result<bool, AppError> {
        let parsed = PasswordHash::new(password_hash).map_err(|e| AppError::password_hash("Failed to parse stored password hash", e))?;
        Ok(Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
    }

    fn dummy_verify(&self, password: &str) {
        if let Ok(hash) = PasswordHash::new(&self.dummy_hash) {
            let _ = Argon2::default().verify_password(password.as_bytes(), &hash);
        }
    }
}

/// Identity attached to a request once its bearer token checks out.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub user_id: Uuid,
    pub session_id: String,
    pub token: TokenPayload,
}

/// Login, registration, refresh and logout, composed from the token,
/// session and security layers.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    credentials: Arc<dyn CredentialVerifier>,
    tokens: Arc<TokenCodec>,
    blacklist: TokenBlacklist,
    sessions: SessionService,
    security: SecurityService,
    oauth: OAuthTempStore,
    clock: Arc<dyn Clock>,
    access_token_duration: Duration,
    refresh_token_duration: Duration,
}

pub struct AuthDependencies {
    pub users: Arc<dyn UserRepository>,
    pub credentials: Arc<dyn CredentialVerifier>,
    pub tokens: Arc<TokenCodec>,
    pub blacklist: TokenBlacklist,
    pub sessions: SessionService,
    pub security: SecurityService,
    pub oauth: OAuthTempStore,
    pub clock: Arc<dyn Clock>,
}

impl AuthService {
    pub fn new(deps: AuthDependencies, config: &TokenConfig) -> Self {
        Self {
            users: deps.users,
            credentials: deps.credentials,
            tokens: deps.tokens,
            blacklist: deps.blacklist,
            sessions: deps.sessions,
            security: deps.security,
            oauth: deps.oauth,
            clock: deps.clock,
            access_token_duration: Duration::seconds(config.access_token_duration_seconds),
            refresh_token_duration: Duration::seconds(config.refresh_token_duration_seconds),
        }
    }

    /// Argon2 is CPU bound, so it runs on the blocking pool instead of an async worker.
    async fn with_credentials<T, F>(&self, work: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn CredentialVerifier) -> Result<T, AppError> + Send + 'static,
    {
        let credentials = self.credentials.clone();
        tokio::task::spawn_blocking(move || work(credentials.as_ref()))
            .await
            .map_err(|e| AppError::PasswordHash {
                message: format!("Task join error: {}", e),
            })?
    }

    pub async fn register(&self, request: &RegisterRequest, device: DeviceInfo) -> Result<AuthResponse, AppError> {
        request.validate()?;
        let email = normalize_email(&request.email);

        if self.users.get_user_by_email(&email).await?.is_some() {
            return Err(AppError::UserAlreadyExists(email));
        }

        let password = request.password.clone();
        let password_hash = self.with_credentials(move |credentials| credentials.hash_password(&password)).await?;
        let user = self.users.create_user(request.name.trim(), &email, &password_hash).await?;

        info!(category = "audit", event_type = "user_registered", user_id = %user.id, "security audit event");
        self.start_session(&user, device).await
    }

    /// Lockout gate first, then credentials. Every outcome past the gate is
    /// recorded so failures can be correlated.
    pub async fn login(&self, request: &LoginRequest, device: DeviceInfo) -> Result<AuthResponse, AppError> {
        request.validate()?;
        let email = normalize_email(&request.email);
        let user = self.users.get_user_by_email(&email).await?;

        let attempt = LoginContext {
            user_id: user.as_ref().map(|u| u.id),
            email,
            ip_address: device.ip_address.clone(),
            user_agent: device.user_agent.clone(),
        };

        if let Err(e) = self.security.check_account_lockout(attempt.user_id.as_ref(), &attempt.ip_address).await {
            if let AppError::AccountLocked { until } = &e {
                warn!(
                    category = "audit",
                    event_type = "login_blocked",
                    ip = %attempt.ip_address,
                    locked_until = %until,
                    "security audit event (failure)"
                );
            }
            return Err(e);
        }

        let user = match user {
            Some(user) => user,
            None => {
                let password = request.password.clone();
                self.with_credentials(move |credentials| {
                    credentials.dummy_verify(&password);
                    Ok(())
                })
                .await?;
                self.security.record_failed_login(&attempt, "user_not_found").await?;
                return Err(AppError::InvalidCredentials);
            }
        };

        let (password, stored_hash) = (request.password.clone(), user.password_hash.clone());
        if !self
            .with_credentials(move |credentials| credentials.verify_password(&password, &stored_hash))
            .await?
        {
            self.security.record_failed_login(&attempt, "invalid_password").await?;
            return Err(AppError::InvalidCredentials);
        }

        self.security.record_successful_login(&attempt, user.last_login_at).await?;
        self.users.update_last_login(&user.id, self.clock.now()).await?;

        self.start_session(&user, device).await
    }

    /// Rotates the pair bound to the refresh token's session.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse, AppError> {
        if self.blacklist.is_blacklisted(refresh_token).await? {
            return Err(AppError::TokenBlacklisted);
        }

        let payload = self.tokens.verify_token(refresh_token)?;
        let session = self.sessions.get_session_by_refresh_token(refresh_token).await?;
        if session.user_id != payload.user_id {
            warn!(session_id = %session.id, "refresh token does not belong to its session owner");
            return Err(AppError::InvalidToken);
        }

        let user = self.users.get_user_by_id(&payload.user_id).await?.ok_or(AppError::Unauthorized)?;

        let (access_token, access) = self.tokens.create_token(user.id, self.access_token_duration)?;
        let (new_refresh_token, refresh) = self.tokens.create_token(user.id, self.refresh_token_duration)?;
        let session = self.sessions.update_session_tokens(&session.id, &access_token, &new_refresh_token).await?;

        info!(category = "audit", event_type = "token_refreshed", user_id = %user.id, session_id = %session.id, "security audit event");
        Ok(auth_response(&user, &session, &access, &refresh))
    }

    /// Idempotent: a token whose session is already gone logs out successfully.
    pub async fn logout(&self, access_token: &str) -> Result<(), AppError> {
        match self.sessions.revoke_session_by_token(access_token).await {
            Ok(()) | Err(AppError::SessionNotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Blacklist, then signature and expiry, then the live session. Touching
    /// the session's activity is best effort.
    pub async fn authenticate(&self, access_token: &str) -> Result<Authenticated, AppError> {
        if self.blacklist.is_blacklisted(access_token).await? {
            return Err(AppError::TokenBlacklisted);
        }

        let token = self.tokens.verify_token(access_token)?;
        let session = self.sessions.get_session(access_token).await?;
        if session.user_id != token.user_id || !session.is_active {
            return Err(AppError::InvalidToken);
        }

        if let Err(e) = self.sessions.update_activity(access_token).await {
            warn!(session_id = %session.id, error = %e, "failed to update session activity");
        }

        Ok(Authenticated {
            user_id: token.user_id,
            session_id: session.id,
            token,
        })
    }

    /// Owner of a token that decrypts and has not expired. No store lookups.
    pub fn token_subject(&self, access_token: &str) -> Option<Uuid> {
        self.tokens.verify_token(access_token).ok().map(|payload| payload.user_id)
    }

    pub async fn current_user(&self, user_id: &Uuid) -> Result<UserResponse, AppError> {
        let user = self.users.get_user_by_id(user_id).await?.ok_or(AppError::UserNotFound)?;
        Ok(UserResponse::from(&user))
    }

    /// Finishes a provider callback once the provider has identified `user_id`:
    /// burns the CSRF state, opens a session and parks the result behind a
    /// one-time token for the frontend to exchange.
    pub async fn complete_oauth_login(&self, state: &str, user_id: &Uuid, device: DeviceInfo) -> Result<String, AppError> {
        self.oauth.consume_state(state).await?;
        let user = self.users.get_user_by_id(user_id).await?.ok_or(AppError::UserNotFound)?;
        self.users.update_last_login(&user.id, self.clock.now()).await?;

        let auth = self.start_session(&user, device.clone()).await?;
        self.oauth
            .store_temporary_auth_data(&TempAuthData {
                auth,
                device: Some(device),
            })
            .await
    }

    pub async fn exchange_oauth_token(&self, temp_token: &str) -> Result<AuthResponse, AppError> {
        let data = self.oauth.take_temporary_auth_data(temp_token).await?;
        Ok(data.auth)
    }

    async fn start_session(&self, user: &User, device: DeviceInfo) -> Result<AuthResponse, AppError> {
        let (access_token, access) = self.tokens.create_token(user.id, self.access_token_duration)?;
        let (refresh_token, refresh) = self.tokens.create_token(user.id, self.refresh_token_duration)?;
        let session = self.sessions.create_session(&user.id, &access_token, &refresh_token, device).await?;

        Ok(auth_response(user, &session, &access, &refresh))
    }
}

fn auth_response(user: &User, session: &Session, access: &TokenPayload, refresh: &TokenPayload) -> AuthResponse {
    AuthResponse {
        session_id: session.id.clone(),
        access_token: session.access_token.clone(),
        access_token_expires_at: access.expired_at,
        refresh_token: session.refresh_token.clone(),
        refresh_token_expires_at: refresh.expired_at,
        user: UserResponse::from(user),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{PlainCredentials, TestServices, sample_device};
    use std::sync::Mutex;
    use std::thread::ThreadId;

    /// Plain credentials that note which thread did the work.
    #[derive(Default)]
    struct ThreadRecordingCredentials {
        threads: Mutex<Vec<ThreadId>>,
    }

    impl ThreadRecordingCredentials {
        fn note(&self) {
            self.threads.lock().unwrap().push(std::thread::current().id());
        }
    }

    impl CredentialVerifier for ThreadRecordingCredentials {
        fn hash_password(&self, password: &str) -> Result<String, AppError> {
            self.note();
            PlainCredentials.hash_password(password)
        }

        fn verify_password(&self, password: &str, password_hash: &str) -> Result<bool, AppError> {
            self.note();
            PlainCredentials.verify_password(password, password_hash)
        }

        fn dummy_verify(&self, _password: &str) {
            self.note();
        }
    }

    fn register_request(email: &str) -> RegisterRequest {
        RegisterRequest {
            name: "User One".to_string(),
            email: email.to_string(),
            password: "correct horse battery".to_string(),
        }
    }

    fn login_request(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    #[test]
    fn argon2_credentials_verify_their_own_hashes() {
        let credentials = Argon2Credentials::new().unwrap();
        let hash = credentials.hash_password("s3cret-password").unwrap();

        assert!(credentials.verify_password("s3cret-password", &hash).unwrap());
        assert!(!credentials.verify_password("wrong-password", &hash).unwrap());
        assert!(credentials.verify_password("s3cret-password", "not-a-phc-string").is_err());
    }

    #[tokio::test]
    async fn password_work_runs_off_the_async_worker() {
        let credentials = Arc::new(ThreadRecordingCredentials::default());
        let services = TestServices::with_credentials(crate::Config::default(), credentials.clone());
        let runtime_thread = std::thread::current().id();

        services.auth.register(&register_request("u1@example.com"), sample_device()).await.unwrap();
        services.auth.login(&login_request("u1@example.com", "correct horse battery"), sample_device()).await.unwrap();
        let _ = services.auth.login(&login_request("nobody@example.com", "whatever-password"), sample_device()).await;

        let threads = credentials.threads.lock().unwrap().clone();
        assert_eq!(threads.len(), 3);
        assert!(threads.iter().all(|thread| *thread != runtime_thread));
    }

    #[tokio::test]
    async fn register_then_authenticate() {
        let services = TestServices::new();
        let auth = services.auth.register(&register_request("U1@Example.com"), sample_device()).await.unwrap();

        assert_eq!(auth.user.email, "u1@example.com");
        let authenticated = services.auth.authenticate(&auth.access_token).await.unwrap();
        assert_eq!(authenticated.user_id, auth.user.id);
        assert_eq!(authenticated.session_id, auth.session_id);
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let services = TestServices::new();
        services.auth.register(&register_request("u1@example.com"), sample_device()).await.unwrap();

        assert!(matches!(
            services.auth.register(&register_request("U1@example.com"), sample_device()).await,
            Err(AppError::UserAlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn wrong_password_is_invalid_credentials() {
        let services = TestServices::new();
        services.auth.register(&register_request("u1@example.com"), sample_device()).await.unwrap();

        assert!(matches!(
            services.auth.login(&login_request("u1@example.com", "nope"), sample_device()).await,
            Err(AppError::InvalidCredentials)
        ));
        assert!(matches!(
            services.auth.login(&login_request("ghost@example.com", "nope"), sample_device()).await,
            Err(AppError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn lockout_blocks_correct_password_until_expiry() {
        let services = TestServices::new();
        let registered = services.auth.register(&register_request("u1@example.com"), sample_device()).await.unwrap();
        let mut device = sample_device();
        device.ip_address = "203.0.113.5".to_string();

        for _ in 0..5 {
            let result = services.auth.login(&login_request("u1@example.com", "wrong password"), device.clone()).await;
            assert!(matches!(result, Err(AppError::InvalidCredentials)));
        }

        let locked_until = services.clock.now() + Duration::minutes(30);
        match services.auth.login(&login_request("u1@example.com", "correct horse battery"), device.clone()).await {
            Err(AppError::AccountLocked { until }) => assert_eq!(until, locked_until),
            other => panic!("expected lockout, got {:?}", other.map(|a| a.session_id)),
        }

        services.clock.advance(Duration::minutes(30) + Duration::seconds(1));
        let auth = services
            .auth
            .login(&login_request("u1@example.com", "correct horse battery"), device)
            .await
            .unwrap();

        assert_eq!(auth.user.id, registered.user.id);
        let by_id = services.sessions.get_session_by_id(&auth.session_id).await.unwrap();
        let by_access = services.sessions.get_session(&auth.access_token).await.unwrap();
        let by_refresh = services.sessions.get_session_by_refresh_token(&auth.refresh_token).await.unwrap();
        assert_eq!(by_id, by_access);
        assert_eq!(by_access, by_refresh);
        assert_eq!(by_id.user_id, registered.user.id);
        assert_eq!(by_id.device_info.ip_address, "203.0.113.5");
    }

    #[tokio::test]
    async fn refresh_rotates_and_retires_the_old_pair() {
        let services = TestServices::new();
        let first = services.auth.register(&register_request("u1@example.com"), sample_device()).await.unwrap();

        let second = services.auth.refresh(&first.refresh_token).await.unwrap();
        assert_eq!(second.session_id, first.session_id);
        assert_ne!(second.access_token, first.access_token);

        assert!(matches!(services.auth.refresh(&first.refresh_token).await, Err(AppError::TokenBlacklisted)));
        assert!(matches!(services.auth.authenticate(&first.access_token).await, Err(AppError::TokenBlacklisted)));
        assert!(services.auth.authenticate(&second.access_token).await.is_ok());
    }

    #[tokio::test]
    async fn expired_access_token_is_rejected() {
        let services = TestServices::new();
        let auth = services.auth.register(&register_request("u1@example.com"), sample_device()).await.unwrap();

        services.clock.advance(Duration::minutes(16));
        assert!(matches!(services.auth.authenticate(&auth.access_token).await, Err(AppError::ExpiredToken)));
        assert!(services.auth.refresh(&auth.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let services = TestServices::new();
        let auth = services.auth.register(&register_request("u1@example.com"), sample_device()).await.unwrap();

        services.auth.logout(&auth.access_token).await.unwrap();
        services.auth.logout(&auth.access_token).await.unwrap();
        assert!(matches!(services.auth.authenticate(&auth.access_token).await, Err(AppError::TokenBlacklisted)));
    }

    #[tokio::test]
    async fn token_without_session_is_rejected() {
        let services = TestServices::new();
        let (orphan, _) = services.tokens.create_token(Uuid::new_v4(), Duration::minutes(5)).unwrap();

        assert!(matches!(services.auth.authenticate(&orphan).await, Err(AppError::SessionNotFound)));
    }

    #[tokio::test]
    async fn oauth_hand_off_is_single_use() {
        let services = TestServices::new();
        let registered = services.auth.register(&register_request("u1@example.com"), sample_device()).await.unwrap();
        let state = services.oauth.issue_state("github").await.unwrap();

        let temp_token = services
            .auth
            .complete_oauth_login(&state.state, &registered.user.id, sample_device())
            .await
            .unwrap();

        let auth = services.auth.exchange_oauth_token(&temp_token).await.unwrap();
        assert_eq!(auth.user.id, registered.user.id);
        assert!(services.auth.authenticate(&auth.access_token).await.is_ok());
        assert!(matches!(services.auth.exchange_oauth_token(&temp_token).await, Err(AppError::NotFound(_))));
        assert!(matches!(
            services.auth.complete_oauth_login(&state.state, &registered.user.id, sample_device()).await,
            Err(AppError::BadRequest(_))
        ));
    }
}
