use crate::Config;
use crate::clock::{Clock, ManualClock};
use crate::database::lockout::LockoutRepository;
use crate::database::login_attempt::LoginAttemptRepository;
use crate::database::suspicious_activity::SuspiciousActivityRepository;
use crate::database::user::UserRepository;
use crate::error::app_error::AppError;
use crate::models::lockout::{AccountLockout, LockoutType, NewLockout};
use crate::models::login_attempt::{LoginAttempt, NewLoginAttempt};
use crate::models::session::DeviceInfo;
use crate::models::suspicious_activity::{NewSuspiciousActivity, Severity, SuspiciousActivity};
use crate::models::user::User;
use crate::service::auth::{AuthDependencies, AuthService, CredentialVerifier};
use crate::service::blacklist::TokenBlacklist;
use crate::service::oauth_temp::OAuthTempStore;
use crate::service::rate_limiter::RateLimiter;
use crate::service::security::SecurityService;
use crate::service::session::SessionService;
use crate::service::token::TokenCodec;
use crate::store::{KeyValueStore, MemoryStore, StoreError, WindowSnapshot};
use crate::{AppServices, build_rocket_with_services};
use chrono::{DateTime, Utc};
use rocket::local::asynchronous::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

pub fn sample_device() -> DeviceInfo {
    DeviceInfo {
        device_id: "device-1".to_string(),
        device_name: "Firefox on Linux".to_string(),
        device_type: "desktop".to_string(),
        user_agent: "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0".to_string(),
        ip_address: "198.51.100.7".to_string(),
    }
}

/// Store whose every call fails as if Redis were down.
pub struct FailingStore;

fn down<T>() -> Result<T, StoreError> {
    Err(StoreError::Unavailable("connection refused".to_string()))
}

#[async_trait::async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        down()
    }

    async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), StoreError> {
        down()
    }

    async fn set_ex_if_exists(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<bool, StoreError> {
        down()
    }

    async fn delete(&self, _keys: &[String]) -> Result<u64, StoreError> {
        down()
    }

    async fn exists(&self, _key: &str) -> Result<bool, StoreError> {
        down()
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool, StoreError> {
        down()
    }

    async fn keys(&self, _pattern: &str) -> Result<Vec<String>, StoreError> {
        down()
    }

    async fn set_add(&self, _key: &str, _member: &str) -> Result<(), StoreError> {
        down()
    }

    async fn set_remove(&self, _key: &str, _member: &str) -> Result<(), StoreError> {
        down()
    }

    async fn set_members(&self, _key: &str) -> Result<Vec<String>, StoreError> {
        down()
    }

    async fn record_window_hit(&self, _key: &str, _window_start_ms: i64, _now_ms: i64, _member: &str, _ttl: Duration) -> Result<WindowSnapshot, StoreError> {
        down()
    }
}

/// Stores the password as-is. Argon2 is too slow to run in every test.
pub struct PlainCredentials;

impl CredentialVerifier for PlainCredentials {
    fn hash_password(&self, password: &str) -> Result<String, AppError> {
        Ok(format!("plain${}", password))
    }

    fn verify_password(&self, password: &str, password_hash: &str) -> Result<bool, AppError> {
        Ok(password_hash.strip_prefix("plain$") == Some(password))
    }

    fn dummy_verify(&self, _password: &str) {}
}

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    lockouts: Vec<AccountLockout>,
    attempts: Vec<LoginAttempt>,
    activities: Vec<SuspiciousActivity>,
}

/// Relational repositories backed by vectors. Insertion order stands in
/// for `created_at` ordering so a frozen clock still sequences events.
pub struct InMemoryRepository {
    clock: Arc<dyn Clock>,
    tables: Mutex<Tables>,
}

impl InMemoryRepository {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            tables: Mutex::new(Tables::default()),
        }
    }

    pub async fn lockouts(&self) -> Vec<AccountLockout> {
        self.tables.lock().await.lockouts.clone()
    }

    pub async fn activities(&self) -> Vec<SuspiciousActivity> {
        self.tables.lock().await.activities.clone()
    }

    pub async fn attempts(&self) -> Vec<LoginAttempt> {
        self.tables.lock().await.attempts.clone()
    }
}

fn failures_since_last_success<'a>(attempts: impl DoubleEndedIterator<Item = &'a LoginAttempt>, since: DateTime<Utc>) -> i64 {
    attempts
        .rev()
        .take_while(|attempt| !attempt.success)
        .filter(|attempt| attempt.created_at >= since)
        .count() as i64
}

#[async_trait::async_trait]
impl UserRepository for InMemoryRepository {
    async fn create_user(&self, name: &str, email: &str, password_hash: &str) -> Result<User, AppError> {
        let mut tables = self.tables.lock().await;
        if tables.users.iter().any(|u| u.email.eq_ignore_ascii_case(email)) {
            return Err(AppError::UserAlreadyExists(email.to_string()));
        }

        let user = User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at: self.clock.now(),
            last_login_at: None,
        };
        tables.users.push(user.clone());
        Ok(user)
    }

    async fn get_user_by_id(&self, id: &Uuid) -> Result<Option<User>, AppError> {
        Ok(self.tables.lock().await.users.iter().find(|u| u.id == *id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        Ok(self.tables.lock().await.users.iter().find(|u| u.email.eq_ignore_ascii_case(email)).cloned())
    }

    async fn update_last_login(&self, id: &Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        let mut tables = self.tables.lock().await;
        let user = tables.users.iter_mut().find(|u| u.id == *id).ok_or(AppError::UserNotFound)?;
        user.last_login_at = Some(at);
        Ok(())
    }
}

#[async_trait::async_trait]
impl LockoutRepository for InMemoryRepository {
    async fn create_lockout(&self, lockout: &NewLockout) -> Result<AccountLockout, AppError> {
        let created = AccountLockout {
            id: Uuid::new_v4(),
            user_id: lockout.user_id,
            ip_address: lockout.ip_address.clone(),
            lockout_type: lockout.lockout_type,
            expires_at: lockout.expires_at,
            created_at: self.clock.now(),
        };
        self.tables.lock().await.lockouts.push(created.clone());
        Ok(created)
    }

    async fn find_lockout(&self, lockout_type: LockoutType, user_id: Option<&Uuid>, ip_address: Option<&str>) -> Result<Option<AccountLockout>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .lockouts
            .iter()
            .filter(|l| l.lockout_type == lockout_type)
            .filter(|l| user_id.is_none_or(|id| l.user_id.as_ref() == Some(id)))
            .filter(|l| ip_address.is_none_or(|ip| l.ip_address.as_deref() == Some(ip)))
            .max_by_key(|l| l.expires_at)
            .cloned())
    }

    async fn delete_lockout(&self, id: &Uuid) -> Result<(), AppError> {
        self.tables.lock().await.lockouts.retain(|l| l.id != *id);
        Ok(())
    }

    async fn delete_expired_lockouts(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let mut tables = self.tables.lock().await;
        let before = tables.lockouts.len();
        tables.lockouts.retain(|l| l.expires_at > now);
        Ok((before - tables.lockouts.len()) as u64)
    }
}

#[async_trait::async_trait]
impl LoginAttemptRepository for InMemoryRepository {
    async fn record_attempt(&self, attempt: &NewLoginAttempt) -> Result<LoginAttempt, AppError> {
        let recorded = LoginAttempt {
            id: Uuid::new_v4(),
            user_id: attempt.user_id,
            email: attempt.email.clone(),
            ip_address: attempt.ip_address.clone(),
            user_agent: attempt.user_agent.clone(),
            success: attempt.success,
            failure_reason: attempt.failure_reason.clone(),
            created_at: self.clock.now(),
        };
        self.tables.lock().await.attempts.push(recorded.clone());
        Ok(recorded)
    }

    async fn count_recent_failures_for_user(&self, user_id: &Uuid, since: DateTime<Utc>) -> Result<i64, AppError> {
        let tables = self.tables.lock().await;
        let attempts = tables.attempts.iter().filter(|a| a.user_id.as_ref() == Some(user_id));
        Ok(failures_since_last_success(attempts, since))
    }

    async fn count_recent_failures_for_email(&self, email: &str, since: DateTime<Utc>) -> Result<i64, AppError> {
        let tables = self.tables.lock().await;
        let attempts = tables.attempts.iter().filter(|a| a.email.eq_ignore_ascii_case(email));
        Ok(failures_since_last_success(attempts, since))
    }
}

#[async_trait::async_trait]
impl SuspiciousActivityRepository for InMemoryRepository {
    async fn create_activity(&self, activity: &NewSuspiciousActivity) -> Result<SuspiciousActivity, AppError> {
        let created = SuspiciousActivity {
            id: Uuid::new_v4(),
            user_id: activity.user_id,
            activity_type: activity.activity_type.to_string(),
            ip_address: activity.ip_address.clone(),
            user_agent: activity.user_agent.clone(),
            description: activity.description.clone(),
            severity: activity.severity,
            metadata: activity.metadata.clone(),
            resolved: false,
            created_at: self.clock.now(),
        };
        self.tables.lock().await.activities.push(created.clone());
        Ok(created)
    }

    async fn list_activities_for_user(&self, user_id: &Uuid, limit: i64) -> Result<Vec<SuspiciousActivity>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .activities
            .iter()
            .rev()
            .filter(|a| a.user_id.as_ref() == Some(user_id))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn resolve_activity(&self, id: &Uuid, owner: Option<&Uuid>) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().await;
        match tables
            .activities
            .iter_mut()
            .find(|a| a.id == *id && owner.is_none_or(|owner| a.user_id.as_ref() == Some(owner)))
        {
            Some(activity) => {
                activity.resolved = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_stale_activities(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let mut tables = self.tables.lock().await;
        let before = tables.activities.len();
        tables
            .activities
            .retain(|a| !(a.created_at < cutoff && (a.severity == Severity::Low || a.resolved)));
        Ok((before - tables.activities.len()) as u64)
    }
}

/// Every service wired against the memory store, in-memory repositories,
/// plain credentials and a manual clock.
pub struct TestServices {
    pub config: Config,
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryStore>,
    pub repo: Arc<InMemoryRepository>,
    pub tokens: Arc<TokenCodec>,
    pub blacklist: TokenBlacklist,
    pub sessions: SessionService,
    pub security: SecurityService,
    pub oauth: OAuthTempStore,
    pub limiter: RateLimiter,
    pub auth: AuthService,
}

impl TestServices {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self::with_credentials(config, Arc::new(PlainCredentials))
    }

    pub fn with_credentials(config: Config, credentials: Arc<dyn CredentialVerifier>) -> Self {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let repo = Arc::new(InMemoryRepository::new(clock.clone()));

        let tokens = Arc::new(TokenCodec::new(&config.tokens.symmetric_key, clock.clone()).expect("default token key is valid"));
        let blacklist = TokenBlacklist::new(store.clone(), clock.clone());
        let sessions = SessionService::new(store.clone(), blacklist.clone(), clock.clone(), &config.session);
        let security = SecurityService::new(
            repo.clone(),
            repo.clone(),
            repo.clone(),
            clock.clone(),
            config.lockout.clone(),
            config.security.clone(),
        );
        let oauth = OAuthTempStore::new(store.clone(), clock.clone(), &config.oauth);
        let limiter = RateLimiter::new(store.clone(), clock.clone());

        let auth = AuthService::new(
            AuthDependencies {
                users: repo.clone(),
                credentials,
                tokens: tokens.clone(),
                blacklist: blacklist.clone(),
                sessions: sessions.clone(),
                security: security.clone(),
                oauth: oauth.clone(),
                clock: clock.clone(),
            },
            &config.tokens,
        );

        Self {
            config,
            clock,
            store,
            repo,
            tokens,
            blacklist,
            sessions,
            security,
            oauth,
            limiter,
            auth,
        }
    }

    pub fn app_services(&self) -> AppServices {
        AppServices {
            auth: self.auth.clone(),
            sessions: self.sessions.clone(),
            security: self.security.clone(),
            oauth: self.oauth.clone(),
            limiter: self.limiter.clone(),
            blacklist: self.blacklist.clone(),
            store: self.store.clone(),
        }
    }

    /// Rocket client over these services; maintenance and Postgres are not staged.
    pub async fn client(&self) -> Client {
        let rocket = build_rocket_with_services(self.config.clone(), self.app_services());
        Client::tracked(rocket).await.expect("valid rocket instance")
    }
}

impl Default for TestServices {
    fn default() -> Self {
        Self::new()
    }
}
