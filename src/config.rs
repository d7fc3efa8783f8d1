use rocket::figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE_PATH: &str = "/api/v1";

/// Built-in token key. Only acceptable in debug builds.
pub const DEV_SYMMETRIC_KEY: &str = "whoami-dev-key-change-me-32chars";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
    pub cors: CorsConfig,
    pub api: ApiConfig,
    pub tokens: TokenConfig,
    pub session: SessionConfig,
    pub rate_limit: RateLimitConfig,
    pub lockout: LockoutConfig,
    pub security: SecurityConfig,
    pub oauth: OAuthConfig,
    pub admin: AdminConfig,
    pub maintenance: MaintenanceConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub address: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub connect_timeout_seconds: u64,
    pub command_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Memory,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StoreConfig {
    /// `memory` keeps everything in-process and is only suitable for a single
    /// development instance.
    pub backend: StoreBackend,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub json_format: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    pub base_path: String,
    pub enable_swagger: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TokenConfig {
    /// Exactly 32 characters; used as the PASETO v4.local key.
    pub symmetric_key: String,
    pub access_token_duration_seconds: i64,
    pub refresh_token_duration_seconds: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    /// Must be at least the refresh token lifetime.
    pub ttl_seconds: u64,
    /// Fixed TTL for tokens blacklisted on revoke or rotation.
    pub blacklist_ttl_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub requests: u32,
    pub window_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub default: RateLimitPolicy,
    pub auth: RateLimitPolicy,
    pub registration: RateLimitPolicy,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LockoutConfig {
    /// Failures that raise a medium severity activity.
    pub warning_threshold: i64,
    /// Failures that lock the account (or the IP for unknown emails).
    pub lockout_threshold: i64,
    pub lockout_duration_minutes: i64,
    pub failure_horizon_hours: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SecurityConfig {
    pub activity_retention_days: i64,
    pub activity_page_size: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OAuthConfig {
    pub state_ttl_seconds: u64,
    pub temp_data_ttl_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AdminConfig {
    /// Empty disables every admin route.
    pub auth_token: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            address: "127.0.0.1".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/whoami".to_string(),
            max_connections: 16,
            min_connections: 4,
            acquire_timeout: 5,
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            connect_timeout_seconds: 5,
            command_timeout_ms: 500,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { backend: StoreBackend::Redis }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            allow_credentials: true,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_API_BASE_PATH.to_string(),
            enable_swagger: true,
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            // Development key only; production must set WHOAMI_TOKENS__SYMMETRIC_KEY.
            symmetric_key: DEV_SYMMETRIC_KEY.to_string(),
            access_token_duration_seconds: 15 * 60,
            refresh_token_duration_seconds: 7 * 24 * 60 * 60,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 7 * 24 * 60 * 60,
            blacklist_ttl_seconds: 24 * 60 * 60,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default: RateLimitPolicy {
                requests: 1000,
                window_seconds: 60 * 60,
            },
            auth: RateLimitPolicy {
                requests: 50,
                window_seconds: 15 * 60,
            },
            registration: RateLimitPolicy {
                requests: 3,
                window_seconds: 60 * 60,
            },
        }
    }
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            warning_threshold: 3,
            lockout_threshold: 5,
            lockout_duration_minutes: 30,
            failure_horizon_hours: 24,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            activity_retention_days: 30,
            activity_page_size: 50,
        }
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            state_ttl_seconds: 10 * 60,
            temp_data_ttl_seconds: 5 * 60,
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 15 * 60,
        }
    }
}

impl TokenConfig {
    pub fn uses_dev_key(&self) -> bool {
        self.symmetric_key == DEV_SYMMETRIC_KEY
    }
}

impl Config {
    /// Load configuration from multiple sources in priority order:
    /// 1. Built-in defaults
    /// 2. Whoami.toml (if present)
    /// 3. Environment variables prefixed with WHOAMI_ (`__` separates nesting)
    /// 4. DATABASE_URL / REDIS_URL
    pub fn load() -> Result<Self, figment::Error> {
        let defaults = toml::to_string(&Config::default()).map_err(|e| figment::Error::from(e.to_string()))?;

        let figment = Figment::new()
            .merge(Toml::string(&defaults))
            .merge(Toml::file("Whoami.toml"))
            .merge(Env::prefixed("WHOAMI_").split("__"))
            .merge(Env::raw().only(&["DATABASE_URL"]).map(|_| "database.url".into()))
            .merge(Env::raw().only(&["REDIS_URL"]).map(|_| "redis.url".into()));

        figment.extract()
    }
}
