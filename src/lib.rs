mod auth;
mod clock;
mod config;
mod cron_tasks;
mod database;
mod db;
mod error;
mod middleware;
mod models;
mod routes;
mod service;
mod store;

#[cfg(test)]
pub mod test_utils;

pub use config::Config;
pub use cron_tasks::run_cleanup;
pub use error::app_error::AppError;
pub use models::maintenance::CleanupReport;

use crate::clock::{Clock, SystemClock};
use crate::config::StoreBackend;
use crate::cron_tasks::stage_maintenance;
use crate::database::postgres_repository::PostgresRepository;
use crate::db::init_pool;
use crate::middleware::RequestLogger;
use crate::middleware::rate_limit::RateLimitHeaders;
use crate::routes as app_routes;
use crate::service::auth::{Argon2Credentials, AuthDependencies, AuthService};
use crate::service::blacklist::TokenBlacklist;
use crate::service::oauth_temp::OAuthTempStore;
use crate::service::rate_limiter::RateLimiter;
use crate::service::security::SecurityService;
use crate::service::session::SessionService;
use crate::service::token::TokenCodec;
use crate::store::{KeyValueStore, MemoryStore, RedisStore};
use rocket::fairing::AdHoc;
use rocket::{Build, Rocket, catchers, http::Method};
use rocket_cors::{AllowedOrigins, Cors, CorsOptions};
use rocket_okapi::swagger_ui::{SwaggerUIConfig, make_swagger_ui};
use rocket_okapi::{get_openapi_route, okapi::merge::marge_spec_list};
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(log_level: &str, json_format: bool) {
    // RUST_LOG takes precedence over logging.level, e.g.
    //   RUST_LOG=whoami_auth::service=debug
    //   RUST_LOG=info,whoami_auth::middleware=trace
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_line_number(true);

    // A subscriber may already be installed (the cron binary, tests).
    let _ = if json_format { subscriber.json().try_init() } else { subscriber.try_init() };
}

fn build_cors(cors_config: &config::CorsConfig) -> Result<Cors, AppError> {
    let is_wildcard = cors_config.allowed_origins.len() == 1 && cors_config.allowed_origins[0] == "*";

    if is_wildcard && cors_config.allow_credentials {
        return Err(AppError::InvalidConfiguration(
            "Cannot use wildcard origins (*) with credentials enabled. Either set specific origins or disable credentials.".to_string(),
        ));
    }

    let allowed_origins = if cors_config.allowed_origins.is_empty() {
        AllowedOrigins::some_exact::<&str>(&[])
    } else if is_wildcard {
        AllowedOrigins::all()
    } else {
        AllowedOrigins::some_exact(&cors_config.allowed_origins.iter().map(String::as_str).collect::<Vec<_>>())
    };

    let options = CorsOptions {
        allowed_origins,
        allowed_methods: vec![Method::Get, Method::Post, Method::Delete, Method::Options, Method::Head]
            .into_iter()
            .map(From::from)
            .collect(),
        allowed_headers: rocket_cors::AllowedHeaders::some(&["Content-Type", "Authorization", "Accept", middleware::DEVICE_ID_HEADER]),
        expose_headers: ["X-Request-Id", "X-RateLimit-Limit", "X-RateLimit-Remaining", "X-RateLimit-Reset", "Retry-After"]
            .iter()
            .map(|h| h.to_string())
            .collect(),
        allow_credentials: cors_config.allow_credentials,
        ..Default::default()
    };

    options
        .to_cors()
        .map_err(|e| AppError::InvalidConfiguration(format!("Invalid CORS configuration: {}", e)))
}

fn stage_cors(cors_config: config::CorsConfig) -> AdHoc {
    AdHoc::try_on_ignite("CORS", |rocket| async move {
        match build_cors(&cors_config) {
            Ok(cors) => Ok(rocket.attach(cors)),
            Err(e) => {
                error!(error = ?e, "Failed to build CORS fairing");
                Err(rocket)
            }
        }
    })
}

fn get_swagger_config(openapi_url: &str) -> SwaggerUIConfig {
    SwaggerUIConfig {
        url: openapi_url.to_string(),
        ..Default::default()
    }
}

fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return config::DEFAULT_API_BASE_PATH.to_string();
    }

    let mut normalized = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    };

    while normalized.ends_with('/') && normalized.len() > 1 {
        normalized.pop();
    }

    normalized
}

fn join_base_path(base_path: &str, path: &str) -> String {
    let base = base_path.trim_end_matches('/');
    let suffix = path.trim_start_matches('/');

    if base.is_empty() {
        format!("/{}", suffix)
    } else {
        format!("{}/{}", base, suffix)
    }
}

struct RouteSpec {
    path: &'static str,
    routes: Vec<rocket::Route>,
    openapi: rocket_okapi::okapi::openapi3::OpenApi,
}

fn collect_route_specs() -> Vec<RouteSpec> {
    let (auth_routes, auth_openapi) = app_routes::auth::routes();
    let (session_routes, session_openapi) = app_routes::session::routes();
    let (security_routes, security_openapi) = app_routes::security::routes();
    let (oauth_routes, oauth_openapi) = app_routes::oauth::routes();
    let (admin_routes, admin_openapi) = app_routes::admin::routes();
    let (health_routes, health_openapi) = app_routes::health::routes();

    vec![
        RouteSpec {
            path: "/auth",
            routes: auth_routes,
            openapi: auth_openapi,
        },
        RouteSpec {
            path: "/sessions",
            routes: session_routes,
            openapi: session_openapi,
        },
        RouteSpec {
            path: "/security",
            routes: security_routes,
            openapi: security_openapi,
        },
        RouteSpec {
            path: "/oauth",
            routes: oauth_routes,
            openapi: oauth_openapi,
        },
        RouteSpec {
            path: "/admin",
            routes: admin_routes,
            openapi: admin_openapi,
        },
        RouteSpec {
            path: "/health",
            routes: health_routes,
            openapi: health_openapi,
        },
    ]
}

fn mount_api_routes(mut rocket: Rocket<Build>, base_path: &str, enable_swagger: bool) -> Rocket<Build> {
    let route_specs = collect_route_specs();
    let mut openapi_list = Vec::new();

    for spec in route_specs {
        rocket = rocket.mount(join_base_path(base_path, spec.path), spec.routes);
        openapi_list.push((spec.path, spec.openapi));
    }

    if !enable_swagger {
        return rocket;
    }

    match marge_spec_list(&openapi_list) {
        Ok(openapi_docs) => {
            let settings = rocket_okapi::settings::OpenApiSettings::default();
            rocket = rocket.mount(base_path, vec![get_openapi_route(openapi_docs, &settings)]);

            let docs_path = join_base_path(base_path, "docs");
            let openapi_url = join_base_path(base_path, "openapi.json");
            rocket.mount(docs_path, make_swagger_ui(&get_swagger_config(&openapi_url)))
        }
        Err(err) => {
            error!(error = %err, "Could not merge OpenAPI spec, docs are not served");
            rocket
        }
    }
}

/// The shared services every route and guard reads from managed state.
#[derive(Clone)]
pub struct AppServices {
    pub auth: AuthService,
    pub sessions: SessionService,
    pub security: SecurityService,
    pub oauth: OAuthTempStore,
    pub limiter: RateLimiter,
    pub blacklist: TokenBlacklist,
    pub store: Arc<dyn KeyValueStore>,
}

impl AppServices {
    fn manage(self, rocket: Rocket<Build>) -> Rocket<Build> {
        rocket
            .manage(self.auth)
            .manage(self.sessions)
            .manage(self.security)
            .manage(self.oauth)
            .manage(self.limiter)
            .manage(self.blacklist)
            .manage(self.store)
    }
}

/// The built-in token key is public; release builds refuse to start with it.
fn check_token_key(tokens: &config::TokenConfig, release: bool) -> Result<(), AppError> {
    if !tokens.uses_dev_key() {
        return Ok(());
    }
    if release {
        return Err(AppError::InvalidConfiguration(
            "tokens.symmetric_key is the built-in development key; set WHOAMI_TOKENS__SYMMETRIC_KEY".to_string(),
        ));
    }
    warn!("using the built-in development token key; set WHOAMI_TOKENS__SYMMETRIC_KEY outside development");
    Ok(())
}

/// Connects the configured store and Postgres and wires every service on top.
pub async fn connect_services(config: &Config) -> Result<AppServices, AppError> {
    check_token_key(&config.tokens, !cfg!(debug_assertions))?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store: Arc<dyn KeyValueStore> = match config.store.backend {
        StoreBackend::Redis => Arc::new(RedisStore::connect(&config.redis).await?),
        StoreBackend::Memory => {
            warn!("using the in-process store; sessions and rate limits are not shared between instances");
            Arc::new(MemoryStore::new(clock.clone()))
        }
    };

    let pool = init_pool(&config.database)
        .await
        .map_err(|e| AppError::db("Failed to initialize database pool", e))?;
    let repo = Arc::new(PostgresRepository::new(pool));

    let tokens = Arc::new(TokenCodec::new(&config.tokens.symmetric_key, clock.clone())?);
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
            users: repo,
            credentials: Arc::new(Argon2Credentials::new()?),
            tokens,
            blacklist: blacklist.clone(),
            sessions: sessions.clone(),
            security: security.clone(),
            oauth: oauth.clone(),
            clock,
        },
        &config.tokens,
    );

    Ok(AppServices {
        auth,
        sessions,
        security,
        oauth,
        limiter,
        blacklist,
        store,
    })
}

fn stage_services(config: Config) -> AdHoc {
    AdHoc::try_on_ignite("Services (store + Postgres)", |rocket| async move {
        match connect_services(&config).await {
            Ok(services) => Ok(services.manage(rocket)),
            Err(e) => {
                error!(error = ?e, "Failed to initialize services");
                Err(rocket)
            }
        }
    })
}

fn base_rocket(config: &Config) -> Rocket<Build> {
    let figment = rocket::Config::figment()
        .merge(("port", config.server.port))
        .merge(("address", config.server.address.clone()));

    let base_path = normalize_base_path(&config.api.base_path);

    let rocket = rocket::custom(figment)
        .manage(config.clone())
        .attach(stage_cors(config.cors.clone()))
        .attach(RequestLogger)
        .attach(RateLimitHeaders);

    mount_api_routes(rocket, &base_path, config.api.enable_swagger).register(
        base_path.as_str(),
        catchers![
            app_routes::error::bad_request,
            app_routes::error::unauthorized,
            app_routes::error::forbidden,
            app_routes::error::not_found,
            app_routes::error::conflict,
            app_routes::error::unprocessable_entity,
            app_routes::error::too_many_requests,
            app_routes::error::internal_error,
        ],
    )
}

/// Production entry: services are connected at ignition and the periodic
/// maintenance sweep starts at liftoff.
pub fn build_rocket(config: Config) -> Rocket<Build> {
    init_tracing(&config.logging.level, config.logging.json_format);

    base_rocket(&config)
        .attach(stage_services(config.clone()))
        .attach(stage_maintenance(config.maintenance.clone()))
}

/// Same surface over services the caller already built.
pub fn build_rocket_with_services(config: Config, services: AppServices) -> Rocket<Build> {
    services.manage(base_rocket(&config))
}
