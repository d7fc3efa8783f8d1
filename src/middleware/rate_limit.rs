use crate::auth::bearer_token;
use crate::config::{Config, RateLimitPolicy};
use crate::middleware::{RequestId, resolve_client_ip};
use crate::models::rate_limit::RateLimitInfo;
use crate::service::auth::AuthService;
use crate::service::rate_limiter::RateLimiter;
use crate::store::keys;
use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::{Header, Status};
use rocket::request::{FromRequest, Outcome, Request};
use rocket::Response;
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::{RefOr, Response as OpenApiResponse, Responses};
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use tracing::warn;

/// Which configured policy a guard enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PolicyClass {
    Default,
    Auth,
    Registration,
}

impl PolicyClass {
    fn policy(self, config: &Config) -> RateLimitPolicy {
        match self {
            PolicyClass::Default => config.rate_limit.default,
            PolicyClass::Auth => config.rate_limit.auth,
            PolicyClass::Registration => config.rate_limit.registration,
        }
    }

    /// Only the default class follows an authenticated user across addresses;
    /// the stricter classes guard anonymous endpoints and key on the IP.
    fn prefers_user(self) -> bool {
        self == PolicyClass::Default
    }
}

/// General API limit, per user when a valid bearer token is present, else per IP.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RateLimit;

/// Login, refresh and OAuth exchange.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AuthRateLimit;

#[derive(Debug, Clone, Copy)]
pub(crate) struct RegistrationRateLimit;

#[derive(Debug, Clone, Copy)]
pub(crate) struct RateLimitRetryAfter(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RateLimitError {
    TooManyRequests,
}

async fn rate_limit_request(request: &Request<'_>, class: PolicyClass) -> Outcome<(), RateLimitError> {
    let (Some(config), Some(limiter)) = (request.rocket().state::<Config>(), request.rocket().state::<RateLimiter>()) else {
        return Outcome::Success(());
    };
    if !config.rate_limit.enabled {
        return Outcome::Success(());
    }

    let route = route_template(request);
    let user_id = if class.prefers_user() { authenticated_user(request) } else { None };
    let key = match user_id {
        Some(user_id) => keys::rate_limit_by_user(&user_id, &route),
        None => {
            let ip = resolve_client_ip(request.headers(), request.remote().map(|addr| addr.ip())).unwrap_or_else(|| "unknown".to_string());
            keys::rate_limit_by_ip(&route, &ip)
        }
    };

    // Store outage: the request proceeds ungated.
    let Some(decision) = limiter.check_fail_open(&key, class.policy(config)).await else {
        return Outcome::Success(());
    };

    request.local_cache(|| Some(decision.info));

    if decision.allowed {
        return Outcome::Success(());
    }

    let retry_after = decision.info.retry_after.unwrap_or(1);
    request.local_cache(|| Some(RateLimitRetryAfter(retry_after)));

    let request_id = request
        .local_cache(|| None::<RequestId>)
        .as_ref()
        .map(|r| r.0.as_str())
        .unwrap_or("unknown");
    warn!(
        request_id = %request_id,
        method = %request.method(),
        uri = %request.uri(),
        key = %key,
        retry_after_secs = %retry_after,
        "rate limit exceeded"
    );
    Outcome::Error((Status::TooManyRequests, RateLimitError::TooManyRequests))
}

/// The matched route's URI template, so `/sessions/<id>` shares one window
/// whatever id is requested. Falls back to the raw path outside routing.
fn route_template(request: &Request<'_>) -> String {
    request
        .route()
        .map(|route| route.uri.to_string())
        .unwrap_or_else(|| request.uri().path().to_string())
}

/// Subject of a structurally valid bearer token. Only used to pick the
/// rate-limit key, so the blacklist and session are not consulted.
fn authenticated_user(request: &Request<'_>) -> Option<String> {
    let auth = request.rocket().state::<AuthService>()?;
    let token = bearer_token(request.headers().get_one("Authorization")?)?;
    auth.token_subject(token).map(|id| id.to_string())
}

macro_rules! rate_limit_guard {
    ($guard:ident, $class:expr) => {
        #[rocket::async_trait]
        impl<'r> FromRequest<'r> for $guard {
            type Error = RateLimitError;

            async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
                match rate_limit_request(request, $class).await {
                    Outcome::Success(_) => Outcome::Success($guard),
                    Outcome::Error(error) => Outcome::Error(error),
                    Outcome::Forward(status) => Outcome::Forward(status),
                }
            }
        }

        impl<'a> OpenApiFromRequest<'a> for $guard {
            fn from_request_input(_gen: &mut OpenApiGenerator, _name: String, _required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
                Ok(RequestHeaderInput::None)
            }

            fn get_responses(_gen: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
                too_many_requests_response()
            }
        }
    };
}

rate_limit_guard!(RateLimit, PolicyClass::Default);
rate_limit_guard!(AuthRateLimit, PolicyClass::Auth);
rate_limit_guard!(RegistrationRateLimit, PolicyClass::Registration);

fn too_many_requests_response() -> rocket_okapi::Result<Responses> {
    let mut responses = Responses::default();
    responses.responses.insert(
        "429".to_string(),
        RefOr::Object(OpenApiResponse {
            description: "Too Many Requests".to_string(),
            ..Default::default()
        }),
    );
    Ok(responses)
}

/// Copies the limiter's advisory numbers onto every gated response.
pub struct RateLimitHeaders;

#[rocket::async_trait]
impl Fairing for RateLimitHeaders {
    fn info(&self) -> Info {
        Info {
            name: "Rate Limit Headers",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let Some(info) = request.local_cache(|| None::<RateLimitInfo>) else {
            return;
        };

        response.set_header(Header::new("X-RateLimit-Limit", info.limit.to_string()));
        response.set_header(Header::new("X-RateLimit-Remaining", info.remaining.to_string()));
        response.set_header(Header::new("X-RateLimit-Reset", info.reset_at.to_string()));
        if let Some(retry_after) = info.retry_after {
            response.set_header(Header::new("Retry-After", retry_after.to_string()));
        }
    }
}
