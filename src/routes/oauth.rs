use crate::error::app_error::AppError;
use crate::error::json::JsonBody;
use crate::middleware::rate_limit::{AuthRateLimit, RateLimit};
use crate::models::oauth::{OAuthExchangeRequest, OAuthStateResponse};
use crate::models::token::AuthResponse;
use crate::service::auth::AuthService;
use crate::service::oauth_temp::OAuthTempStore;
use rocket::serde::json::Json;
use rocket::{State, get, post};
use rocket_okapi::openapi;
use validator::Validate;

fn validate_provider(provider: &str) -> Result<(), AppError> {
    let valid = !provider.is_empty() && provider.len() <= 32 && provider.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AppError::BadRequest("Invalid OAuth provider".to_string()))
    }
}

/// Issue a one-time CSRF state to carry through the provider redirect
#[openapi(tag = "OAuth")]
#[get("/state?<provider>")]
pub async fn issue_state(oauth: &State<OAuthTempStore>, _rate_limit: RateLimit, provider: String) -> Result<Json<OAuthStateResponse>, AppError> {
    validate_provider(&provider)?;
    let state = oauth.issue_state(&provider.to_ascii_lowercase()).await?;
    Ok(Json(OAuthStateResponse {
        state: state.state,
        expires_in: oauth.state_ttl().as_secs(),
    }))
}

/// Trade the one-time token from the callback redirect for the session's token pair
#[openapi(tag = "OAuth")]
#[post("/exchange", data = "<payload>")]
pub async fn exchange(auth: &State<AuthService>, _rate_limit: AuthRateLimit, payload: JsonBody<OAuthExchangeRequest>) -> Result<Json<AuthResponse>, AppError> {
    payload.validate()?;
    Ok(Json(auth.exchange_oauth_token(&payload.temp_token).await?))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![issue_state, exchange]
}
