use crate::auth::AdminAuth;
use crate::cron_tasks::run_maintenance;
use crate::error::app_error::AppError;
use crate::error::json::JsonBody;
use crate::models::lockout::{AccountLockout, CreateLockoutRequest};
use crate::models::maintenance::CleanupReport;
use crate::models::rate_limit::{RateLimitResetRequest, RateLimitResetResponse, RateLimitResetScope};
use crate::models::token::{UnblacklistRequest, UserBlacklistStatus};
use crate::service::blacklist::TokenBlacklist;
use crate::service::rate_limiter::RateLimiter;
use crate::service::security::SecurityService;
use crate::service::session::SessionService;
use rocket::http::Status;
use rocket::response::status::Created;
use rocket::serde::json::Json;
use rocket::{State, get, post};
use rocket_okapi::openapi;
use tracing::warn;
use uuid::Uuid;
use validator::Validate;

/// Drop rate-limit windows, for all clients or one IP or one user
#[openapi(tag = "Admin")]
#[post("/rate-limits/reset", data = "<payload>")]
pub async fn reset_rate_limits(limiter: &State<RateLimiter>, _admin: AdminAuth, payload: JsonBody<RateLimitResetRequest>) -> Result<Json<RateLimitResetResponse>, AppError> {
    payload.validate()?;

    let deleted_keys = match (payload.scope, &payload.ip_address, &payload.user_id) {
        (RateLimitResetScope::All, _, _) => limiter.reset_all().await?,
        (RateLimitResetScope::Ip, Some(ip), _) => limiter.reset_by_ip(ip).await?,
        (RateLimitResetScope::User, _, Some(user_id)) => limiter.reset_by_user(user_id).await?,
        _ => return Err(AppError::BadRequest("Reset target missing".to_string())),
    };

    Ok(Json(RateLimitResetResponse { deleted_keys }))
}

#[openapi(tag = "Admin")]
#[post("/lockouts", data = "<payload>")]
pub async fn create_lockout(security: &State<SecurityService>, _admin: AdminAuth, payload: JsonBody<CreateLockoutRequest>) -> Result<Created<Json<AccountLockout>>, AppError> {
    payload.validate()?;
    let lockout = security.create_lockout(&payload).await?;
    Ok(Created::new(format!("/admin/lockouts/{}", lockout.id)).body(Json(lockout)))
}

/// Run the reconciliation sweep now instead of waiting for the next interval
#[openapi(tag = "Admin")]
#[post("/maintenance/cleanup")]
pub async fn cleanup(sessions: &State<SessionService>, security: &State<SecurityService>, _admin: AdminAuth) -> Result<Json<CleanupReport>, AppError> {
    Ok(Json(run_maintenance(sessions, security).await?))
}

/// Lift the blacklist entry of a single token
#[openapi(tag = "Admin")]
#[post("/blacklist/remove", data = "<payload>")]
pub async fn remove_from_blacklist(blacklist: &State<TokenBlacklist>, _admin: AdminAuth, payload: JsonBody<UnblacklistRequest>) -> Result<Status, AppError> {
    payload.validate()?;

    if !blacklist.remove_from_blacklist(&payload.token).await? {
        return Err(AppError::NotFound("Token is not blacklisted".to_string()));
    }

    warn!(category = "audit", event_type = "token_unblacklisted", "token removed from blacklist");
    Ok(Status::NoContent)
}

#[openapi(tag = "Admin")]
#[get("/users/<user_id>/blacklist-status")]
pub async fn user_blacklist_status(blacklist: &State<TokenBlacklist>, _admin: AdminAuth, user_id: String) -> Result<Json<UserBlacklistStatus>, AppError> {
    let user_id = Uuid::parse_str(&user_id)?;
    let reason = blacklist.user_marker(&user_id).await?;
    Ok(Json(UserBlacklistStatus { user_id, reason }))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![reset_rate_limits, create_lockout, cleanup, remove_from_blacklist, user_blacklist_status]
}
