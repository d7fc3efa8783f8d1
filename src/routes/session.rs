use crate::auth::CurrentUser;
use crate::error::app_error::AppError;
use crate::middleware::rate_limit::RateLimit;
use crate::models::session::{RevokeAllResponse, SessionResponse};
use crate::service::session::SessionService;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, delete, get, post};
use rocket_okapi::openapi;
use tracing::info;

/// List the caller's live sessions, most recently active first
#[openapi(tag = "Sessions")]
#[get("/")]
pub async fn list_sessions(sessions: &State<SessionService>, _rate_limit: RateLimit, current_user: CurrentUser) -> Result<Json<Vec<SessionResponse>>, AppError> {
    let list = sessions.get_user_sessions(&current_user.id).await?;
    Ok(Json(
        list.iter()
            .map(|session| SessionResponse::from_session(session, &current_user.session_id))
            .collect(),
    ))
}

/// Revoke one of the caller's sessions. Other users' sessions look absent.
#[openapi(tag = "Sessions")]
#[delete("/<id>")]
pub async fn revoke_session(sessions: &State<SessionService>, _rate_limit: RateLimit, current_user: CurrentUser, id: &str) -> Result<Status, AppError> {
    let session = match sessions.get_session_by_id(id).await {
        Ok(session) if session.user_id == current_user.id => session,
        Ok(_) | Err(AppError::SessionNotFound) => return Err(AppError::NotFound(format!("Session {} not found", id))),
        Err(e) => return Err(e),
    };

    sessions.revoke_session(&session.id).await?;
    Ok(Status::NoContent)
}

/// Sign out everywhere, including the calling session
#[openapi(tag = "Sessions")]
#[post("/revoke-all")]
pub async fn revoke_all_sessions(sessions: &State<SessionService>, _rate_limit: RateLimit, current_user: CurrentUser) -> Result<Json<RevokeAllResponse>, AppError> {
    let revoked = sessions.revoke_all_user_sessions(&current_user.id, "user_revoked_all").await?;
    info!(category = "audit", event_type = "sessions_revoked", user_id = %current_user.id, revoked = revoked, "security audit event");
    Ok(Json(RevokeAllResponse { revoked }))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![list_sessions, revoke_session, revoke_all_sessions]
}

#[cfg(test)]
mod tests {
    use crate::models::user::RegisterRequest;
    use crate::test_utils::{TestServices, sample_device};
    use rocket::http::{Header, Status};
    use serde_json::Value;

    fn bearer(token: &str) -> Header<'static> {
        Header::new("Authorization", format!("Bearer {}", token))
    }

    async fn signed_up(services: &TestServices, email: &str) -> String {
        let request = RegisterRequest {
            name: "User".to_string(),
            email: email.to_string(),
            password: "correct horse battery".to_string(),
        };
        services.auth.register(&request, sample_device()).await.expect("register").access_token
    }

    #[rocket::async_test]
    async fn lists_sessions_and_marks_current() {
        let services = TestServices::new();
        let client = services.client().await;
        let first = signed_up(&services, "u1@example.com").await;
        let login = services
            .auth
            .login(
                &crate::models::user::LoginRequest {
                    email: "u1@example.com".to_string(),
                    password: "correct horse battery".to_string(),
                },
                sample_device(),
            )
            .await
            .expect("login");

        let response = client.get("/api/v1/sessions").header(bearer(&first)).dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = serde_json::from_str(&response.into_string().await.expect("body")).expect("json");
        let sessions = body.as_array().expect("array");
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions.iter().filter(|s| s["is_current"] == true).count(), 1);
        assert!(sessions.iter().all(|s| s.get("access_token").is_none()));

        let other = sessions
            .iter()
            .find(|s| s["id"] == login.session_id.as_str())
            .expect("second session listed");
        assert_eq!(other["is_current"], false);
    }

    #[rocket::async_test]
    async fn cannot_revoke_someone_elses_session() {
        let services = TestServices::new();
        let client = services.client().await;
        let mine = signed_up(&services, "u1@example.com").await;
        let theirs = signed_up(&services, "u2@example.com").await;
        let their_session = services.sessions.get_session(&theirs).await.expect("session");

        let response = client
            .delete(format!("/api/v1/sessions/{}", their_session.id))
            .header(bearer(&mine))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NotFound);
        assert!(services.sessions.get_session_by_id(&their_session.id).await.is_ok());

        let own = client
            .delete(format!("/api/v1/sessions/{}", their_session.id))
            .header(bearer(&theirs))
            .dispatch()
            .await;
        assert_eq!(own.status(), Status::NoContent);
        assert!(services.sessions.get_session_by_id(&their_session.id).await.is_err());
    }

    #[rocket::async_test]
    async fn revoke_all_signs_out_the_caller_too() {
        let services = TestServices::new();
        let client = services.client().await;
        let token = signed_up(&services, "u1@example.com").await;

        let response = client.post("/api/v1/sessions/revoke-all").header(bearer(&token)).dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = serde_json::from_str(&response.into_string().await.expect("body")).expect("json");
        assert_eq!(body["revoked"], 1);

        let after = client.get("/api/v1/sessions").header(bearer(&token)).dispatch().await;
        assert_eq!(after.status(), Status::Unauthorized);
    }
}
