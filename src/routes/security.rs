use crate::auth::CurrentUser;
use crate::error::app_error::AppError;
use crate::middleware::rate_limit::RateLimit;
use crate::models::suspicious_activity::SuspiciousActivity;
use crate::service::security::SecurityService;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, get, post};
use rocket_okapi::openapi;
use uuid::Uuid;

/// Recent security events on the caller's account, newest first
#[openapi(tag = "Security")]
#[get("/activities")]
pub async fn list_activities(security: &State<SecurityService>, _rate_limit: RateLimit, current_user: CurrentUser) -> Result<Json<Vec<SuspiciousActivity>>, AppError> {
    Ok(Json(security.get_suspicious_activities(&current_user.id).await?))
}

/// Acknowledge one of the caller's activities
#[openapi(tag = "Security")]
#[post("/activities/<id>/resolve")]
pub async fn resolve_activity(security: &State<SecurityService>, _rate_limit: RateLimit, current_user: CurrentUser, id: String) -> Result<Status, AppError> {
    let uuid = Uuid::parse_str(&id)?;
    security.resolve_activity(&uuid, Some(&current_user.id)).await?;
    Ok(Status::NoContent)
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![list_activities, resolve_activity]
}

#[cfg(test)]
mod tests {
    use crate::models::user::{LoginRequest, RegisterRequest};
    use crate::test_utils::{TestServices, sample_device};
    use rocket::http::{Header, Status};
    use serde_json::Value;

    #[rocket::async_test]
    async fn failed_logins_show_up_and_can_be_resolved() {
        let services = TestServices::new();
        let client = services.client().await;
        let auth = services
            .auth
            .register(
                &RegisterRequest {
                    name: "User".to_string(),
                    email: "u1@example.com".to_string(),
                    password: "correct horse battery".to_string(),
                },
                sample_device(),
            )
            .await
            .expect("register");
        let wrong = LoginRequest {
            email: "u1@example.com".to_string(),
            password: "nope nope nope".to_string(),
        };
        assert!(services.auth.login(&wrong, sample_device()).await.is_err());

        let bearer = Header::new("Authorization", format!("Bearer {}", auth.access_token));
        let response = client.get("/api/v1/security/activities").header(bearer.clone()).dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = serde_json::from_str(&response.into_string().await.expect("body")).expect("json");
        let activity = body
            .as_array()
            .expect("array")
            .iter()
            .find(|a| a["activity_type"] == "failed_login")
            .expect("failed login recorded")
            .clone();
        assert_eq!(activity["resolved"], false);

        let id = activity["id"].as_str().expect("id");
        let resolved = client
            .post(format!("/api/v1/security/activities/{}/resolve", id))
            .header(bearer.clone())
            .dispatch()
            .await;
        assert_eq!(resolved.status(), Status::NoContent);

        let activities = services.repo.activities().await;
        assert!(activities.iter().any(|a| a.id.to_string() == id && a.resolved));
    }

    #[rocket::async_test]
    async fn resolve_rejects_malformed_and_unknown_ids() {
        let services = TestServices::new();
        let client = services.client().await;
        let auth = services
            .auth
            .register(
                &RegisterRequest {
                    name: "User".to_string(),
                    email: "u1@example.com".to_string(),
                    password: "correct horse battery".to_string(),
                },
                sample_device(),
            )
            .await
            .expect("register");
        let bearer = Header::new("Authorization", format!("Bearer {}", auth.access_token));

        let malformed = client.post("/api/v1/security/activities/not-a-uuid/resolve").header(bearer.clone()).dispatch().await;
        assert_eq!(malformed.status(), Status::BadRequest);

        let unknown = client
            .post(format!("/api/v1/security/activities/{}/resolve", uuid::Uuid::new_v4()))
            .header(bearer)
            .dispatch()
            .await;
        assert_eq!(unknown.status(), Status::NotFound);
    }
}
