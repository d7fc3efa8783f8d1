use crate::auth::{BearerToken, CurrentUser};
use crate::error::app_error::AppError;
use crate::error::json::JsonBody;
use crate::middleware::RequestDevice;
use crate::middleware::rate_limit::{AuthRateLimit, RateLimit, RegistrationRateLimit};
use crate::models::token::{AuthResponse, RefreshRequest};
use crate::models::user::{LoginRequest, RegisterRequest, UserResponse};
use crate::service::auth::AuthService;
use rocket::http::Status;
use rocket::response::status::Created;
use rocket::serde::json::Json;
use rocket::{State, get, post};
use rocket_okapi::openapi;
use validator::Validate;

/// Create an account and open its first session
#[openapi(tag = "Authentication")]
#[post("/register", data = "<payload>")]
pub async fn register(
    auth: &State<AuthService>,
    _rate_limit: RegistrationRateLimit,
    device: RequestDevice,
    payload: JsonBody<RegisterRequest>,
) -> Result<Created<Json<AuthResponse>>, AppError> {
    payload.validate()?;
    let response = auth.register(&payload, device.into_inner()).await?;
    Ok(Created::new("/auth/me").body(Json(response)))
}

/// Exchange credentials for an access/refresh token pair
#[openapi(tag = "Authentication")]
#[post("/login", data = "<payload>")]
pub async fn login(
    auth: &State<AuthService>,
    _rate_limit: AuthRateLimit,
    device: RequestDevice,
    payload: JsonBody<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    payload.validate()?;
    Ok(Json(auth.login(&payload, device.into_inner()).await?))
}

/// Rotate the token pair of the session the refresh token belongs to
#[openapi(tag = "Authentication")]
#[post("/refresh", data = "<payload>")]
pub async fn refresh(auth: &State<AuthService>, _rate_limit: AuthRateLimit, payload: JsonBody<RefreshRequest>) -> Result<Json<AuthResponse>, AppError> {
    payload.validate()?;
    Ok(Json(auth.refresh(&payload.refresh_token).await?))
}

/// Revoke the session behind the bearer token. Succeeds if it is already gone.
#[openapi(tag = "Authentication")]
#[post("/logout")]
pub async fn logout(auth: &State<AuthService>, _rate_limit: RateLimit, token: BearerToken) -> Result<Status, AppError> {
    auth.logout(&token.0).await?;
    Ok(Status::NoContent)
}

#[openapi(tag = "Authentication")]
#[get("/me")]
pub async fn me(auth: &State<AuthService>, _rate_limit: RateLimit, current_user: CurrentUser) -> Result<Json<UserResponse>, AppError> {
    Ok(Json(auth.current_user(&current_user.id).await?))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![register, login, refresh, logout, me]
}

#[cfg(test)]
mod tests {
    use crate::test_utils::TestServices;
    use rocket::http::{ContentType, Header, Status};
    use serde_json::{Value, json};

    const BASE: &str = "/api/v1/auth";

    async fn register(client: &rocket::local::asynchronous::Client, email: &str) -> Value {
        let response = client
            .post(format!("{}/register", BASE))
            .header(ContentType::JSON)
            .body(json!({ "name": "User One", "email": email, "password": "correct horse battery" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Created);
        serde_json::from_str(&response.into_string().await.expect("body")).expect("auth json")
    }

    #[rocket::async_test]
    async fn register_login_me_logout() {
        let services = TestServices::new();
        let client = services.client().await;
        register(&client, "u1@example.com").await;

        let response = client
            .post(format!("{}/login", BASE))
            .header(ContentType::JSON)
            .header(Header::new("X-Device-ID", "laptop-7"))
            .body(json!({ "email": "u1@example.com", "password": "correct horse battery" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        assert!(response.headers().get_one("X-RateLimit-Remaining").is_some());
        let auth: Value = serde_json::from_str(&response.into_string().await.expect("body")).expect("auth json");
        let access = auth["access_token"].as_str().expect("access token").to_string();

        let session = services.sessions.get_session(&access).await.expect("session");
        assert_eq!(session.device_info.device_id, "laptop-7");

        let bearer = Header::new("Authorization", format!("Bearer {}", access));
        let me = client.get(format!("{}/me", BASE)).header(bearer.clone()).dispatch().await;
        assert_eq!(me.status(), Status::Ok);
        let me: Value = serde_json::from_str(&me.into_string().await.expect("body")).expect("user json");
        assert_eq!(me["email"], "u1@example.com");

        let logout = client.post(format!("{}/logout", BASE)).header(bearer.clone()).dispatch().await;
        assert_eq!(logout.status(), Status::NoContent);
        let again = client.post(format!("{}/logout", BASE)).header(bearer.clone()).dispatch().await;
        assert_eq!(again.status(), Status::NoContent);

        let after = client.get(format!("{}/me", BASE)).header(bearer).dispatch().await;
        assert_eq!(after.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn me_requires_bearer_scheme() {
        let services = TestServices::new();
        let client = services.client().await;

        let missing = client.get(format!("{}/me", BASE)).dispatch().await;
        assert_eq!(missing.status(), Status::Unauthorized);

        let basic = client
            .get(format!("{}/me", BASE))
            .header(Header::new("Authorization", "Basic dXNlcjpwYXNz"))
            .dispatch()
            .await;
        assert_eq!(basic.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn locked_account_reports_expiry() {
        let services = TestServices::new();
        let client = services.client().await;
        register(&client, "u1@example.com").await;

        for _ in 0..5 {
            let response = client
                .post(format!("{}/login", BASE))
                .header(ContentType::JSON)
                .header(Header::new("X-Forwarded-For", "203.0.113.5"))
                .body(json!({ "email": "u1@example.com", "password": "wrong password" }).to_string())
                .dispatch()
                .await;
            assert_eq!(response.status(), Status::Unauthorized);
        }

        let response = client
            .post(format!("{}/login", BASE))
            .header(ContentType::JSON)
            .header(Header::new("X-Forwarded-For", "203.0.113.5"))
            .body(json!({ "email": "u1@example.com", "password": "correct horse battery" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);
        let body: Value = serde_json::from_str(&response.into_string().await.expect("body")).expect("error json");
        assert!(body["locked_until"].is_string());
    }

    #[rocket::async_test]
    async fn refresh_rotates_pair() {
        let services = TestServices::new();
        let client = services.client().await;
        let auth = register(&client, "u1@example.com").await;

        let response = client
            .post(format!("{}/refresh", BASE))
            .header(ContentType::JSON)
            .body(json!({ "refresh_token": auth["refresh_token"] }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let replay = client
            .post(format!("{}/refresh", BASE))
            .header(ContentType::JSON)
            .body(json!({ "refresh_token": auth["refresh_token"] }).to_string())
            .dispatch()
            .await;
        assert_eq!(replay.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn registration_is_rate_limited_per_ip() {
        let services = TestServices::new();
        let client = services.client().await;

        for i in 0..3 {
            register(&client, &format!("user{}@example.com", i)).await;
        }

        let response = client
            .post(format!("{}/register", BASE))
            .header(ContentType::JSON)
            .body(json!({ "name": "Four", "email": "user4@example.com", "password": "correct horse battery" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::TooManyRequests);
        assert!(response.headers().get_one("Retry-After").is_some());
    }
}
