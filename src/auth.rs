use crate::config::Config;
use crate::error::app_error::AppError;
use crate::service::auth::AuthService;
use rocket::http::Status;
use rocket::outcome::Outcome;
use rocket::request::{FromRequest, Outcome as RequestOutcome, Request};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::{Object, Responses, SecurityRequirement, SecurityScheme, SecuritySchemeData};
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use serde::Serialize;
use uuid::Uuid;

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

#[derive(Debug, Clone, Serialize)]
pub struct CurrentUser {
    pub id: Uuid,
    pub session_id: String,
    #[serde(skip)]
    pub access_token: String,
}

/// Token part of an `Authorization: Bearer <token>` value. The scheme is
/// matched case-insensitively; anything else is rejected outright.
pub(crate) fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() && !token.contains(' ')).then_some(token)
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for CurrentUser {
    type Error = AppError;

    async fn from_request(req: &'r Request<'_>) -> RequestOutcome<Self, Self::Error> {
        let Some(token) = req.headers().get_one("Authorization").and_then(bearer_token) else {
            return Outcome::Error((Status::Unauthorized, AppError::Unauthorized));
        };

        let auth = match req.rocket().state::<AuthService>() {
            Some(auth) => auth,
            None => return Outcome::Error((Status::InternalServerError, AppError::Unauthorized)),
        };

        match auth.authenticate(token).await {
            Ok(authenticated) => {
                let current_user = CurrentUser {
                    id: authenticated.user_id,
                    session_id: authenticated.session_id,
                    access_token: token.to_string(),
                };
                req.local_cache(|| Some(current_user.clone()));
                Outcome::Success(current_user)
            }
            Err(err) => Outcome::Error((Status::from(&err), err)),
        }
    }
}

impl<'a> OpenApiFromRequest<'a> for CurrentUser {
    fn from_request_input(_gen: &mut OpenApiGenerator, _name: String, _required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
        let security_scheme = SecurityScheme {
            description: Some("Bearer token. Log in via POST /auth/login to obtain an access token.".to_string()),
            data: SecuritySchemeData::Http {
                scheme: "bearer".to_string(),
                bearer_format: Some("PASETO".to_string()),
            },
            extensions: Object::default(),
        };

        let mut security_req = SecurityRequirement::new();
        security_req.insert("bearerAuth".to_string(), Vec::new());

        Ok(RequestHeaderInput::Security("bearerAuth".to_string(), security_scheme, security_req))
    }

    fn get_responses(_gen: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        use rocket_okapi::okapi::openapi3::{RefOr, Response};
        let mut responses = Responses::default();
        responses.responses.insert(
            "401".to_string(),
            RefOr::Object(Response {
                description: "Unauthorized - Authentication required".to_string(),
                ..Default::default()
            }),
        );
        Ok(responses)
    }
}

/// Raw bearer token, not checked against the store. Logout takes this so a
/// token whose session is already gone still logs out cleanly.
pub struct BearerToken(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for BearerToken {
    type Error = AppError;

    async fn from_request(req: &'r Request<'_>) -> RequestOutcome<Self, Self::Error> {
        match req.headers().get_one("Authorization").and_then(bearer_token) {
            Some(token) => Outcome::Success(BearerToken(token.to_string())),
            None => Outcome::Error((Status::Unauthorized, AppError::Unauthorized)),
        }
    }
}

impl<'a> OpenApiFromRequest<'a> for BearerToken {
    fn from_request_input(r#gen: &mut OpenApiGenerator, name: String, required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
        CurrentUser::from_request_input(r#gen, name, required)
    }

    fn get_responses(r#gen: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        CurrentUser::get_responses(r#gen)
    }
}

/// Operator access for rate-limit resets, manual lockouts and maintenance.
pub(crate) struct AdminAuth;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminAuth {
    type Error = AppError;

    async fn from_request(req: &'r Request<'_>) -> RequestOutcome<Self, Self::Error> {
        let config = match req.rocket().state::<Config>() {
            Some(config) => config,
            None => return Outcome::Error((Status::InternalServerError, AppError::Unauthorized)),
        };

        if config.admin.auth_token.is_empty() {
            return Outcome::Error((Status::Forbidden, AppError::Forbidden));
        }

        match req.headers().get_one(ADMIN_TOKEN_HEADER) {
            Some(token) if token == config.admin.auth_token => Outcome::Success(AdminAuth),
            _ => Outcome::Error((Status::Forbidden, AppError::Forbidden)),
        }
    }
}

impl<'a> OpenApiFromRequest<'a> for AdminAuth {
    fn from_request_input(_gen: &mut OpenApiGenerator, _name: String, _required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
        let security_scheme = SecurityScheme {
            description: Some("Operator token.".to_string()),
            data: SecuritySchemeData::ApiKey {
                name: ADMIN_TOKEN_HEADER.to_string(),
                location: "header".to_string(),
            },
            extensions: Object::default(),
        };

        let mut security_req = SecurityRequirement::new();
        security_req.insert("adminToken".to_string(), Vec::new());

        Ok(RequestHeaderInput::Security("adminToken".to_string(), security_scheme, security_req))
    }
}

#[cfg(test)]
mod tests {
    use super::bearer_token;

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert_eq!(bearer_token("Bearer v4.local.abc"), Some("v4.local.abc"));
        assert_eq!(bearer_token("bearer v4.local.abc"), Some("v4.local.abc"));
        assert_eq!(bearer_token("BEARER   v4.local.abc "), Some("v4.local.abc"));
    }

    #[test]
    fn other_schemes_are_rejected() {
        assert_eq!(bearer_token("Basic dXNlcjpwYXNz"), None);
        assert_eq!(bearer_token("v4.local.abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Bearer a b"), None);
    }
}
