use rocket::serde::Serialize;
use schemars::JsonSchema;

#[derive(Serialize, JsonSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: &'static str,
}
