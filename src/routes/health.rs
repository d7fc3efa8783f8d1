use crate::models::health::HealthResponse;
use crate::store::KeyValueStore;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::{State, get};
use rocket_okapi::openapi;
use std::sync::Arc;
use tracing::warn;

const PROBE_KEY: &str = "health:probe";

/// Liveness plus a round trip to the session store. Postgres is staged at
/// ignition, so a running instance already has a pool.
#[openapi(tag = "Health")]
#[get("/")]
pub async fn healthcheck(store: &State<Arc<dyn KeyValueStore>>) -> Custom<Json<HealthResponse>> {
    match store.exists(PROBE_KEY).await {
        Ok(_) => Custom(Status::Ok, Json(HealthResponse { status: "ok", store: "ok" })),
        Err(e) => {
            warn!(error = %e, "health probe could not reach the store");
            Custom(
                Status::ServiceUnavailable,
                Json(HealthResponse {
                    status: "degraded",
                    store: "unavailable",
                }),
            )
        }
    }
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![healthcheck]
}
