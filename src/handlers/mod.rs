pub mod delivery;
pub mod orders;
pub mod payments;

use axum::{extract::State, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{ApiResponse, AppState};

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub environment: String,
}

/// Liveness probe; checks the database is reachable.
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<&'static str, crate::errors::ServiceError> {
    state.db.ping().await?;
    Ok("OK")
}

#[utoipa::path(
    get,
    path = "/api/v1/status",
    responses((status = 200, description = "Service status", body = StatusResponse)),
    tag = "status"
)]
pub async fn api_status(State(state): State<AppState>) -> Json<ApiResponse<StatusResponse>> {
    Json(ApiResponse::ok(StatusResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.environment.clone(),
    }))
}
