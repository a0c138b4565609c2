use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::OptionalAuthUser,
    errors::ServiceError,
    services::delivery_confirmation::{ConfirmationResult, ConfirmationView, Requester},
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct TokenQuery {
    /// Single-use link token from the delivery notification.
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReportBody {
    pub description: String,
}

/// Picks the credential for a confirmation request. A logged-in session
/// wins over a link token; a request carrying neither is rejected before
/// the order is even looked at.
fn requester(user: OptionalAuthUser, token: Option<String>) -> Result<Requester, ServiceError> {
    match (user.0, token) {
        (Some(user), _) => Ok(Requester::Session {
            user_id: user.user_id,
        }),
        (None, Some(token)) if !token.is_empty() => Ok(Requester::Token { token }),
        _ => Err(ServiceError::Unauthorized(
            "A session or confirmation token is required".to_string(),
        )),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/confirmation",
    params(("id" = Uuid, Path, description = "Order id"), TokenQuery),
    responses(
        (status = 200, description = "Confirmation page state", body = ConfirmationView),
        (status = 401, description = "No usable credential"),
    ),
    tag = "delivery"
)]
#[instrument(skip(state, user, query), fields(order_id = %order_id))]
pub async fn confirmation_page(
    State(state): State<AppState>,
    user: OptionalAuthUser,
    Path(order_id): Path<Uuid>,
    Query(query): Query<TokenQuery>,
) -> ApiResult<ConfirmationView> {
    let requester = requester(user, query.token)?;
    let view = state
        .services
        .confirmation
        .view(order_id, requester)
        .await?;
    Ok(Json(ApiResponse::ok(view)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/confirmation",
    params(("id" = Uuid, Path, description = "Order id"), TokenQuery),
    responses(
        (status = 200, description = "Confirmation outcome", body = ConfirmationResult),
        (status = 401, description = "No usable credential"),
    ),
    tag = "delivery"
)]
#[instrument(skip(state, user, query), fields(order_id = %order_id))]
pub async fn confirm_delivery(
    State(state): State<AppState>,
    user: OptionalAuthUser,
    Path(order_id): Path<Uuid>,
    Query(query): Query<TokenQuery>,
) -> ApiResult<ConfirmationResult> {
    let requester = requester(user, query.token)?;
    let result = state
        .services
        .confirmation
        .confirm(order_id, requester)
        .await?;
    Ok(Json(ApiResponse::ok(result)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/report",
    params(("id" = Uuid, Path, description = "Order id"), TokenQuery),
    request_body = ReportBody,
    responses(
        (status = 200, description = "Report outcome", body = ConfirmationResult),
        (status = 401, description = "No usable credential"),
    ),
    tag = "delivery"
)]
#[instrument(skip(state, user, query, body), fields(order_id = %order_id))]
pub async fn report_not_delivered(
    State(state): State<AppState>,
    user: OptionalAuthUser,
    Path(order_id): Path<Uuid>,
    Query(query): Query<TokenQuery>,
    Json(body): Json<ReportBody>,
) -> ApiResult<ConfirmationResult> {
    let requester = requester(user, query.token)?;
    let result = state
        .services
        .confirmation
        .report_not_delivered(order_id, requester, body.description)
        .await?;
    Ok(Json(ApiResponse::ok(result)))
}
