use axum::{
    extract::{Path, Query, State},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    entities::order::PaymentMethod,
    errors::ServiceError,
    services::{orders::OrderResponse, payments::PaymentOutcome},
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmPaymentBody {
    pub method: PaymentMethod,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct GatewayReturnQuery {
    pub transaction_uuid: Uuid,
    /// "success" or "failure", as carried by the configured return URLs.
    pub status: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/payment",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = ConfirmPaymentBody,
    responses(
        (status = 200, description = "Payment settled (JSON) or gateway redirect form (HTML)"),
        (status = 422, description = "Stock ran out; the order was invalidated"),
    ),
    security(("bearer_auth" = [])),
    tag = "payments"
)]
#[instrument(skip(state, body), fields(order_id = %order_id, buyer_id = %user.user_id))]
pub async fn confirm_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
    Json(body): Json<ConfirmPaymentBody>,
) -> Result<Response, ServiceError> {
    let outcome = state
        .services
        .payments
        .confirm(order_id, user.user_id, body.method)
        .await?;

    Ok(match outcome {
        PaymentOutcome::Completed(order) => Json(ApiResponse::ok(order)).into_response(),
        PaymentOutcome::Redirect(directive) => Html(directive.html).into_response(),
    })
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/return",
    params(GatewayReturnQuery),
    responses(
        (status = 200, description = "Gateway attempt settled", body = OrderResponse),
        (status = 404, description = "Unknown transaction"),
    ),
    tag = "payments"
)]
#[instrument(skip(state), fields(transaction_uuid = %query.transaction_uuid))]
pub async fn gateway_return(
    State(state): State<AppState>,
    Query(query): Query<GatewayReturnQuery>,
) -> ApiResult<OrderResponse> {
    let success = query.status == "success";
    let order = state
        .services
        .payments
        .finalize_gateway_return(query.transaction_uuid, success)
        .await?;

    let message = if success {
        "payment=success"
    } else {
        "payment=failure"
    };
    Ok(Json(ApiResponse::ok_with_message(order, message)))
}
