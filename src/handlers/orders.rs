use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    entities::order::CancelledBy,
    errors::ServiceError,
    services::orders::{CreateOrderRequest, OrderListResponse, OrderResponse},
    ApiResponse, ApiResult, AppState, ListQuery,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CancelOrderBody {
    pub reason: Option<String>,
    pub description: Option<String>,
}

/// Loads an order the caller is allowed to see. Orders belonging to other
/// accounts answer 404, not 403, so their existence is not disclosed.
async fn load_authorized(
    state: &AppState,
    order_id: Uuid,
    user_id: Uuid,
) -> Result<OrderResponse, ServiceError> {
    let order = state
        .services
        .orders
        .get_order(order_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
    if order.buyer_id != user_id && order.seller_id != user_id {
        return Err(ServiceError::NotFound(format!(
            "Order {} not found",
            order_id
        )));
    }
    Ok(order)
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 200, description = "Order created or updated", body = OrderResponse),
        (status = 422, description = "Requested quantity exceeds stock"),
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
#[instrument(skip(state, body), fields(buyer_id = %user.user_id))]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateOrderRequest>,
) -> ApiResult<OrderResponse> {
    let order = state
        .services
        .orders
        .create_or_update(user.user_id, body)
        .await?;
    Ok(Json(ApiResponse::ok(order)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(ListQuery),
    responses((status = 200, description = "The caller's orders", body = OrderListResponse)),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<OrderListResponse> {
    let list = state
        .services
        .orders
        .list_orders(user.user_id, query.page(), query.per_page())
        .await?;
    Ok(Json(ApiResponse::ok(list)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order detail", body = OrderResponse),
        (status = 404, description = "Order not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> ApiResult<OrderResponse> {
    let order = load_authorized(&state, order_id, user.user_id).await?;
    Ok(Json(ApiResponse::ok(order)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/by-number/{order_number}",
    params(("order_number" = String, Path, description = "Human-readable order number")),
    responses(
        (status = 200, description = "Order detail", body = OrderResponse),
        (status = 404, description = "Order not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn get_order_by_number(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_number): Path<String>,
) -> ApiResult<OrderResponse> {
    let order = state
        .services
        .orders
        .get_by_order_number(&order_number)
        .await?
        .filter(|order| order.buyer_id == user.user_id || order.seller_id == user.user_id)
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_number)))?;
    Ok(Json(ApiResponse::ok(order)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = CancelOrderBody,
    responses(
        (status = 200, description = "Order cancelled", body = OrderResponse),
        (status = 409, description = "Order is past the cancellation window"),
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
#[instrument(skip(state, body), fields(order_id = %order_id, user_id = %user.user_id))]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
    Json(body): Json<CancelOrderBody>,
) -> ApiResult<OrderResponse> {
    let order = load_authorized(&state, order_id, user.user_id).await?;
    let cancelled_by = if order.buyer_id == user.user_id {
        CancelledBy::Buyer
    } else {
        CancelledBy::Seller
    };

    let cancelled = state
        .services
        .orders
        .cancel(order_id, cancelled_by, body.reason, body.description)
        .await?;
    Ok(Json(ApiResponse::ok(cancelled)))
}

/// Seller-only transition guard.
fn require_seller(order: &OrderResponse, user_id: Uuid) -> Result<(), ServiceError> {
    if order.seller_id != user_id {
        return Err(ServiceError::NotFound(format!(
            "Order {} not found",
            order.id
        )));
    }
    Ok(())
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/ship",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order shipped", body = OrderResponse),
        (status = 409, description = "Order is not in processing"),
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn ship_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> ApiResult<OrderResponse> {
    let order = load_authorized(&state, order_id, user.user_id).await?;
    require_seller(&order, user.user_id)?;
    let shipped = state.services.orders.mark_shipped(order_id).await?;
    Ok(Json(ApiResponse::ok(shipped)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/delivered",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Delivery recorded; confirmation requested", body = OrderResponse),
        (status = 409, description = "Order is not in shipped"),
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn mark_delivered(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> ApiResult<OrderResponse> {
    let order = load_authorized(&state, order_id, user.user_id).await?;
    require_seller(&order, user.user_id)?;
    let delivered = state.services.orders.mark_delivered(order_id).await?;
    Ok(Json(ApiResponse::ok(delivered)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/redeliver",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Dispute cleared; order back in processing", body = OrderResponse),
        (status = 400, description = "No open delivery report"),
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn redeliver_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> ApiResult<OrderResponse> {
    let order = load_authorized(&state, order_id, user.user_id).await?;
    require_seller(&order, user.user_id)?;
    let redelivered = state.services.orders.redeliver(order_id).await?;
    Ok(Json(ApiResponse::ok(redelivered)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/resend-confirmation",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Confirmation link re-issued"),
        (status = 409, description = "A delivery report is open"),
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn resend_confirmation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> ApiResult<()> {
    let order = load_authorized(&state, order_id, user.user_id).await?;
    require_seller(&order, user.user_id)?;
    state.services.orders.resend_confirmation(order_id).await?;
    Ok(Json(ApiResponse::message_only("Confirmation link re-issued")))
}
