//! Kinmel marketplace order backend.
//!
//! Covers the buyer checkout flow end to end: stock and price validation,
//! delivery-fee quoting, the order state machine, payment confirmation
//! (eSewa and cash on delivery), and dual-auth delivery confirmation.

pub mod auth;
pub mod checkout;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod openapi;
pub mod services;

use std::sync::Arc;

use axum::{routing::get, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    auth::{AuthConfig, AuthService},
    checkout::{CheckoutOrchestrator, InMemorySessionStore, LiveBackend},
    config::AppConfig,
    db::DbPool,
    errors::ServiceError,
    events::EventSender,
    services::{
        delivery_confirmation::DeliveryConfirmationService,
        orders::OrderService,
        payments::{EsewaConfig, PaymentService},
        stock::StockValidator,
    },
};

/// Standard success envelope for API responses.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message.into()),
        }
    }

    pub fn message_only(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.into()),
        }
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ServiceError>;

/// Pagination query parameters.
#[derive(Debug, Clone, Deserialize, utoipa::IntoParams)]
pub struct ListQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl ListQuery {
    pub fn page(&self) -> u64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn per_page(&self) -> u64 {
        self.per_page.unwrap_or(20).clamp(1, 100)
    }
}

/// Domain services shared across handlers.
#[derive(Clone)]
pub struct AppServices {
    pub stock: StockValidator,
    pub orders: OrderService,
    pub payments: PaymentService,
    pub confirmation: DeliveryConfirmationService,
    pub checkout: Arc<CheckoutOrchestrator>,
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: Arc<AppConfig>,
    pub event_sender: Option<Arc<EventSender>>,
    pub auth_service: Arc<AuthService>,
    pub services: AppServices,
}

impl AppState {
    pub fn new(
        db: Arc<DbPool>,
        config: Arc<AppConfig>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        let auth_service = Arc::new(AuthService::new(AuthConfig {
            jwt_secret: config.jwt_secret.clone(),
            token_lifetime_secs: config.jwt_expiration,
        }));

        let stock = StockValidator::new(db.clone());
        let orders = OrderService::new(db.clone(), event_sender.clone());
        let payments = PaymentService::new(
            db.clone(),
            event_sender.clone(),
            EsewaConfig::from_app_config(&config),
        );
        let confirmation = DeliveryConfirmationService::new(db.clone(), event_sender.clone());

        let checkout = Arc::new(CheckoutOrchestrator::new(
            Arc::new(LiveBackend::new(
                stock.clone(),
                orders.clone(),
                payments.clone(),
            )),
            Arc::new(InMemorySessionStore::new()),
        ));

        Self {
            db,
            config,
            event_sender,
            auth_service,
            services: AppServices {
                stock,
                orders,
                payments,
                confirmation,
                checkout,
            },
        }
    }
}

/// The versioned API surface.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", post(handlers::orders::create_order).get(handlers::orders::list_orders))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route(
            "/orders/by-number/:order_number",
            get(handlers::orders::get_order_by_number),
        )
        .route("/orders/:id/cancel", post(handlers::orders::cancel_order))
        .route("/orders/:id/ship", post(handlers::orders::ship_order))
        .route("/orders/:id/delivered", post(handlers::orders::mark_delivered))
        .route("/orders/:id/redeliver", post(handlers::orders::redeliver_order))
        .route(
            "/orders/:id/resend-confirmation",
            post(handlers::orders::resend_confirmation),
        )
        .route("/orders/:id/payment", post(handlers::payments::confirm_payment))
        .route("/payments/return", get(handlers::payments::gateway_return))
        .route(
            "/orders/:id/confirmation",
            get(handlers::delivery::confirmation_page).post(handlers::delivery::confirm_delivery),
        )
        .route("/orders/:id/report", post(handlers::delivery::report_not_delivered))
        .route("/status", get(handlers::api_status))
}

/// Builds the full application router.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_routes())
        .with_state(state)
}
