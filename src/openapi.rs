use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Kinmel Order API",
        description = "Order lifecycle, checkout, payment, and delivery confirmation for the Kinmel marketplace."
    ),
    paths(
        crate::handlers::api_status,
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::get_order_by_number,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::ship_order,
        crate::handlers::orders::mark_delivered,
        crate::handlers::orders::redeliver_order,
        crate::handlers::orders::resend_confirmation,
        crate::handlers::payments::confirm_payment,
        crate::handlers::payments::gateway_return,
        crate::handlers::delivery::confirmation_page,
        crate::handlers::delivery::confirm_delivery,
        crate::handlers::delivery::report_not_delivered,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::handlers::StatusResponse,
        crate::handlers::orders::CancelOrderBody,
        crate::handlers::payments::ConfirmPaymentBody,
        crate::handlers::delivery::ReportBody,
        crate::entities::order::OrderStatus,
        crate::entities::order::PaymentMethod,
        crate::entities::order::PaymentStatus,
        crate::entities::order::CancelledBy,
        crate::services::delivery_fee::Destination,
        crate::services::delivery_fee::DeliveryQuote,
        crate::services::orders::CreateOrderRequest,
        crate::services::orders::OrderResponse,
        crate::services::orders::OrderListResponse,
        crate::services::orders::PaymentView,
        crate::services::orders::CancellationView,
        crate::services::payments::PaymentOutcome,
        crate::services::payments::RedirectDirective,
        crate::services::delivery_confirmation::AuthMethod,
        crate::services::delivery_confirmation::ConfirmationStatus,
        crate::services::delivery_confirmation::ConfirmationOrderSummary,
        crate::services::delivery_confirmation::ConfirmationView,
        crate::services::delivery_confirmation::ConfirmationResult,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "orders", description = "Order lifecycle"),
        (name = "payments", description = "Payment confirmation and gateway returns"),
        (name = "delivery", description = "Delivery confirmation and disputes"),
        (name = "status", description = "Service status"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Serves the interactive API documentation.
pub fn swagger_routes() -> Router<AppState> {
    Router::new().merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
