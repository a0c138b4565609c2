use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    db::DbPool,
    entities::{
        order::{
            self, ActiveModel as OrderActiveModel, CancelledBy, Entity as OrderEntity,
            Model as OrderModel, OrderStatus, PaymentMethod, PaymentStatus,
        },
        product::{self, Entity as ProductEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::orders::{order_to_response, OrderResponse},
};

type HmacSha256 = Hmac<Sha256>;

/// Gateway settings for the eSewa ePay integration.
#[derive(Debug, Clone)]
pub struct EsewaConfig {
    pub payment_url: String,
    pub product_code: String,
    pub secret_key: String,
    /// Base URL the gateway sends the buyer back to after payment.
    pub return_url: String,
}

impl EsewaConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            payment_url: config.esewa_payment_url.clone(),
            product_code: config.esewa_product_code.clone(),
            secret_key: config.esewa_secret_key.clone(),
            return_url: config.payment_return_url.clone(),
        }
    }
}

/// A browser redirect into the gateway: a self-submitting HTML form carrying
/// the signed payment fields.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RedirectDirective {
    pub transaction_uuid: Uuid,
    pub html: String,
}

/// Outcome of a payment confirmation request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    /// The order is paid for (or, for cash on delivery, acknowledged) and
    /// stays in fulfilment.
    Completed(OrderResponse),
    /// The buyer must be sent through the gateway before the payment settles.
    Redirect(RedirectDirective),
}

/// Drives payment confirmation for both supported methods.
///
/// Stock is decremented here, not at order creation, so an abandoned
/// checkout never holds inventory. The decrement and the final stock check
/// run in one transaction; a shortfall discovered at this point cancels the
/// order server-side rather than leaving it unpayable.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    esewa: EsewaConfig,
}

impl PaymentService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        esewa: EsewaConfig,
    ) -> Self {
        Self {
            db,
            event_sender,
            esewa,
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, "failed to send payment event");
            }
        }
    }

    /// Confirms payment intent for an order in `processing`.
    ///
    /// Cash on delivery settles immediately; eSewa yields a redirect and
    /// settles when the gateway sends the buyer back. An order whose last
    /// gateway attempt failed may be confirmed again.
    #[instrument(skip(self), fields(order_id = %order_id, method = %method))]
    pub async fn confirm(
        &self,
        order_id: Uuid,
        buyer_id: Uuid,
        method: PaymentMethod,
    ) -> Result<PaymentOutcome, ServiceError> {
        let txn = self.db.begin().await?;

        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.buyer_id != buyer_id {
            return Err(ServiceError::Forbidden(
                "Order belongs to a different account".to_string(),
            ));
        }
        if order.status != OrderStatus::Processing {
            return Err(ServiceError::InvalidTransition {
                current: order.status.to_string(),
                requested: "confirm payment".to_string(),
            });
        }
        if !matches!(
            order.payment_status,
            PaymentStatus::Pending | PaymentStatus::Failed
        ) || (order.payment_status == PaymentStatus::Pending && order.payment_method.is_some())
        {
            return Err(ServiceError::Conflict(
                "Payment is already in progress for this order".to_string(),
            ));
        }

        let product = ProductEntity::find_by_id(order.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", order.product_id))
            })?;

        // Final stock check; the quantity validated at order time may have
        // been sold to someone else in the meantime.
        if order.quantity > product.stock {
            let available = product.stock;
            let requested = order.quantity;
            self.invalidate_for_stock(txn, order).await?;
            return Err(ServiceError::InsufficientStock {
                requested,
                available_stock: available,
            });
        }

        let remaining = product.stock - order.quantity;
        let mut product_active: product::ActiveModel = product.into();
        product_active.stock = Set(remaining);
        product_active.updated_at = Set(Some(Utc::now()));
        product_active.update(&txn).await?;

        let outcome = match method {
            PaymentMethod::Cod => {
                let updated = self
                    .record_payment(&txn, order, PaymentMethod::Cod, PaymentStatus::Pending, None)
                    .await?;
                txn.commit().await?;

                info!(order_id = %order_id, "cash on delivery acknowledged");
                self.emit(Event::PaymentConfirmed {
                    order_id,
                    method: PaymentMethod::Cod,
                })
                .await;

                PaymentOutcome::Completed(order_to_response(updated, false))
            }
            PaymentMethod::Esewa => {
                let transaction_uuid = Uuid::new_v4();
                let updated = self
                    .record_payment(
                        &txn,
                        order,
                        PaymentMethod::Esewa,
                        PaymentStatus::Pending,
                        Some(transaction_uuid),
                    )
                    .await?;
                txn.commit().await?;

                info!(order_id = %order_id, %transaction_uuid, "redirecting to gateway");
                self.emit(Event::PaymentConfirmed {
                    order_id,
                    method: PaymentMethod::Esewa,
                })
                .await;

                let html = self.redirect_form(&updated, transaction_uuid);
                PaymentOutcome::Redirect(RedirectDirective {
                    transaction_uuid,
                    html,
                })
            }
        };

        Ok(outcome)
    }

    /// Settles an eSewa attempt when the gateway sends the buyer back.
    ///
    /// Failure releases the stock taken at redirect time and marks the
    /// payment failed, which re-opens [`confirm`](Self::confirm).
    #[instrument(skip(self), fields(transaction_uuid = %transaction_uuid, success = success))]
    pub async fn finalize_gateway_return(
        &self,
        transaction_uuid: Uuid,
        success: bool,
    ) -> Result<OrderResponse, ServiceError> {
        let txn = self.db.begin().await?;

        let order = OrderEntity::find()
            .filter(order::Column::TransactionUuid.eq(transaction_uuid))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "No order for transaction {}",
                    transaction_uuid
                ))
            })?;

        if order.payment_method != Some(PaymentMethod::Esewa)
            || order.payment_status != PaymentStatus::Pending
        {
            return Err(ServiceError::Conflict(
                "Transaction is not awaiting gateway settlement".to_string(),
            ));
        }

        let order_id = order.id;
        let updated = if success {
            let version = order.version;
            let mut active: OrderActiveModel = order.into();
            active.payment_status = Set(PaymentStatus::Success);
            active.updated_at = Set(Some(Utc::now()));
            active.version = Set(version + 1);
            let updated = active.update(&txn).await?;
            txn.commit().await?;

            info!(order_id = %order_id, "gateway payment settled");
            self.emit(Event::PaymentSucceeded(order_id)).await;
            updated
        } else {
            if let Some(product) = ProductEntity::find_by_id(order.product_id).one(&txn).await? {
                let stock = product.stock;
                let mut active: product::ActiveModel = product.into();
                active.stock = Set(stock + order.quantity);
                active.updated_at = Set(Some(Utc::now()));
                active.update(&txn).await?;
            }

            let version = order.version;
            let mut active: OrderActiveModel = order.into();
            active.payment_status = Set(PaymentStatus::Failed);
            active.updated_at = Set(Some(Utc::now()));
            active.version = Set(version + 1);
            let updated = active.update(&txn).await?;
            txn.commit().await?;

            warn!(order_id = %order_id, "gateway payment failed");
            self.emit(Event::PaymentFailed(order_id)).await;
            updated
        };

        Ok(order_to_response(updated, false))
    }

    async fn record_payment(
        &self,
        txn: &sea_orm::DatabaseTransaction,
        order: OrderModel,
        method: PaymentMethod,
        status: PaymentStatus,
        transaction_uuid: Option<Uuid>,
    ) -> Result<OrderModel, ServiceError> {
        let version = order.version;
        let mut active: OrderActiveModel = order.into();
        active.payment_method = Set(Some(method));
        active.payment_status = Set(status);
        active.transaction_uuid = Set(transaction_uuid);
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(version + 1);
        Ok(active.update(txn).await?)
    }

    /// Cancels an order whose stock ran out between creation and payment.
    async fn invalidate_for_stock(
        &self,
        txn: sea_orm::DatabaseTransaction,
        order: OrderModel,
    ) -> Result<(), ServiceError> {
        let order_id = order.id;
        let old_status = order.status;
        let version = order.version;

        let mut active: OrderActiveModel = order.into();
        active.status = Set(OrderStatus::Cancelled);
        active.cancel_reason = Set(Some("stock_exhausted".to_string()));
        active.cancelled_by = Set(Some(CancelledBy::Seller));
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(version + 1);
        active.update(&txn).await?;
        txn.commit().await?;

        warn!(order_id = %order_id, "order invalidated, stock exhausted before payment");
        self.emit(Event::OrderStatusChanged {
            order_id,
            old_status,
            new_status: OrderStatus::Cancelled,
        })
        .await;
        self.emit(Event::OrderCancelled(order_id)).await;
        Ok(())
    }

    /// Builds the self-submitting ePay form for the browser.
    fn redirect_form(&self, order: &OrderModel, transaction_uuid: Uuid) -> String {
        let total = format_amount(order.total_amount);
        let subtotal = format_amount(order.subtotal);
        let delivery = format_amount(order.delivery_charge);
        let txn = transaction_uuid.to_string();
        let signature = esewa_signature(&self.esewa.secret_key, &total, &txn, &self.esewa.product_code);

        let success_url = format!(
            "{}?transaction_uuid={}&status=success",
            self.esewa.return_url, txn
        );
        let failure_url = format!(
            "{}?transaction_uuid={}&status=failure",
            self.esewa.return_url, txn
        );

        format!(
            r#"<!DOCTYPE html>
<html>
<body onload="document.forms[0].submit()">
<form action="{action}" method="POST">
<input type="hidden" name="amount" value="{subtotal}">
<input type="hidden" name="tax_amount" value="0">
<input type="hidden" name="product_service_charge" value="0">
<input type="hidden" name="product_delivery_charge" value="{delivery}">
<input type="hidden" name="total_amount" value="{total}">
<input type="hidden" name="transaction_uuid" value="{txn}">
<input type="hidden" name="product_code" value="{code}">
<input type="hidden" name="success_url" value="{success_url}">
<input type="hidden" name="failure_url" value="{failure_url}">
<input type="hidden" name="signed_field_names" value="total_amount,transaction_uuid,product_code">
<input type="hidden" name="signature" value="{signature}">
<noscript><button type="submit">Continue to eSewa</button></noscript>
</form>
</body>
</html>"#,
            action = self.esewa.payment_url,
            subtotal = subtotal,
            delivery = delivery,
            total = total,
            txn = txn,
            code = self.esewa.product_code,
            success_url = success_url,
            failure_url = failure_url,
            signature = signature,
        )
    }
}

/// Signs the ePay field string: base64 of the HMAC-SHA256 over
/// `total_amount=..,transaction_uuid=..,product_code=..` in that order.
pub fn esewa_signature(
    secret: &str,
    total_amount: &str,
    transaction_uuid: &str,
    product_code: &str,
) -> String {
    let message = format!(
        "total_amount={},transaction_uuid={},product_code={}",
        total_amount, transaction_uuid, product_code
    );
    // HMAC accepts keys of any length.
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(message.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// Renders a decimal amount without insignificant trailing zeros, matching
/// what the gateway expects in the signed field string.
fn format_amount(amount: Decimal) -> String {
    amount.normalize().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn signature_matches_gateway_documented_vector() {
        // Published UAT credentials and example from the ePay v2 docs.
        let signature = esewa_signature(
            "8gBm/:&EnhH.1/q",
            "110",
            "11-200-111",
            "EPAYTEST",
        );
        assert_eq!(signature, "I7+dALlBAiTPyr4rgFbxogIr1HdslkUHrzWGPMiRF1w=");
    }

    #[test]
    fn amounts_are_normalized_for_signing() {
        assert_eq!(format_amount(dec!(110.00)), "110");
        assert_eq!(format_amount(dec!(1780.50)), "1780.5");
        assert_eq!(format_amount(dec!(60)), "60");
    }

    #[test]
    fn redirect_form_embeds_signed_fields() {
        let esewa = EsewaConfig {
            payment_url: "https://rc-epay.esewa.com.np/api/epay/main/v2/form".to_string(),
            product_code: "EPAYTEST".to_string(),
            secret_key: "8gBm/:&EnhH.1/q".to_string(),
            return_url: "http://localhost:8080/api/v1/payments/esewa/return".to_string(),
        };
        let service = PaymentService {
            db: Arc::new(sea_orm::DatabaseConnection::Disconnected),
            event_sender: None,
            esewa,
        };

        let now = Utc::now();
        let order = OrderModel {
            id: Uuid::new_v4(),
            order_number: "KIN-0011223344".to_string(),
            buyer_id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            product_name: "Singing bowl".to_string(),
            status: OrderStatus::Processing,
            quantity: 1,
            unit_price: dec!(100.00),
            subtotal: dec!(100.00),
            delivery_charge: dec!(10.00),
            total_amount: dec!(110.00),
            delivery_province: "Bagmati".to_string(),
            delivery_district: "Kathmandu".to_string(),
            delivery_municipality: "Kathmandu".to_string(),
            delivery_ward: 1,
            delivery_label: None,
            estimated_delivery_time: now,
            payment_method: Some(PaymentMethod::Esewa),
            payment_status: PaymentStatus::Pending,
            transaction_uuid: None,
            cancel_reason: None,
            cancel_description: None,
            cancelled_by: None,
            created_at: now,
            updated_at: None,
            version: 1,
        };

        let txn = Uuid::new_v4();
        let html = service.redirect_form(&order, txn);
        assert!(html.contains(r#"name="total_amount" value="110""#));
        assert!(html.contains(&txn.to_string()));
        assert!(html.contains(r#"name="product_code" value="EPAYTEST""#));
        assert!(html.contains("signed_field_names"));
        assert!(html.contains("status=success"));
        assert!(html.contains("status=failure"));
    }
}
