use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    services::{
        delivery_fee::{DeliveryFeeCalculator, DeliveryQuote, Destination},
        orders::{CreateOrderRequest, OrderResponse, OrderService},
        payments::{PaymentOutcome, PaymentService, RedirectDirective},
        stock::{clamp_quantity, StockValidator},
    },
};

use super::{
    session::{CheckoutSession, CheckoutStep},
    store::{clear_session, load_session, save_session, SessionStore},
};

/// Authoritative product state fetched at the start of (and during) a flow.
#[derive(Debug, Clone)]
pub struct ProductSnapshot {
    pub product_id: Uuid,
    pub seller_id: Uuid,
    pub unit_price: Decimal,
    pub available_stock: i32,
}

/// The service surface the checkout flow drives. A seam so the flow logic
/// can be tested without a database.
#[async_trait]
pub trait CheckoutBackend: Send + Sync {
    async fn fetch_stock(&self, product_id: Uuid) -> Result<ProductSnapshot, ServiceError>;

    /// The buyer's last known delivery destination, if one is on record.
    async fn last_known_destination(
        &self,
        buyer_id: Uuid,
    ) -> Result<Option<Destination>, ServiceError>;

    async fn quote_delivery(
        &self,
        product_id: Uuid,
        destination: &Destination,
    ) -> Result<DeliveryQuote, ServiceError>;

    async fn save_order(
        &self,
        buyer_id: Uuid,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError>;

    async fn confirm_payment(
        &self,
        order_id: Uuid,
        buyer_id: Uuid,
        method: crate::entities::order::PaymentMethod,
    ) -> Result<PaymentOutcome, ServiceError>;

    async fn finalize_gateway_return(
        &self,
        transaction_uuid: Uuid,
        success: bool,
    ) -> Result<OrderResponse, ServiceError>;
}

/// Production backend over the real services.
pub struct LiveBackend {
    stock: StockValidator,
    orders: OrderService,
    payments: PaymentService,
    fees: DeliveryFeeCalculator,
}

impl LiveBackend {
    pub fn new(stock: StockValidator, orders: OrderService, payments: PaymentService) -> Self {
        Self {
            stock,
            orders,
            payments,
            fees: DeliveryFeeCalculator::new(),
        }
    }
}

#[async_trait]
impl CheckoutBackend for LiveBackend {
    async fn fetch_stock(&self, product_id: Uuid) -> Result<ProductSnapshot, ServiceError> {
        let product = self.stock.fetch_product(product_id).await?;
        Ok(ProductSnapshot {
            product_id: product.id,
            seller_id: product.seller_id,
            unit_price: product.unit_price,
            available_stock: product.stock,
        })
    }

    async fn last_known_destination(
        &self,
        buyer_id: Uuid,
    ) -> Result<Option<Destination>, ServiceError> {
        self.orders.latest_destination(buyer_id).await
    }

    async fn quote_delivery(
        &self,
        product_id: Uuid,
        destination: &Destination,
    ) -> Result<DeliveryQuote, ServiceError> {
        let product = self.stock.fetch_product(product_id).await?;
        Ok(self.fees.quote(&product, destination))
    }

    async fn save_order(
        &self,
        buyer_id: Uuid,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        self.orders.create_or_update(buyer_id, request).await
    }

    async fn confirm_payment(
        &self,
        order_id: Uuid,
        buyer_id: Uuid,
        method: crate::entities::order::PaymentMethod,
    ) -> Result<PaymentOutcome, ServiceError> {
        self.payments.confirm(order_id, buyer_id, method).await
    }

    async fn finalize_gateway_return(
        &self,
        transaction_uuid: Uuid,
        success: bool,
    ) -> Result<OrderResponse, ServiceError> {
        self.payments
            .finalize_gateway_return(transaction_uuid, success)
            .await
    }
}

/// Outcome of a quantity edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum QuantityOutcome {
    Applied {
        quantity: i32,
        /// True when the request exceeded stock and was reduced.
        clamped: bool,
        available_stock: i32,
    },
    /// A newer edit was issued while this one's validation was in flight;
    /// nothing was changed.
    Stale,
}

/// Outcome of saving the order from the location step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SaveOutcome {
    Saved {
        order: OrderResponse,
        navigate: String,
    },
    /// Stock dropped below the chosen quantity; the session quantity was
    /// reduced and the buyer stays on the current step.
    Clamped { available_stock: i32 },
}

/// Outcome of the payment step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConfirmOutcome {
    Receipt(OrderResponse),
    Redirect(RedirectDirective),
    /// Stock ran out before payment; the order was invalidated and the flow
    /// returns to the detail step with the reduced quantity.
    Rewind { available_stock: i32 },
}

/// Sequences the checkout steps and owns the per-buyer session.
///
/// Quantity edits clamp silently; only order save and payment confirmation
/// surface a stock shortfall to the buyer. Failing to read stock at entry
/// aborts the flow rather than letting an unvalidated checkout proceed.
pub struct CheckoutOrchestrator {
    backend: Arc<dyn CheckoutBackend>,
    store: Arc<dyn SessionStore>,
}

impl CheckoutOrchestrator {
    pub fn new(backend: Arc<dyn CheckoutBackend>, store: Arc<dyn SessionStore>) -> Self {
        Self { backend, store }
    }

    /// Starts a flow for a product, or resumes the existing one. Resuming
    /// re-reads stock and re-clamps the saved quantity. A fresh flow is
    /// pre-filled with the buyer's last known destination, already quoted.
    #[instrument(skip(self), fields(buyer_id = %buyer_id, product_id = %product_id))]
    pub async fn initialize(
        &self,
        buyer_id: Uuid,
        product_id: Uuid,
    ) -> Result<CheckoutSession, ServiceError> {
        let snapshot = self.backend.fetch_stock(product_id).await?;

        let session = match load_session(self.store.as_ref(), buyer_id)? {
            Some(mut existing) if existing.product_id == product_id => {
                existing.unit_price = snapshot.unit_price;
                existing.available_stock = snapshot.available_stock;
                existing.quantity = clamp_quantity(existing.quantity, snapshot.available_stock);
                info!(step = ?existing.step, "resuming checkout");
                existing
            }
            _ => {
                let mut fresh = CheckoutSession::new(
                    buyer_id,
                    product_id,
                    snapshot.seller_id,
                    snapshot.unit_price,
                    snapshot.available_stock,
                );
                if let Some(destination) =
                    self.backend.last_known_destination(buyer_id).await?
                {
                    let quote = self
                        .backend
                        .quote_delivery(product_id, &destination)
                        .await?;
                    fresh.destination = Some(destination);
                    fresh.delivery_charge = Some(quote.charge);
                    fresh.estimated_delivery = Some(quote.estimated_delivery);
                }
                fresh
            }
        };

        save_session(self.store.as_ref(), &session)?;
        Ok(session)
    }

    /// Applies a quantity edit after revalidating stock. If a newer edit
    /// arrives while this one is in flight, this one is discarded.
    #[instrument(skip(self), fields(buyer_id = %buyer_id, requested = requested))]
    pub async fn change_quantity(
        &self,
        buyer_id: Uuid,
        requested: i32,
    ) -> Result<QuantityOutcome, ServiceError> {
        let mut session = self.require_session(buyer_id)?;
        session.seq += 1;
        let my_seq = session.seq;
        save_session(self.store.as_ref(), &session)?;

        let snapshot = self.backend.fetch_stock(session.product_id).await?;

        // Another edit may have started while the stock read was in flight.
        let mut current = self.require_session(buyer_id)?;
        if current.seq != my_seq {
            return Ok(QuantityOutcome::Stale);
        }

        let quantity = clamp_quantity(requested, snapshot.available_stock);
        let clamped = requested > quantity;
        if clamped {
            warn!(
                requested = requested,
                available = snapshot.available_stock,
                "quantity clamped to stock"
            );
        }

        current.quantity = quantity;
        current.unit_price = snapshot.unit_price;
        current.available_stock = snapshot.available_stock;
        self.resave_order(buyer_id, &mut current).await?;
        save_session(self.store.as_ref(), &current)?;

        Ok(QuantityOutcome::Applied {
            quantity: current.quantity,
            clamped: clamped || current.quantity < quantity,
            available_stock: current.available_stock,
        })
    }

    /// Saves the delivery destination and quotes the fee for it.
    #[instrument(skip(self, destination), fields(buyer_id = %buyer_id))]
    pub async fn save_location(
        &self,
        buyer_id: Uuid,
        destination: Destination,
    ) -> Result<CheckoutSession, ServiceError> {
        let mut session = self.require_session(buyer_id)?;

        let quote = self
            .backend
            .quote_delivery(session.product_id, &destination)
            .await?;

        session.destination = Some(destination);
        session.delivery_charge = Some(quote.charge);
        session.estimated_delivery = Some(quote.estimated_delivery);
        session.step = CheckoutStep::Location;
        self.resave_order(buyer_id, &mut session).await?;
        save_session(self.store.as_ref(), &session)?;
        Ok(session)
    }

    /// Recomputes the stored order in place after a quantity or destination
    /// edit, so the displayed totals never lag the server truth. A no-op
    /// until the first order save; the order number never changes here.
    async fn resave_order(
        &self,
        buyer_id: Uuid,
        session: &mut CheckoutSession,
    ) -> Result<(), ServiceError> {
        let (Some(order_id), Some(destination)) =
            (session.order_id, session.destination.clone())
        else {
            return Ok(());
        };

        let request = CreateOrderRequest {
            order_id: Some(order_id),
            seller_id: session.seller_id,
            product_id: session.product_id,
            quantity: session.quantity,
            delivery: destination,
        };

        match self.backend.save_order(buyer_id, request).await {
            Ok(order) => {
                session.order_number = Some(order.order_number);
                session.delivery_charge = Some(order.delivery_charge);
                session.estimated_delivery = Some(order.estimated_delivery_time);
                Ok(())
            }
            Err(ServiceError::InsufficientStock {
                available_stock, ..
            }) => {
                // Stock moved between the read and the write; apply the
                // lower bound and let the next save catch the order up.
                session.quantity = clamp_quantity(session.quantity, available_stock);
                session.available_stock = available_stock;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Creates the order, or recomputes the existing one in place. The order
    /// number is assigned on the first save and survives later edits.
    #[instrument(skip(self), fields(buyer_id = %buyer_id))]
    pub async fn save_order(&self, buyer_id: Uuid) -> Result<SaveOutcome, ServiceError> {
        let mut session = self.require_session(buyer_id)?;
        let destination = session.destination.clone().ok_or_else(|| {
            ServiceError::ValidationError("Delivery destination not chosen yet".to_string())
        })?;

        let request = CreateOrderRequest {
            order_id: session.order_id,
            seller_id: session.seller_id,
            product_id: session.product_id,
            quantity: session.quantity,
            delivery: destination,
        };

        match self.backend.save_order(buyer_id, request).await {
            Ok(order) => {
                session.order_id = Some(order.id);
                session.order_number = Some(order.order_number.clone());
                session.delivery_charge = Some(order.delivery_charge);
                session.estimated_delivery = Some(order.estimated_delivery_time);
                session.step = CheckoutStep::Payment;
                save_session(self.store.as_ref(), &session)?;
                Ok(SaveOutcome::Saved {
                    order,
                    navigate: CheckoutStep::Payment.route().to_string(),
                })
            }
            Err(ServiceError::InsufficientStock {
                available_stock, ..
            }) => {
                session.quantity = clamp_quantity(session.quantity, available_stock);
                session.available_stock = available_stock;
                save_session(self.store.as_ref(), &session)?;
                Ok(SaveOutcome::Clamped { available_stock })
            }
            Err(e) => Err(e),
        }
    }

    /// Confirms payment for the saved order.
    #[instrument(skip(self), fields(buyer_id = %buyer_id, method = %method))]
    pub async fn confirm_payment(
        &self,
        buyer_id: Uuid,
        method: crate::entities::order::PaymentMethod,
    ) -> Result<ConfirmOutcome, ServiceError> {
        let mut session = self.require_session(buyer_id)?;
        let order_id = session.order_id.ok_or_else(|| {
            ServiceError::ValidationError("No order saved for this checkout".to_string())
        })?;

        match self.backend.confirm_payment(order_id, buyer_id, method).await {
            Ok(PaymentOutcome::Completed(order)) => {
                session.step = CheckoutStep::Receipt;
                save_session(self.store.as_ref(), &session)?;
                Ok(ConfirmOutcome::Receipt(order))
            }
            Ok(PaymentOutcome::Redirect(directive)) => {
                save_session(self.store.as_ref(), &session)?;
                Ok(ConfirmOutcome::Redirect(directive))
            }
            Err(ServiceError::InsufficientStock {
                available_stock, ..
            }) => {
                // The order was invalidated server-side; start a fresh one.
                session.order_id = None;
                session.order_number = None;
                session.quantity = clamp_quantity(session.quantity, available_stock);
                session.available_stock = available_stock;
                session.step = CheckoutStep::Detail;
                save_session(self.store.as_ref(), &session)?;
                Ok(ConfirmOutcome::Rewind { available_stock })
            }
            Err(e) => Err(e),
        }
    }

    /// Settles a gateway return and, on success, arms the one-time receipt
    /// banner.
    #[instrument(skip(self), fields(buyer_id = %buyer_id, transaction_uuid = %transaction_uuid))]
    pub async fn gateway_return(
        &self,
        buyer_id: Uuid,
        transaction_uuid: Uuid,
        success: bool,
    ) -> Result<OrderResponse, ServiceError> {
        let order = self
            .backend
            .finalize_gateway_return(transaction_uuid, success)
            .await?;

        if let Some(mut session) = load_session(self.store.as_ref(), buyer_id)? {
            if success {
                session.step = CheckoutStep::Receipt;
                session.gateway_notice = Some("payment=success".to_string());
            }
            save_session(self.store.as_ref(), &session)?;
        }

        Ok(order)
    }

    /// Takes the receipt banner. Shown once; a reload sees nothing.
    pub fn take_gateway_notice(&self, buyer_id: Uuid) -> Result<Option<String>, ServiceError> {
        let Some(mut session) = load_session(self.store.as_ref(), buyer_id)? else {
            return Ok(None);
        };
        let notice = session.gateway_notice.take();
        if notice.is_some() {
            save_session(self.store.as_ref(), &session)?;
        }
        Ok(notice)
    }

    /// Ends the flow and drops the session.
    pub fn finish(&self, buyer_id: Uuid) {
        clear_session(self.store.as_ref(), buyer_id);
    }

    pub fn session(&self, buyer_id: Uuid) -> Result<Option<CheckoutSession>, ServiceError> {
        load_session(self.store.as_ref(), buyer_id)
    }

    fn require_session(&self, buyer_id: Uuid) -> Result<CheckoutSession, ServiceError> {
        load_session(self.store.as_ref(), buyer_id)?
            .ok_or_else(|| ServiceError::NotFound("No active checkout session".to_string()))
    }
}
