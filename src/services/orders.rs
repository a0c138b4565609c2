use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::RngCore;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, PaginatorTrait, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{
        confirmation_token::{self, Entity as TokenEntity},
        delivery_report::{self, Entity as ReportEntity},
        order::{
            self, ActiveModel as OrderActiveModel, CancelledBy, Entity as OrderEntity,
            Model as OrderModel, OrderStatus, PaymentMethod, PaymentStatus,
        },
        product::{self, Entity as ProductEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::delivery_fee::{DeliveryFeeCalculator, Destination},
    services::stock,
};

/// Request to create a new order or recompute an existing one in place.
///
/// When `order_id` is present the same order row (and `order_number`) is
/// updated rather than a new order created; quantity and destination changes
/// during checkout always take this path.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    pub order_id: Option<Uuid>,
    pub seller_id: Uuid,
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
    #[validate]
    pub delivery: Destination,
}

/// Payment state embedded in an order response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentView {
    pub method: Option<PaymentMethod>,
    pub status: PaymentStatus,
    pub transaction_uuid: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CancellationView {
    pub reason: Option<String>,
    pub description: Option<String>,
    pub cancelled_by: CancelledBy,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub status: OrderStatus,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
    pub delivery_charge: Decimal,
    pub total_amount: Decimal,
    pub delivery: Destination,
    pub estimated_delivery_time: DateTime<Utc>,
    pub payment: PaymentView,
    pub cancellation: Option<CancellationView>,
    /// True while a dispute is open; the seller surface uses it to suppress
    /// the resend-confirmation action.
    pub has_open_report: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// The order record store: the single authoritative writer of order status.
///
/// Every transition request is checked against the state-machine table on
/// [`OrderStatus`]; a request against an order not in the required source
/// state is answered with the distinguishable
/// [`ServiceError::InvalidTransition`] rather than a generic error, because
/// the session and token-link entry points can race to perform the same
/// transition.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    fees: DeliveryFeeCalculator,
}

impl OrderService {
    pub fn new(db: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db,
            event_sender,
            fees: DeliveryFeeCalculator::new(),
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, "failed to send order event");
            }
        }
    }

    /// Creates an order, or recomputes an existing one in place when
    /// `request.order_id` is set.
    ///
    /// Totals are always recomputed here from the authoritative unit price
    /// and a fresh delivery quote; client-supplied amounts are never
    /// trusted. Stock is validated but not reserved.
    #[instrument(skip(self, request), fields(buyer_id = %buyer_id, product_id = %request.product_id, quantity = request.quantity))]
    pub async fn create_or_update(
        &self,
        buyer_id: Uuid,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let txn = self.db.begin().await?;

        let product = ProductEntity::find_by_id(request.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", request.product_id))
            })?;

        if product.seller_id != request.seller_id {
            return Err(ServiceError::ValidationError(
                "Product does not belong to the given seller".to_string(),
            ));
        }

        stock::check_against(&product, request.quantity)?;

        let quote = self.fees.quote(&product, &request.delivery);
        let subtotal = product.unit_price * Decimal::from(request.quantity);
        let total_amount = subtotal + quote.charge;
        let now = Utc::now();

        let model = match request.order_id {
            Some(order_id) => {
                let existing = OrderEntity::find_by_id(order_id)
                    .one(&txn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Order {} not found", order_id))
                    })?;

                if existing.buyer_id != buyer_id {
                    return Err(ServiceError::Forbidden(
                        "Order belongs to a different account".to_string(),
                    ));
                }
                if existing.status != OrderStatus::Processing
                    || existing.payment_status != PaymentStatus::Pending
                {
                    return Err(ServiceError::InvalidTransition {
                        current: existing.status.to_string(),
                        requested: "update".to_string(),
                    });
                }

                let version = existing.version;
                let mut active: OrderActiveModel = existing.into();
                active.quantity = Set(request.quantity);
                active.unit_price = Set(product.unit_price);
                active.subtotal = Set(subtotal);
                active.delivery_charge = Set(quote.charge);
                active.total_amount = Set(total_amount);
                active.delivery_province = Set(request.delivery.province.clone());
                active.delivery_district = Set(request.delivery.district.clone());
                active.delivery_municipality = Set(request.delivery.municipality.clone());
                active.delivery_ward = Set(request.delivery.ward);
                active.delivery_label = Set(request.delivery.label.clone());
                active.estimated_delivery_time = Set(quote.estimated_delivery);
                active.updated_at = Set(Some(now));
                active.version = Set(version + 1);

                let updated = active.update(&txn).await?;
                self.emit(Event::OrderUpdated(updated.id)).await;
                updated
            }
            None => {
                let order_id = Uuid::new_v4();
                let order_number = new_order_number(order_id);

                let active = OrderActiveModel {
                    id: Set(order_id),
                    order_number: Set(order_number),
                    buyer_id: Set(buyer_id),
                    seller_id: Set(request.seller_id),
                    product_id: Set(product.id),
                    product_name: Set(product.name.clone()),
                    status: Set(OrderStatus::Processing),
                    quantity: Set(request.quantity),
                    unit_price: Set(product.unit_price),
                    subtotal: Set(subtotal),
                    delivery_charge: Set(quote.charge),
                    total_amount: Set(total_amount),
                    delivery_province: Set(request.delivery.province.clone()),
                    delivery_district: Set(request.delivery.district.clone()),
                    delivery_municipality: Set(request.delivery.municipality.clone()),
                    delivery_ward: Set(request.delivery.ward),
                    delivery_label: Set(request.delivery.label.clone()),
                    estimated_delivery_time: Set(quote.estimated_delivery),
                    payment_method: Set(None),
                    payment_status: Set(PaymentStatus::Pending),
                    transaction_uuid: Set(None),
                    cancel_reason: Set(None),
                    cancel_description: Set(None),
                    cancelled_by: Set(None),
                    created_at: Set(now),
                    updated_at: Set(Some(now)),
                    version: Set(1),
                };

                let created = active.insert(&txn).await.map_err(|e| {
                    error!(error = %e, "failed to create order");
                    ServiceError::from(e)
                })?;
                self.emit(Event::OrderCreated(created.id)).await;
                created
            }
        };

        txn.commit().await?;
        info!(order_id = %model.id, order_number = %model.order_number, "order saved");
        self.to_response(model).await
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<OrderResponse>, ServiceError> {
        match OrderEntity::find_by_id(order_id).one(&*self.db).await? {
            Some(model) => Ok(Some(self.to_response(model).await?)),
            None => Ok(None),
        }
    }

    pub async fn get_order_model(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    pub async fn get_by_order_number(
        &self,
        order_number: &str,
    ) -> Result<Option<OrderResponse>, ServiceError> {
        let found = OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.db)
            .await?;
        match found {
            Some(model) => Ok(Some(self.to_response(model).await?)),
            None => Ok(None),
        }
    }

    /// Lists a buyer's orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        buyer_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let paginator = OrderEntity::find()
            .filter(order::Column::BuyerId.eq(buyer_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));

        let total = paginator.num_items().await?;
        let models = paginator.fetch_page(page.saturating_sub(1)).await?;

        let mut orders = Vec::with_capacity(models.len());
        for model in models {
            orders.push(self.to_response(model).await?);
        }

        Ok(OrderListResponse {
            orders,
            total,
            page,
            per_page,
        })
    }

    /// The destination of the buyer's most recent order, used to pre-fill
    /// a fresh checkout.
    pub async fn latest_destination(
        &self,
        buyer_id: Uuid,
    ) -> Result<Option<Destination>, ServiceError> {
        let found = OrderEntity::find()
            .filter(order::Column::BuyerId.eq(buyer_id))
            .order_by_desc(order::Column::CreatedAt)
            .one(&*self.db)
            .await?;
        Ok(found.map(|model| Destination {
            province: model.delivery_province,
            district: model.delivery_district,
            municipality: model.delivery_municipality,
            ward: model.delivery_ward,
            label: model.delivery_label,
        }))
    }

    /// Seller action: `processing → shipped`. Requires an acknowledged
    /// payment (gateway success, or cash-on-delivery awaiting collection).
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn mark_shipped(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        let order = self.get_order_model(order_id).await?;
        guard_transition(&order, OrderStatus::Shipped, "ship")?;

        let payment_ok = order.payment_status == PaymentStatus::Success
            || (order.payment_method == Some(PaymentMethod::Cod)
                && order.payment_status == PaymentStatus::Pending);
        if !payment_ok {
            return Err(ServiceError::ValidationError(
                "Order has no acknowledged payment".to_string(),
            ));
        }

        let updated = self
            .transition(order, OrderStatus::Shipped, |_| {})
            .await?;
        self.to_response(updated).await
    }

    /// Delivery actor action: `shipped → delivered_pending`. Issues the
    /// single-use confirmation token; notification dispatch happens off the
    /// emitted event.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn mark_delivered(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        let order = self.get_order_model(order_id).await?;
        guard_transition(&order, OrderStatus::DeliveredPending, "mark delivered")?;

        let updated = self
            .transition(order, OrderStatus::DeliveredPending, |_| {})
            .await?;

        let token = self.issue_confirmation_token(order_id).await?;
        self.emit(Event::ConfirmationRequested { order_id, token })
            .await;

        self.to_response(updated).await
    }

    /// Buyer or seller cancellation. Allowed from `processing` and `shipped`
    /// only; once `delivered_pending` the only exits are confirmation or the
    /// dispute loop. Frees stock that a confirmed payment had taken.
    #[instrument(skip(self, reason, description), fields(order_id = %order_id, cancelled_by = %cancelled_by))]
    pub async fn cancel(
        &self,
        order_id: Uuid,
        cancelled_by: CancelledBy,
        reason: Option<String>,
        description: Option<String>,
    ) -> Result<OrderResponse, ServiceError> {
        let txn = self.db.begin().await?;

        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        guard_transition(&order, OrderStatus::Cancelled, "cancel")?;

        // Stock was taken when the payment was confirmed; give it back.
        if order.payment_method.is_some() && order.payment_status != PaymentStatus::Failed {
            if let Some(product) = ProductEntity::find_by_id(order.product_id).one(&txn).await? {
                let stock = product.stock;
                let mut active: product::ActiveModel = product.into();
                active.stock = Set(stock + order.quantity);
                active.updated_at = Set(Some(Utc::now()));
                active.update(&txn).await?;
            }
        }

        let old_status = order.status;
        let version = order.version;
        let mut active: OrderActiveModel = order.into();
        active.status = Set(OrderStatus::Cancelled);
        active.cancel_reason = Set(reason);
        active.cancel_description = Set(description);
        active.cancelled_by = Set(Some(cancelled_by));
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(version + 1);
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        info!(order_id = %order_id, "order cancelled");
        self.emit(Event::OrderStatusChanged {
            order_id,
            old_status,
            new_status: OrderStatus::Cancelled,
        })
        .await;
        self.emit(Event::OrderCancelled(order_id)).await;

        self.to_response(updated).await
    }

    /// Operator action closing the dispute loop: a `delivered_pending` order
    /// with an open report returns to `processing` for re-delivery, the
    /// report is cleared, and outstanding unspent tokens are revoked.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn redeliver(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        let order = self.get_order_model(order_id).await?;
        guard_transition(&order, OrderStatus::Processing, "redeliver")?;

        if !self.has_open_report(order_id).await? {
            return Err(ServiceError::ValidationError(
                "Order has no open delivery report".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        ReportEntity::delete_many()
            .filter(delivery_report::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await?;
        TokenEntity::delete_many()
            .filter(confirmation_token::Column::OrderId.eq(order_id))
            .filter(confirmation_token::Column::UsedAt.is_null())
            .exec(&txn)
            .await?;

        let old_status = order.status;
        let version = order.version;
        let mut active: OrderActiveModel = order.into();
        active.status = Set(OrderStatus::Processing);
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(version + 1);
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        self.emit(Event::DisputeCleared(order_id)).await;
        self.emit(Event::OrderStatusChanged {
            order_id,
            old_status,
            new_status: OrderStatus::Processing,
        })
        .await;

        self.to_response(updated).await
    }

    /// Re-issues the confirmation link for a `delivered_pending` order.
    /// Refused while a dispute is open; the report must be resolved first.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn resend_confirmation(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let order = self.get_order_model(order_id).await?;
        if order.status != OrderStatus::DeliveredPending {
            return Err(ServiceError::InvalidTransition {
                current: order.status.to_string(),
                requested: "resend confirmation".to_string(),
            });
        }
        if self.has_open_report(order_id).await? {
            return Err(ServiceError::Conflict(
                "A delivery report is open for this order".to_string(),
            ));
        }

        TokenEntity::delete_many()
            .filter(confirmation_token::Column::OrderId.eq(order_id))
            .filter(confirmation_token::Column::UsedAt.is_null())
            .exec(&*self.db)
            .await?;

        let token = self.issue_confirmation_token(order_id).await?;
        self.emit(Event::ConfirmationRequested { order_id, token })
            .await;
        Ok(())
    }

    pub async fn has_open_report(&self, order_id: Uuid) -> Result<bool, ServiceError> {
        let count = ReportEntity::find()
            .filter(delivery_report::Column::OrderId.eq(order_id))
            .count(&*self.db)
            .await?;
        Ok(count > 0)
    }

    async fn issue_confirmation_token(&self, order_id: Uuid) -> Result<String, ServiceError> {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        let active = confirmation_token::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            token: Set(token.clone()),
            used_at: Set(None),
            created_at: Set(Utc::now()),
        };
        active.insert(&*self.db).await?;
        Ok(token)
    }

    async fn transition<F>(
        &self,
        order: OrderModel,
        next: OrderStatus,
        mutate: F,
    ) -> Result<OrderModel, ServiceError>
    where
        F: FnOnce(&mut OrderActiveModel),
    {
        let order_id = order.id;
        let old_status = order.status;
        let version = order.version;

        let mut active: OrderActiveModel = order.into();
        active.status = Set(next);
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(version + 1);
        mutate(&mut active);

        let updated = active.update(&*self.db).await?;

        info!(order_id = %order_id, old_status = %old_status, new_status = %next, "order transitioned");
        self.emit(Event::OrderStatusChanged {
            order_id,
            old_status,
            new_status: next,
        })
        .await;

        Ok(updated)
    }

    pub(crate) async fn to_response(&self, model: OrderModel) -> Result<OrderResponse, ServiceError> {
        let has_open_report = self.has_open_report(model.id).await?;
        Ok(order_to_response(model, has_open_report))
    }
}

/// Checks a requested transition against the state-machine table.
pub fn guard_transition(
    order: &OrderModel,
    next: OrderStatus,
    action: &str,
) -> Result<(), ServiceError> {
    if !order.status.can_transition_to(next) {
        return Err(ServiceError::InvalidTransition {
            current: order.status.to_string(),
            requested: action.to_string(),
        });
    }
    Ok(())
}

fn new_order_number(order_id: Uuid) -> String {
    format!(
        "KIN-{}",
        order_id.simple().to_string()[..10].to_uppercase()
    )
}

/// Converts an order model to its response form.
pub fn order_to_response(model: OrderModel, has_open_report: bool) -> OrderResponse {
    OrderResponse {
        id: model.id,
        order_number: model.order_number,
        buyer_id: model.buyer_id,
        seller_id: model.seller_id,
        product_id: model.product_id,
        product_name: model.product_name,
        status: model.status,
        quantity: model.quantity,
        unit_price: model.unit_price,
        subtotal: model.subtotal,
        delivery_charge: model.delivery_charge,
        total_amount: model.total_amount,
        delivery: Destination {
            province: model.delivery_province,
            district: model.delivery_district,
            municipality: model.delivery_municipality,
            ward: model.delivery_ward,
            label: model.delivery_label,
        },
        estimated_delivery_time: model.estimated_delivery_time,
        payment: PaymentView {
            method: model.payment_method,
            status: model.payment_status,
            transaction_uuid: model.transaction_uuid,
        },
        cancellation: model.cancelled_by.map(|by| CancellationView {
            reason: model.cancel_reason,
            description: model.cancel_description,
            cancelled_by: by,
        }),
        has_open_report,
        created_at: model.created_at,
        updated_at: model.updated_at,
        version: model.version,
    }
}
