use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Enum representing the possible statuses of an order.
///
/// The transition table lives in [`OrderStatus::can_transition_to`]; the
/// order service is the only writer and every transition is checked against
/// it there, never re-derived per screen.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    strum::Display, utoipa::ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "delivered_pending")]
    DeliveredPending,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl OrderStatus {
    /// Legal transitions of the order state machine. Monotonic along the
    /// fulfillment path; `cancelled` is reachable from `processing` and
    /// `shipped` only, and the dispute loop re-enters `processing` from
    /// `delivered_pending` via an operator action.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Processing, Shipped)
                | (Shipped, DeliveredPending)
                | (DeliveredPending, Completed)
                | (DeliveredPending, Processing)
                | (Processing, Cancelled)
                | (Shipped, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

/// Supported payment methods.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    strum::Display, utoipa::ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentMethod {
    /// External gateway payment via redirect.
    #[sea_orm(string_value = "esewa")]
    Esewa,
    /// Cash on delivery; acknowledged synchronously, collected at handoff.
    #[sea_orm(string_value = "cod")]
    Cod,
}

/// Payment state embedded on the order.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    strum::Display, utoipa::ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "success")]
    Success,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

/// Who initiated a cancellation.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    strum::Display, utoipa::ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CancelledBy {
    #[sea_orm(string_value = "buyer")]
    Buyer,
    #[sea_orm(string_value = "seller")]
    Seller,
}

/// The `orders` table: one row per checkout attempt.
///
/// `total_amount` is always recomputed server-side from
/// `subtotal + delivery_charge`; the client only ever displays it.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Human-readable, unique, immutable once issued.
    #[sea_orm(unique)]
    #[validate(length(min = 1, max = 50))]
    pub order_number: String,

    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub product_id: Uuid,

    /// Denormalized at creation time so confirmation views never need a
    /// catalog lookup.
    pub product_name: String,

    pub status: OrderStatus,

    pub quantity: i32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
    pub delivery_charge: Decimal,
    pub total_amount: Decimal,

    pub delivery_province: String,
    pub delivery_district: String,
    pub delivery_municipality: String,
    pub delivery_ward: i32,
    pub delivery_label: Option<String>,

    pub estimated_delivery_time: DateTime<Utc>,

    pub payment_method: Option<PaymentMethod>,
    pub payment_status: PaymentStatus,
    /// Present iff the payment method is eSewa and a gateway round-trip has
    /// occurred.
    pub transaction_uuid: Option<Uuid>,

    pub cancel_reason: Option<String>,
    pub cancel_description: Option<String>,
    pub cancelled_by: Option<CancelledBy>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id",
        on_update = "Cascade",
        on_delete = "Restrict"
    )]
    Product,

    #[sea_orm(has_many = "super::delivery_report::Entity")]
    DeliveryReports,

    #[sea_orm(has_many = "super::confirmation_token::Entity")]
    ConfirmationTokens,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl Related<super::delivery_report::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DeliveryReports.def()
    }
}

impl Related<super::confirmation_token::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ConfirmationTokens.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::OrderStatus::*;

    #[test]
    fn fulfillment_path_is_monotonic() {
        assert!(Processing.can_transition_to(Shipped));
        assert!(Shipped.can_transition_to(DeliveredPending));
        assert!(DeliveredPending.can_transition_to(Completed));

        // No skipping shipped or delivered_pending.
        assert!(!Processing.can_transition_to(DeliveredPending));
        assert!(!Processing.can_transition_to(Completed));
        assert!(!Shipped.can_transition_to(Completed));
    }

    #[test]
    fn cancellation_window_closes_at_delivered_pending() {
        assert!(Processing.can_transition_to(Cancelled));
        assert!(Shipped.can_transition_to(Cancelled));
        assert!(!DeliveredPending.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Cancelled));
    }

    #[test]
    fn dispute_loop_reenters_processing() {
        assert!(DeliveredPending.can_transition_to(Processing));
        assert!(!Completed.can_transition_to(Processing));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for next in [Processing, Shipped, DeliveredPending, Completed, Cancelled] {
            assert!(!Completed.can_transition_to(next));
            assert!(!Cancelled.can_transition_to(next));
        }
        assert!(Completed.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(!DeliveredPending.is_terminal());
    }
}
