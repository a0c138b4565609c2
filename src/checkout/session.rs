use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::delivery_fee::Destination;

/// Pages of the checkout flow, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStep {
    Detail,
    Location,
    Payment,
    Receipt,
}

impl CheckoutStep {
    /// Maps a checkout route back to its step, for resuming a flow at the
    /// page the buyer left it on.
    pub fn from_route(path: &str) -> Option<Self> {
        match path.trim_end_matches('/') {
            "/checkout" | "/checkout/detail" => Some(Self::Detail),
            "/checkout/location" => Some(Self::Location),
            "/checkout/payment" => Some(Self::Payment),
            "/checkout/receipt" => Some(Self::Receipt),
            _ => None,
        }
    }

    pub fn route(&self) -> &'static str {
        match self {
            Self::Detail => "/checkout/detail",
            Self::Location => "/checkout/location",
            Self::Payment => "/checkout/payment",
            Self::Receipt => "/checkout/receipt",
        }
    }
}

/// Per-buyer checkout state, serialized into the session store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub buyer_id: Uuid,
    pub product_id: Uuid,
    pub seller_id: Uuid,
    pub step: CheckoutStep,

    pub quantity: i32,
    pub unit_price: Decimal,
    /// Stock level from the most recent validation; quantity edits clamp to
    /// this without interrupting the buyer.
    pub available_stock: i32,

    pub destination: Option<Destination>,
    pub delivery_charge: Option<Decimal>,
    pub estimated_delivery: Option<DateTime<Utc>>,

    /// Set once the first order save succeeds; later saves update the same
    /// order in place.
    pub order_id: Option<Uuid>,
    pub order_number: Option<String>,

    /// Monotonic counter for in-flight revalidations. A response is applied
    /// only if no newer request was issued while it was in flight.
    pub seq: u64,

    /// One-time receipt banner after a gateway return; cleared on first read.
    pub gateway_notice: Option<String>,
}

impl CheckoutSession {
    pub fn new(
        buyer_id: Uuid,
        product_id: Uuid,
        seller_id: Uuid,
        unit_price: Decimal,
        available_stock: i32,
    ) -> Self {
        Self {
            buyer_id,
            product_id,
            seller_id,
            step: CheckoutStep::Detail,
            quantity: 1,
            unit_price,
            available_stock,
            destination: None,
            delivery_charge: None,
            estimated_delivery: None,
            order_id: None,
            order_number: None,
            seq: 0,
            gateway_notice: None,
        }
    }

    pub fn subtotal(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }

    pub fn total(&self) -> Option<Decimal> {
        self.delivery_charge.map(|charge| self.subtotal() + charge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn routes_round_trip_through_steps() {
        for step in [
            CheckoutStep::Detail,
            CheckoutStep::Location,
            CheckoutStep::Payment,
            CheckoutStep::Receipt,
        ] {
            assert_eq!(CheckoutStep::from_route(step.route()), Some(step));
        }
        assert_eq!(CheckoutStep::from_route("/checkout"), Some(CheckoutStep::Detail));
        assert_eq!(CheckoutStep::from_route("/checkout/payment/"), Some(CheckoutStep::Payment));
        assert_eq!(CheckoutStep::from_route("/orders/123"), None);
    }

    #[test]
    fn totals_require_a_delivery_quote() {
        let mut session = CheckoutSession::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            dec!(450.00),
            5,
        );
        session.quantity = 3;
        assert_eq!(session.subtotal(), dec!(1350.00));
        assert_eq!(session.total(), None);

        session.delivery_charge = Some(dec!(80));
        assert_eq!(session.total(), Some(dec!(1430.00)));
    }
}
