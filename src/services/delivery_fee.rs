use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::entities::product;

/// Structured delivery destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, ToSchema)]
pub struct Destination {
    #[validate(length(min = 1, message = "Province is required"))]
    pub province: String,
    #[validate(length(min = 1, message = "District is required"))]
    pub district: String,
    #[validate(length(min = 1, message = "Municipality is required"))]
    pub municipality: String,
    #[validate(range(min = 1, max = 35, message = "Ward must be between 1 and 35"))]
    pub ward: i32,
    /// Free-text label shown alongside the structured address.
    pub label: Option<String>,
}

/// A delivery charge and the estimated delivery date it implies.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeliveryQuote {
    pub charge: Decimal,
    pub estimated_delivery: DateTime<Utc>,
}

/// Computes delivery charges from the seller's location and the buyer's
/// destination. Invoked on every quantity or destination change; the quote
/// is a pure function of its inputs.
#[derive(Clone, Default)]
pub struct DeliveryFeeCalculator;

impl DeliveryFeeCalculator {
    pub fn new() -> Self {
        Self
    }

    pub fn quote(&self, seller: &product::Model, destination: &Destination) -> DeliveryQuote {
        self.quote_at(seller, destination, Utc::now())
    }

    /// Same as [`quote`](Self::quote) with an explicit clock, so estimated
    /// dates are deterministic under test.
    pub fn quote_at(
        &self,
        seller: &product::Model,
        destination: &Destination,
        now: DateTime<Utc>,
    ) -> DeliveryQuote {
        let same = |a: &str, b: &str| a.trim().eq_ignore_ascii_case(b.trim());

        let (charge, days) = if same(&seller.seller_district, &destination.district)
            && same(&seller.seller_municipality, &destination.municipality)
        {
            (dec!(60), 1)
        } else if same(&seller.seller_district, &destination.district) {
            (dec!(80), 2)
        } else if same(&seller.seller_province, &destination.province) {
            (dec!(120), 3)
        } else {
            (dec!(180), 5)
        };

        DeliveryQuote {
            charge,
            estimated_delivery: now + Duration::days(days),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn seller_in(province: &str, district: &str, municipality: &str) -> product::Model {
        product::Model {
            id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            name: "Nettle-fiber shawl".to_string(),
            unit_price: dec!(1200.00),
            stock: 10,
            seller_province: province.to_string(),
            seller_district: district.to_string(),
            seller_municipality: municipality.to_string(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn destination(province: &str, district: &str, municipality: &str) -> Destination {
        Destination {
            province: province.to_string(),
            district: district.to_string(),
            municipality: municipality.to_string(),
            ward: 4,
            label: None,
        }
    }

    #[test]
    fn same_municipality_is_cheapest_and_fastest() {
        let calc = DeliveryFeeCalculator::new();
        let seller = seller_in("Bagmati", "Kathmandu", "Kathmandu");
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        let quote = calc.quote_at(&seller, &destination("Bagmati", "Kathmandu", "Kathmandu"), now);
        assert_eq!(quote.charge, dec!(60));
        assert_eq!(quote.estimated_delivery, now + Duration::days(1));
    }

    #[test]
    fn charge_tiers_widen_with_distance() {
        let calc = DeliveryFeeCalculator::new();
        let seller = seller_in("Bagmati", "Kathmandu", "Kathmandu");

        let in_district = calc.quote(&seller, &destination("Bagmati", "Kathmandu", "Kirtipur"));
        let in_province = calc.quote(&seller, &destination("Bagmati", "Lalitpur", "Godawari"));
        let cross_country = calc.quote(&seller, &destination("Gandaki", "Kaski", "Pokhara"));

        assert_eq!(in_district.charge, dec!(80));
        assert_eq!(in_province.charge, dec!(120));
        assert_eq!(cross_country.charge, dec!(180));
    }

    #[test]
    fn comparison_ignores_case_and_whitespace() {
        let calc = DeliveryFeeCalculator::new();
        let seller = seller_in("Bagmati", "Kathmandu", "Kathmandu");
        let quote = calc.quote(&seller, &destination("bagmati", " KATHMANDU ", "kathmandu"));
        assert_eq!(quote.charge, dec!(60));
    }
}
