use std::sync::Arc;

use rust_decimal::Decimal;
use sea_orm::EntityTrait;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::product::{self, Entity as ProductEntity},
    errors::ServiceError,
};

/// Result of a stock check: the authoritative unit price and stock level at
/// the time of the call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockCheck {
    pub available_price: Decimal,
    pub available_stock: i32,
}

/// Clamps a requested quantity to what is actually available, with a floor
/// of one unit.
pub fn clamp_quantity(requested: i32, available: i32) -> i32 {
    requested.min(available).max(1)
}

/// The sole source of truth for quantity bounds.
///
/// `validate` is idempotent and side-effect-free; it never reserves stock.
/// Callers clamp to `available_stock` on failure and surface the condition
/// to the user instead of silently failing.
#[derive(Clone)]
pub struct StockValidator {
    db: Arc<DbPool>,
}

impl StockValidator {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Fetches the product row backing a checkout.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn fetch_product(&self, product_id: Uuid) -> Result<product::Model, ServiceError> {
        ProductEntity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }

    /// Checks whether `quantity` units of the product are satisfiable.
    #[instrument(skip(self), fields(product_id = %product_id, quantity = quantity))]
    pub async fn validate(
        &self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<StockCheck, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let product = self.fetch_product(product_id).await?;
        check_against(&product, quantity)
    }
}

/// The same check applied to an already-loaded product row; used by the
/// order and payment services inside their own transactions.
pub fn check_against(product: &product::Model, quantity: i32) -> Result<StockCheck, ServiceError> {
    if quantity > product.stock {
        warn!(
            product_id = %product.id,
            requested = quantity,
            available = product.stock,
            "insufficient stock"
        );
        return Err(ServiceError::InsufficientStock {
            requested: quantity,
            available_stock: product.stock,
        });
    }

    Ok(StockCheck {
        available_price: product.unit_price,
        available_stock: product.stock,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn sample_product(stock: i32) -> product::Model {
        product::Model {
            id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            name: "Handwoven dhaka topi".to_string(),
            unit_price: dec!(450.00),
            stock,
            seller_province: "Bagmati".to_string(),
            seller_district: "Kathmandu".to_string(),
            seller_municipality: "Kathmandu".to_string(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn satisfiable_quantity_returns_price_and_stock() {
        let product = sample_product(5);
        let check = check_against(&product, 3).unwrap();
        assert_eq!(check.available_price, dec!(450.00));
        assert_eq!(check.available_stock, 5);
    }

    #[test]
    fn excess_quantity_reports_available_stock() {
        let product = sample_product(5);
        match check_against(&product, 7) {
            Err(ServiceError::InsufficientStock {
                requested,
                available_stock,
            }) => {
                assert_eq!(requested, 7);
                assert_eq!(available_stock, 5);
            }
            other => panic!("expected InsufficientStock, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn clamp_respects_floor_and_ceiling() {
        assert_eq!(clamp_quantity(7, 5), 5);
        assert_eq!(clamp_quantity(3, 5), 3);
        assert_eq!(clamp_quantity(0, 5), 1);
        assert_eq!(clamp_quantity(4, 0), 1);
    }
}
