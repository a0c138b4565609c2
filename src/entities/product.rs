use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// The `products` table.
///
/// Carries the authoritative unit price and stock level, plus the seller's
/// location used as the origin for delivery-fee computation.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub seller_id: Uuid,

    #[validate(length(min = 1, max = 200, message = "Product name is required"))]
    pub name: String,

    /// Authoritative unit price; order totals are always recomputed from it.
    pub unit_price: Decimal,

    /// Units currently available; the stock validator reads it, payment
    /// confirmation decrements it.
    pub stock: i32,

    pub seller_province: String,
    pub seller_district: String,
    pub seller_municipality: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order::Entity")]
    Orders,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
