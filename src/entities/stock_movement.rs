use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Why stock moved. Stored as its `as_str` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementReason {
    ConsignmentDelivery,
    ConsignmentReturn,
    ConsignmentReturnDamaged,
    QuotationSale,
}

impl MovementReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementReason::ConsignmentDelivery => "CONSIGNMENT_DELIVERY",
            MovementReason::ConsignmentReturn => "CONSIGNMENT_RETURN",
            MovementReason::ConsignmentReturnDamaged => "CONSIGNMENT_RETURN_DAMAGED",
            MovementReason::QuotationSale => "QUOTATION_SALE",
        }
    }
}

/// Append-only ledger row; quantity is negative for deductions.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_movements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub product_id: Uuid,
    pub lot_id: Option<Uuid>,
    pub quantity: i32,
    pub reason: String,
    pub reference_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
