use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-item ledger of a consignment.
/// Invariant: `0 <= quantity_returned + quantity_invoiced <= quantity_delivered`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "consignment_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub consignment_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub product_sku: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub unit_price: Decimal,
    pub quantity_delivered: i32,
    pub quantity_returned: i32,
    pub quantity_invoiced: i32,
}

impl Model {
    pub fn available(&self) -> i32 {
        self.quantity_delivered - self.quantity_returned - self.quantity_invoiced
    }

    pub fn is_settled(&self) -> bool {
        self.quantity_returned + self.quantity_invoiced == self.quantity_delivered
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::consignment::Entity",
        from = "Column::ConsignmentId",
        to = "super::consignment::Column::Id"
    )]
    Consignment,
}

impl Related<super::consignment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Consignment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
