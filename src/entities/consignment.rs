use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsignmentStatus {
    Active,
    PartiallyReturned,
    PartiallyInvoiced,
    Closed,
}

impl ConsignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsignmentStatus::Active => "ACTIVE",
            ConsignmentStatus::PartiallyReturned => "PARTIALLY_RETURNED",
            ConsignmentStatus::PartiallyInvoiced => "PARTIALLY_INVOICED",
            ConsignmentStatus::Closed => "CLOSED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(ConsignmentStatus::Active),
            "PARTIALLY_RETURNED" => Some(ConsignmentStatus::PartiallyReturned),
            "PARTIALLY_INVOICED" => Some(ConsignmentStatus::PartiallyInvoiced),
            "CLOSED" => Some(ConsignmentStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "consignments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    pub customer_id: Uuid,
    pub quotation_id: Option<Uuid>,
    pub status: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_value: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub returned_value: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub invoiced_value: Decimal,
    pub notes: Option<String>,
    pub delivered_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn is_closed(&self) -> bool {
        self.status == ConsignmentStatus::Closed.as_str()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::consignment_item::Entity")]
    Items,
    #[sea_orm(has_many = "super::consignment_return::Entity")]
    Returns,
}

impl Related<super::consignment_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl Related<super::consignment_return::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Returns.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
