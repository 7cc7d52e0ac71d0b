use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Quotation lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuotationStatus {
    Draft,
    Sent,
    Accepted,
    Rejected,
    Expired,
    Invoiced,
}

impl QuotationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotationStatus::Draft => "DRAFT",
            QuotationStatus::Sent => "SENT",
            QuotationStatus::Accepted => "ACCEPTED",
            QuotationStatus::Rejected => "REJECTED",
            QuotationStatus::Expired => "EXPIRED",
            QuotationStatus::Invoiced => "INVOICED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(QuotationStatus::Draft),
            "SENT" => Some(QuotationStatus::Sent),
            "ACCEPTED" => Some(QuotationStatus::Accepted),
            "REJECTED" => Some(QuotationStatus::Rejected),
            "EXPIRED" => Some(QuotationStatus::Expired),
            "INVOICED" => Some(QuotationStatus::Invoiced),
            _ => None,
        }
    }

    /// Statuses that lapse into EXPIRED once `valid_until` passes.
    pub fn can_expire(&self) -> bool {
        matches!(self, QuotationStatus::Draft | QuotationStatus::Sent)
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "quotations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    pub customer_id: Uuid,
    pub status: String,
    pub valid_until: DateTime<Utc>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub subtotal: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub tax_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total: Decimal,
    pub notes: Option<String>,
    pub terms_and_conditions: Option<String>,
    pub converted_to_sale_id: Option<Uuid>,
    pub converted_to_consignment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn status(&self) -> Option<QuotationStatus> {
        QuotationStatus::from_str(&self.status)
    }

    pub fn is_past_validity(&self, now: DateTime<Utc>) -> bool {
        now > self.valid_until
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::quotation_item::Entity")]
    Items,
}

impl Related<super::quotation_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
