use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceStatus {
    Issued,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Issued => "ISSUED",
        }
    }
}

/// Fiscal invoice documenting exactly one sale.
/// `(point_of_sale, invoice_type, number)` is unique.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "invoices")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub sale_id: Uuid,
    pub invoice_type: String,
    pub status: String,
    pub point_of_sale: i32,
    pub number: i64,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub customer_tax_id: Option<String>,
    pub customer_tax_condition: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub subtotal: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub tax_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total: Decimal,
    pub cae: String,
    pub cae_expiration: NaiveDate,
    pub issued_at: DateTime<Utc>,
}

impl Model {
    /// Display form, e.g. `0001-00000042`.
    pub fn display_number(&self) -> String {
        crate::services::sequences::format_invoice_number(self.point_of_sale, self.number)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::sale::Entity",
        from = "Column::SaleId",
        to = "super::sale::Column::Id"
    )]
    Sale,
}

impl Related<super::sale::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sale.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
