//! Gap-free document numbering.
//!
//! Every number comes from a single `INSERT .. ON CONFLICT (key) DO UPDATE
//! SET last_number = last_number + 1 RETURNING last_number`, so concurrent
//! callers on the same key never observe the same value. Call it with the
//! enclosing transaction: a rolled-back document gives its number back.

use chrono::{Datelike, Utc};
use sea_orm::sea_query::{Expr, OnConflict, Query};
use sea_orm::ConnectionTrait;
use tracing::{debug, error};

use crate::entities::document_sequence::{Column, Entity};
use crate::errors::ServiceError;
use crate::services::fiscal::InvoiceType;

/// Fiscal invoice numbers have eight digits.
pub const MAX_INVOICE_NUMBER: i64 = 99_999_999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Quotation,
    Consignment,
    ConsignmentReturn,
    Sale,
}

impl DocumentKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            DocumentKind::Quotation => "PRES",
            DocumentKind::Consignment => "CONS",
            DocumentKind::ConsignmentReturn => "DEV",
            DocumentKind::Sale => "VTA",
        }
    }
}

pub fn document_sequence_key(kind: DocumentKind, year: i32) -> String {
    format!("{}-{}", kind.prefix(), year)
}

pub fn format_document_code(kind: DocumentKind, year: i32, number: i64) -> String {
    format!("{}-{}-{:05}", kind.prefix(), year, number)
}

pub fn invoice_sequence_key(point_of_sale: i32, invoice_type: InvoiceType) -> String {
    format!("INVOICE-{:04}-{}", point_of_sale, invoice_type.as_str())
}

/// `0001-00000042`
pub fn format_invoice_number(point_of_sale: i32, number: i64) -> String {
    format!("{:04}-{:08}", point_of_sale, number)
}

/// Allocates the next number for `key`, starting at 1.
pub async fn next_number<C>(conn: &C, key: &str) -> Result<i64, ServiceError>
where
    C: ConnectionTrait,
{
    let now = Utc::now();
    let mut insert = Query::insert();
    insert
        .into_table(Entity)
        .columns([Column::Key, Column::LastNumber, Column::UpdatedAt]);
    insert
        .values([key.into(), 1i64.into(), now.into()])
        .map_err(|e| ServiceError::SequenceExhausted(format!("{}: {}", key, e)))?;
    insert
        .on_conflict(
            OnConflict::column(Column::Key)
                .value(
                    Column::LastNumber,
                    Expr::col((Entity, Column::LastNumber)).add(1),
                )
                .value(Column::UpdatedAt, now)
                .to_owned(),
        )
        .returning_col(Column::LastNumber);

    let statement = conn.get_database_backend().build(&insert);
    let row = conn
        .query_one(statement)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| {
            error!(key, "sequence upsert returned no row");
            ServiceError::SequenceExhausted(key.to_string())
        })?;

    let number: i64 = row
        .try_get("", "last_number")
        .map_err(|e| ServiceError::SequenceExhausted(format!("{}: {}", key, e)))?;
    debug!(key, number, "allocated sequence number");
    Ok(number)
}

/// Allocates a yearly document code such as `PRES-2024-00017`.
pub async fn next_document_code<C>(conn: &C, kind: DocumentKind) -> Result<String, ServiceError>
where
    C: ConnectionTrait,
{
    let year = Utc::now().year();
    let number = next_number(conn, &document_sequence_key(kind, year)).await?;
    Ok(format_document_code(kind, year, number))
}

/// Allocates the next fiscal number for a point of sale and invoice type.
pub async fn next_invoice_number<C>(
    conn: &C,
    point_of_sale: i32,
    invoice_type: InvoiceType,
) -> Result<i64, ServiceError>
where
    C: ConnectionTrait,
{
    let key = invoice_sequence_key(point_of_sale, invoice_type);
    let number = next_number(conn, &key).await?;
    if number > MAX_INVOICE_NUMBER {
        return Err(ServiceError::SequenceExhausted(key));
    }
    Ok(number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_codes_are_zero_padded() {
        assert_eq!(
            format_document_code(DocumentKind::Quotation, 2024, 17),
            "PRES-2024-00017"
        );
        assert_eq!(
            format_document_code(DocumentKind::ConsignmentReturn, 2025, 1),
            "DEV-2025-00001"
        );
        assert_eq!(
            format_document_code(DocumentKind::Sale, 2024, 123456),
            "VTA-2024-123456"
        );
    }

    #[test]
    fn invoice_numbers_render_with_point_of_sale() {
        assert_eq!(format_invoice_number(1, 42), "0001-00000042");
        assert_eq!(format_invoice_number(12, 99_999_999), "0012-99999999");
    }

    #[test]
    fn invoice_keys_are_scoped_by_type() {
        assert_ne!(
            invoice_sequence_key(1, InvoiceType::FacturaA),
            invoice_sequence_key(1, InvoiceType::FacturaB)
        );
        assert_eq!(
            invoice_sequence_key(3, InvoiceType::FacturaA),
            "INVOICE-0003-FACTURA_A"
        );
    }
}
