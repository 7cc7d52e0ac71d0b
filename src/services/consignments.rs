use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::db;
use crate::entities::consignment::{self, ConsignmentStatus};
use crate::entities::consignment_item;
use crate::entities::consignment_return;
use crate::entities::consignment_return_item::{self, ReturnCondition};
use crate::entities::quotation::{self, QuotationStatus};
use crate::entities::stock_movement::MovementReason;
use crate::errors::ServiceError;
use crate::events::{EventSender, SettlementEvent};
use crate::services::audit::{AuditEvent, AuditSink};
use crate::services::catalog::{CatalogLookup, ProductSnapshot};
use crate::services::pricing::{extended_amount, net_unit_price, PricingResolver};
use crate::services::quotations::{ensure_convertible, load_quotation, load_quotation_items};
use crate::services::sequences::{next_document_code, DocumentKind};
use crate::services::stock_ledger::StockLedger;

const RESOURCE: &str = "consignment";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsignmentLineInput {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateConsignmentInput {
    pub customer_id: Uuid,
    #[validate(length(min = 1))]
    pub items: Vec<ConsignmentLineInput>,
    pub notes: Option<String>,
}

/// Quantity of a delivered product to return or invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementLineInput {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ProcessReturnInput {
    #[validate(length(min = 1))]
    pub items: Vec<SettlementLineInput>,
    pub condition: ReturnCondition,
    pub reason: Option<String>,
    pub received_by: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReturnDetail {
    #[serde(rename = "return")]
    pub header: consignment_return::Model,
    pub items: Vec<consignment_return_item::Model>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsignmentDetail {
    pub consignment: consignment::Model,
    pub items: Vec<consignment_item::Model>,
    pub returns: Vec<ReturnDetail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReturnOutcome {
    pub consignment: consignment::Model,
    pub receipt: ReturnDetail,
    pub closed: bool,
}

/// Per-item quantity still out with the customer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvailableItem {
    pub consignment_item_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub product_sku: String,
    pub unit_price: Decimal,
    pub available: i32,
}

/// A product line ready to be delivered at a fixed unit price.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryLine {
    pub product: ProductSnapshot,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// Merges lines for the same product, keeping first-seen order. The merged
/// unit price is the quantity-weighted average, so the delivered value is
/// unchanged.
pub fn merge_delivery_lines(lines: Vec<DeliveryLine>) -> Result<Vec<DeliveryLine>, ServiceError> {
    let mut merged: Vec<DeliveryLine> = Vec::with_capacity(lines.len());
    for line in lines {
        let Some(existing) = merged.iter_mut().find(|m| m.product.id == line.product.id) else {
            merged.push(line);
            continue;
        };
        let quantity = existing.quantity.checked_add(line.quantity).ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "quantity overflow for product {}",
                line.product.id
            ))
        })?;
        if existing.unit_price != line.unit_price {
            let value = extended_amount(existing.product.id, existing.quantity, existing.unit_price)?
                + extended_amount(line.product.id, line.quantity, line.unit_price)?;
            existing.unit_price = value / Decimal::from(quantity);
        }
        existing.quantity = quantity;
    }
    Ok(merged)
}

/// Sums requested quantities per product, keeping first-seen order.
pub(crate) fn aggregate_lines(lines: &[SettlementLineInput]) -> Result<Vec<(Uuid, i32)>, ServiceError> {
    let mut totals: Vec<(Uuid, i32)> = Vec::with_capacity(lines.len());
    for line in lines {
        if line.quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "quantity for product {} must be positive, got {}",
                line.product_id, line.quantity
            )));
        }
        match totals.iter_mut().find(|(product_id, _)| *product_id == line.product_id) {
            Some((_, quantity)) => {
                *quantity = quantity.checked_add(line.quantity).ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "quantity overflow for product {}",
                        line.product_id
                    ))
                })?;
            }
            None => totals.push((line.product_id, line.quantity)),
        }
    }
    Ok(totals)
}

/// A validated claim on a consignment item's remaining quantity.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ItemClaim<'a> {
    pub item: &'a consignment_item::Model,
    pub quantity: i32,
}

/// Validates every requested line against the items before anything is
/// written. Fails on the first line that exceeds its available quantity.
pub(crate) fn match_claims<'a>(
    items: &'a [consignment_item::Model],
    requested: &[(Uuid, i32)],
) -> Result<Vec<ItemClaim<'a>>, ServiceError> {
    requested
        .iter()
        .map(|&(product_id, quantity)| {
            let item = items
                .iter()
                .find(|item| item.product_id == product_id)
                .ok_or(ServiceError::InvalidQuantity {
                    product_id,
                    available: 0,
                    requested: quantity,
                })?;
            if quantity > item.available() {
                return Err(ServiceError::InvalidQuantity {
                    product_id,
                    available: item.available(),
                    requested: quantity,
                });
            }
            Ok(ItemClaim { item, quantity })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClaimKind {
    Returned,
    Invoiced,
}

/// Adds `quantity` to the returned or invoiced counter of an item, guarded
/// so that `returned + invoiced` can never exceed `delivered`.
pub(crate) async fn claim_item<C>(
    conn: &C,
    item: &consignment_item::Model,
    quantity: i32,
    kind: ClaimKind,
) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    let column = match kind {
        ClaimKind::Returned => consignment_item::Column::QuantityReturned,
        ClaimKind::Invoiced => consignment_item::Column::QuantityInvoiced,
    };
    let settled = Expr::expr(
        Expr::col(consignment_item::Column::QuantityReturned)
            .add(Expr::col(consignment_item::Column::QuantityInvoiced)),
    )
    .add(quantity);

    let result = consignment_item::Entity::update_many()
        .col_expr(column, Expr::col(column).add(quantity))
        .filter(consignment_item::Column::Id.eq(item.id))
        .filter(Expr::col(consignment_item::Column::QuantityDelivered).gte(settled))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;

    if result.rows_affected == 0 {
        let available = consignment_item::Entity::find_by_id(item.id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .map(|latest| latest.available())
            .unwrap_or(0);
        return Err(ServiceError::InvalidQuantity {
            product_id: item.product_id,
            available,
            requested: quantity,
        });
    }
    Ok(())
}

pub(crate) async fn load_consignment<C>(conn: &C, id: Uuid) -> Result<consignment::Model, ServiceError>
where
    C: ConnectionTrait,
{
    consignment::Entity::find_by_id(id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::not_found("Consignment", id))
}

pub(crate) async fn load_consignment_items<C>(
    conn: &C,
    consignment_id: Uuid,
) -> Result<Vec<consignment_item::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    consignment_item::Entity::find()
        .filter(consignment_item::Column::ConsignmentId.eq(consignment_id))
        .order_by_asc(consignment_item::Column::ProductName)
        .order_by_asc(consignment_item::Column::Id)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

pub(crate) fn closed_error(model: &consignment::Model, operation: &'static str) -> ServiceError {
    ServiceError::InvalidState {
        entity: RESOURCE,
        id: model.id,
        status: model.status.clone(),
        operation,
    }
}

/// Closes the consignment when every item is fully returned or invoiced.
/// Returns the close timestamp when this call closed it.
pub(crate) async fn close_if_settled<C>(
    conn: &C,
    consignment_id: Uuid,
) -> Result<Option<DateTime<Utc>>, ServiceError>
where
    C: ConnectionTrait,
{
    let items = load_consignment_items(conn, consignment_id).await?;
    if items.is_empty() || !items.iter().all(|item| item.is_settled()) {
        return Ok(None);
    }

    let now = Utc::now();
    let result = consignment::Entity::update_many()
        .col_expr(
            consignment::Column::Status,
            Expr::value(ConsignmentStatus::Closed.as_str()),
        )
        .col_expr(consignment::Column::ClosedAt, Expr::value(now))
        .col_expr(consignment::Column::UpdatedAt, Expr::value(now))
        .filter(consignment::Column::Id.eq(consignment_id))
        .filter(consignment::Column::Status.ne(ConsignmentStatus::Closed.as_str()))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;

    Ok((result.rows_affected > 0).then_some(now))
}

#[derive(Clone)]
pub struct ConsignmentService {
    db: Arc<DatabaseConnection>,
    catalog: Arc<dyn CatalogLookup>,
    pricing: PricingResolver,
    audit: Arc<dyn AuditSink>,
    events: EventSender,
}

impl ConsignmentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        catalog: Arc<dyn CatalogLookup>,
        audit: Arc<dyn AuditSink>,
        events: EventSender,
    ) -> Self {
        Self {
            db,
            pricing: PricingResolver::new(catalog.clone()),
            catalog,
            audit,
            events,
        }
    }

    async fn audited<T>(
        &self,
        action: &str,
        resource_id: Option<Uuid>,
        result: Result<T, ServiceError>,
        id_of: impl Fn(&T) -> Uuid,
    ) -> Result<T, ServiceError> {
        let event = match &result {
            Ok(value) => AuditEvent::success(RESOURCE, action, id_of(value)),
            Err(e) => AuditEvent::failure(RESOURCE, action, resource_id, e),
        };
        self.audit.record(event).await;
        result
    }

    fn closed(&self, consignment_id: Uuid, closed_at: Option<DateTime<Utc>>) {
        if let Some(closed_at) = closed_at {
            info!(%consignment_id, "consignment closed");
            self.events.emit(SettlementEvent::ConsignmentClosed {
                consignment_id,
                closed_at,
            });
        }
    }

    /// Validates stock for every line, then stores the consignment with its
    /// items and deducts stock. Runs inside the caller's transaction.
    async fn deliver(
        &self,
        txn: &DatabaseTransaction,
        customer_id: Uuid,
        lines: &[DeliveryLine],
        notes: Option<String>,
        quotation_id: Option<Uuid>,
    ) -> Result<Uuid, ServiceError> {
        for line in lines {
            let available = StockLedger::available_quantity(txn, line.product.id).await?;
            if available < line.quantity {
                warn!(
                    product_id = %line.product.id,
                    available,
                    requested = line.quantity,
                    "consignment rejected for insufficient stock"
                );
                return Err(ServiceError::InsufficientStock {
                    product_id: line.product.id,
                    available,
                    requested: line.quantity,
                });
            }
        }

        let code = next_document_code(txn, DocumentKind::Consignment).await?;
        let id = Uuid::new_v4();
        let now = Utc::now();
        let mut total_value = Decimal::ZERO;
        for line in lines {
            total_value += extended_amount(line.product.id, line.quantity, line.unit_price)?;
        }

        consignment::ActiveModel {
            id: Set(id),
            code: Set(code.clone()),
            customer_id: Set(customer_id),
            quotation_id: Set(quotation_id),
            status: Set(ConsignmentStatus::Active.as_str().to_string()),
            total_value: Set(total_value),
            returned_value: Set(Decimal::ZERO),
            invoiced_value: Set(Decimal::ZERO),
            notes: Set(notes),
            delivered_at: Set(now),
            closed_at: Set(None),
            updated_at: Set(now),
        }
        .insert(txn)
        .await
        .map_err(ServiceError::db_error)?;

        let items = lines.iter().map(|line| consignment_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            consignment_id: Set(id),
            product_id: Set(line.product.id),
            product_name: Set(line.product.name.clone()),
            product_sku: Set(line.product.sku.clone()),
            unit_price: Set(line.unit_price),
            quantity_delivered: Set(line.quantity),
            quantity_returned: Set(0),
            quantity_invoiced: Set(0),
        });
        consignment_item::Entity::insert_many(items)
            .exec_without_returning(txn)
            .await
            .map_err(ServiceError::db_error)?;

        for line in lines {
            StockLedger::deduct(
                txn,
                line.product.id,
                line.quantity,
                MovementReason::ConsignmentDelivery,
                id,
            )
            .await?;
        }

        info!(consignment_id = %id, %code, %total_value, "consignment delivered");
        Ok(id)
    }

    /// Delivers goods on consignment. All-or-nothing: any line short on stock
    /// fails the call before anything is stored or deducted.
    #[instrument(skip(self, input), fields(customer_id = %input.customer_id))]
    pub async fn create(&self, input: CreateConsignmentInput) -> Result<ConsignmentDetail, ServiceError> {
        let result = self.create_inner(input).await;
        self.audited("create", None, result, |d| d.consignment.id).await
    }

    async fn create_inner(&self, input: CreateConsignmentInput) -> Result<ConsignmentDetail, ServiceError> {
        input.validate()?;
        let customer = self.catalog.get_customer(input.customer_id).await?;

        let mut lines = Vec::with_capacity(input.items.len());
        for item in &input.items {
            if item.quantity <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "quantity for product {} must be positive, got {}",
                    item.product_id, item.quantity
                )));
            }
            let product = self.catalog.get_product(item.product_id).await?;
            let unit_price = self
                .pricing
                .resolve_unit_price(&customer, &product, item.unit_price)
                .await?;
            if unit_price < Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "unit price for product {} must not be negative",
                    item.product_id
                )));
            }
            extended_amount(item.product_id, item.quantity, unit_price)?;
            lines.push(DeliveryLine {
                product,
                quantity: item.quantity,
                unit_price,
            });
        }
        let lines = merge_delivery_lines(lines)?;

        let started = Instant::now();
        let txn = db::begin(&self.db).await?;
        let id = self
            .deliver(&txn, customer.id, &lines, input.notes, None)
            .await?;
        db::commit(txn, started).await?;

        self.find_one(id).await
    }

    /// Delivers an ACCEPTED quotation on consignment at its net unit prices.
    /// The quotation moves to INVOICED and points at the new consignment.
    #[instrument(skip(self))]
    pub async fn create_from_quotation(&self, quotation_id: Uuid) -> Result<ConsignmentDetail, ServiceError> {
        let result = self.create_from_quotation_inner(quotation_id).await;
        self.audited("create_from_quotation", None, result, |d| d.consignment.id)
            .await
    }

    async fn create_from_quotation_inner(
        &self,
        quotation_id: Uuid,
    ) -> Result<ConsignmentDetail, ServiceError> {
        let source = load_quotation(&*self.db, quotation_id).await?;
        ensure_convertible(&source, "consign")?;
        let customer = self.catalog.get_customer(source.customer_id).await?;

        let mut lines = Vec::new();
        for item in load_quotation_items(&*self.db, quotation_id).await? {
            let product = self.catalog.get_product(item.product_id).await?;
            lines.push(DeliveryLine {
                // Names come from the quotation snapshot, not the live catalog
                product: ProductSnapshot {
                    name: item.product_name.clone(),
                    sku: item.product_sku.clone(),
                    ..product
                },
                quantity: item.quantity,
                unit_price: net_unit_price(item.unit_price, item.discount_percent),
            });
        }
        let lines = merge_delivery_lines(lines)?;

        let started = Instant::now();
        let txn = db::begin(&self.db).await?;
        let id = self
            .deliver(&txn, customer.id, &lines, source.notes.clone(), Some(quotation_id))
            .await?;

        let now = Utc::now();
        let result = quotation::Entity::update_many()
            .col_expr(
                quotation::Column::Status,
                Expr::value(QuotationStatus::Invoiced.as_str()),
            )
            .col_expr(quotation::Column::ConvertedToConsignmentId, Expr::value(id))
            .col_expr(quotation::Column::UpdatedAt, Expr::value(now))
            .filter(quotation::Column::Id.eq(quotation_id))
            .filter(quotation::Column::Status.eq(QuotationStatus::Accepted.as_str()))
            .filter(quotation::Column::ValidUntil.gte(now))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        if result.rows_affected == 0 {
            let latest = load_quotation(&txn, quotation_id).await?;
            ensure_convertible(&latest, "consign")?;
            return Err(ServiceError::Retryable(format!(
                "quotation {} changed during conversion",
                quotation_id
            )));
        }

        db::commit(txn, started).await?;
        self.events.emit(SettlementEvent::QuotationStatusChanged {
            quotation_id,
            old_status: source.status,
            new_status: QuotationStatus::Invoiced.as_str().to_string(),
        });
        self.find_one(id).await
    }

    /// Records goods coming back. Every line is validated against its item
    /// before any write.
    #[instrument(skip(self, input), fields(condition = ?input.condition))]
    pub async fn process_return(
        &self,
        consignment_id: Uuid,
        input: ProcessReturnInput,
    ) -> Result<ReturnOutcome, ServiceError> {
        let result = self.process_return_inner(consignment_id, input).await;
        self.audited("return", Some(consignment_id), result, |r| r.receipt.header.id)
            .await
    }

    async fn process_return_inner(
        &self,
        consignment_id: Uuid,
        input: ProcessReturnInput,
    ) -> Result<ReturnOutcome, ServiceError> {
        input.validate()?;
        let requested = aggregate_lines(&input.items)?;

        let started = Instant::now();
        let txn = db::begin(&self.db).await?;
        let current = load_consignment(&txn, consignment_id).await?;
        if current.is_closed() {
            return Err(closed_error(&current, "return"));
        }
        let items = load_consignment_items(&txn, consignment_id).await?;
        let claims = match_claims(&items, &requested)?;

        let code = next_document_code(&txn, DocumentKind::ConsignmentReturn).await?;
        let return_id = Uuid::new_v4();
        let now = Utc::now();
        let mut total_value = Decimal::ZERO;
        for claim in &claims {
            total_value += extended_amount(claim.item.product_id, claim.quantity, claim.item.unit_price)?;
        }

        consignment_return::ActiveModel {
            id: Set(return_id),
            code: Set(code.clone()),
            consignment_id: Set(consignment_id),
            total_value: Set(total_value),
            condition: Set(input.condition.as_str().to_string()),
            reason: Set(input.reason),
            received_by: Set(input.received_by),
            created_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        for claim in &claims {
            claim_item(&txn, claim.item, claim.quantity, ClaimKind::Returned).await?;

            consignment_return_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                return_id: Set(return_id),
                consignment_item_id: Set(claim.item.id),
                product_id: Set(claim.item.product_id),
                product_name: Set(claim.item.product_name.clone()),
                quantity: Set(claim.quantity),
                unit_price: Set(claim.item.unit_price),
                condition: Set(input.condition.as_str().to_string()),
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::db_error)?;

            match input.condition {
                ReturnCondition::Good => {
                    StockLedger::restore(
                        &txn,
                        claim.item.product_id,
                        claim.quantity,
                        MovementReason::ConsignmentReturn,
                        return_id,
                    )
                    .await?;
                }
                ReturnCondition::Damaged => {
                    StockLedger::record_write_off(
                        &txn,
                        claim.item.product_id,
                        MovementReason::ConsignmentReturnDamaged,
                        return_id,
                    )
                    .await?;
                }
            }
        }

        let result = consignment::Entity::update_many()
            .col_expr(
                consignment::Column::ReturnedValue,
                Expr::col(consignment::Column::ReturnedValue).add(total_value),
            )
            .col_expr(
                consignment::Column::Status,
                Expr::value(ConsignmentStatus::PartiallyReturned.as_str()),
            )
            .col_expr(consignment::Column::UpdatedAt, Expr::value(now))
            .filter(consignment::Column::Id.eq(consignment_id))
            .filter(consignment::Column::Status.ne(ConsignmentStatus::Closed.as_str()))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        if result.rows_affected == 0 {
            let latest = load_consignment(&txn, consignment_id).await?;
            return Err(closed_error(&latest, "return"));
        }

        let closed_at = close_if_settled(&txn, consignment_id).await?;
        db::commit(txn, started).await?;

        info!(
            %consignment_id,
            %return_id,
            %code,
            %total_value,
            condition = input.condition.as_str(),
            "consignment return processed"
        );
        self.closed(consignment_id, closed_at);

        let consignment = load_consignment(&*self.db, consignment_id).await?;
        let receipt = self.load_return(return_id).await?;
        Ok(ReturnOutcome {
            consignment,
            receipt,
            closed: closed_at.is_some(),
        })
    }

    /// Closes the consignment once every item is settled. Safe to call any
    /// number of times.
    #[instrument(skip(self))]
    pub async fn check_and_close_consignment(&self, id: Uuid) -> Result<consignment::Model, ServiceError> {
        let started = Instant::now();
        let txn = db::begin(&self.db).await?;
        load_consignment(&txn, id).await?;
        let closed_at = close_if_settled(&txn, id).await?;
        db::commit(txn, started).await?;

        self.closed(id, closed_at);
        load_consignment(&*self.db, id).await
    }

    /// Items with quantity still available to invoice or return.
    #[instrument(skip(self))]
    pub async fn get_available_to_invoice(&self, id: Uuid) -> Result<Vec<AvailableItem>, ServiceError> {
        load_consignment(&*self.db, id).await?;
        let items = load_consignment_items(&*self.db, id).await?;
        Ok(items
            .into_iter()
            .filter(|item| item.available() > 0)
            .map(|item| AvailableItem {
                consignment_item_id: item.id,
                product_id: item.product_id,
                available: item.available(),
                product_name: item.product_name,
                product_sku: item.product_sku,
                unit_price: item.unit_price,
            })
            .collect())
    }

    async fn load_return(&self, return_id: Uuid) -> Result<ReturnDetail, ServiceError> {
        let header = consignment_return::Entity::find_by_id(return_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("Consignment return", return_id))?;
        let items = consignment_return_item::Entity::find()
            .filter(consignment_return_item::Column::ReturnId.eq(return_id))
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(ReturnDetail { header, items })
    }

    /// Read-only view of a consignment with items and returns.
    #[instrument(skip(self))]
    pub async fn find_one(&self, id: Uuid) -> Result<ConsignmentDetail, ServiceError> {
        let consignment = load_consignment(&*self.db, id).await?;
        let items = load_consignment_items(&*self.db, id).await?;
        let headers = consignment_return::Entity::find()
            .filter(consignment_return::Column::ConsignmentId.eq(id))
            .order_by_asc(consignment_return::Column::CreatedAt)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut returns = Vec::with_capacity(headers.len());
        for header in headers {
            let items = consignment_return_item::Entity::find()
                .filter(consignment_return_item::Column::ReturnId.eq(header.id))
                .all(&*self.db)
                .await
                .map_err(ServiceError::db_error)?;
            returns.push(ReturnDetail { header, items });
        }

        Ok(ConsignmentDetail {
            consignment,
            items,
            returns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn product(id: Uuid) -> ProductSnapshot {
        ProductSnapshot {
            id,
            name: "Aceite 900ml".into(),
            sku: "ACE-900".into(),
            base_price: dec!(10),
            cost_price: dec!(6),
            tax_rate: dec!(21),
        }
    }

    fn item(product_id: Uuid, delivered: i32, returned: i32, invoiced: i32) -> consignment_item::Model {
        consignment_item::Model {
            id: Uuid::new_v4(),
            consignment_id: Uuid::new_v4(),
            product_id,
            product_name: "Aceite 900ml".into(),
            product_sku: "ACE-900".into(),
            unit_price: dec!(10),
            quantity_delivered: delivered,
            quantity_returned: returned,
            quantity_invoiced: invoiced,
        }
    }

    #[test]
    fn merging_same_product_keeps_delivered_value() {
        let id = Uuid::new_v4();
        let merged = merge_delivery_lines(vec![
            DeliveryLine { product: product(id), quantity: 2, unit_price: dec!(10) },
            DeliveryLine { product: product(id), quantity: 2, unit_price: dec!(20) },
        ])
        .unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].quantity, 4);
        assert_eq!(merged[0].unit_price, dec!(15));
    }

    #[test]
    fn merging_rejects_quantity_overflow() {
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();
        assert_matches!(
            merge_delivery_lines(vec![
                DeliveryLine { product: product(id), quantity: 2_000_000_000, unit_price: dec!(10) },
                DeliveryLine { product: product(other), quantity: 1, unit_price: dec!(10) },
                DeliveryLine { product: product(id), quantity: 2_000_000_000, unit_price: dec!(10) },
            ]),
            Err(ServiceError::ValidationError(msg)) if msg.contains(&id.to_string())
        );
        assert_matches!(
            merge_delivery_lines(vec![
                DeliveryLine { product: product(id), quantity: 1, unit_price: Decimal::MAX },
                DeliveryLine { product: product(id), quantity: 1, unit_price: dec!(1) },
            ]),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn aggregate_sums_duplicates() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let lines = vec![
            SettlementLineInput { product_id: a, quantity: 2 },
            SettlementLineInput { product_id: b, quantity: 1 },
            SettlementLineInput { product_id: a, quantity: 3 },
        ];
        assert_eq!(aggregate_lines(&lines).unwrap(), vec![(a, 5), (b, 1)]);
    }

    #[test]
    fn aggregate_rejects_non_positive() {
        let lines = vec![SettlementLineInput { product_id: Uuid::new_v4(), quantity: 0 }];
        assert_matches!(aggregate_lines(&lines), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn claims_fail_on_any_excess_line() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let items = vec![item(a, 10, 4, 0), item(b, 5, 0, 5)];

        assert!(match_claims(&items, &[(a, 6)]).is_ok());
        assert_matches!(
            match_claims(&items, &[(a, 6), (b, 1)]),
            Err(ServiceError::InvalidQuantity { available: 0, requested: 1, .. })
        );
        assert_matches!(
            match_claims(&items, &[(a, 7)]),
            Err(ServiceError::InvalidQuantity { available: 6, requested: 7, .. })
        );
    }

    #[test]
    fn claims_for_unknown_products_are_invalid() {
        let items = vec![item(Uuid::new_v4(), 3, 0, 0)];
        let stranger = Uuid::new_v4();
        assert_matches!(
            match_claims(&items, &[(stranger, 1)]),
            Err(ServiceError::InvalidQuantity { product_id, .. }) if product_id == stranger
        );
    }
}
