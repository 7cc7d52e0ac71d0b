use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::db;
use crate::entities::consignment::{self, ConsignmentStatus};
use crate::entities::invoice::{self, InvoiceStatus};
use crate::entities::payment;
use crate::entities::quotation::{self, QuotationStatus};
use crate::entities::quotation_item;
use crate::entities::sale::{self, SaleChannel, SaleStatus};
use crate::entities::sale_item;
use crate::entities::stock_movement::MovementReason;
use crate::errors::ServiceError;
use crate::events::{EventSender, SettlementEvent};
use crate::services::audit::{AuditEvent, AuditSink};
use crate::services::catalog::{CatalogLookup, CustomerSnapshot};
use crate::services::consignments::{
    aggregate_lines, claim_item, close_if_settled, closed_error, load_consignment,
    load_consignment_items, match_claims, ClaimKind, SettlementLineInput,
};
use crate::services::fiscal::{
    determine_invoice_type, CaeAuthority, CaeRequest, InvoiceType, TaxCondition,
};
use crate::services::pricing::{extended_amount, percent_of, MAX_LINE_AMOUNT};
use crate::services::quotations::{ensure_convertible, load_quotation, load_quotation_items};
use crate::services::sequences::{
    format_invoice_number, next_document_code, next_invoice_number, DocumentKind,
};
use crate::services::stock_ledger::StockLedger;

const RESOURCE: &str = "invoice";
const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Revenue and cost of one invoiced line.
#[derive(Debug, Clone, PartialEq)]
pub struct MarginLine {
    pub product_id: Uuid,
    pub revenue: Decimal,
    pub cost: Decimal,
}

/// Line handed to `validate_margins`; cost is looked up per product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginInput {
    pub product_id: Uuid,
    pub quantity: i32,
    pub revenue: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarginWarning {
    pub product_id: Uuid,
    pub margin_percent: Decimal,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarginReport {
    pub valid: bool,
    pub warnings: Vec<MarginWarning>,
    pub total_margin: Decimal,
}

/// `(revenue - cost) / revenue * 100`. Zero revenue with a cost counts as
/// a total loss.
pub fn margin_percent(revenue: Decimal, cost: Decimal) -> Decimal {
    if revenue.is_zero() {
        if cost.is_zero() {
            Decimal::ZERO
        } else {
            -HUNDRED
        }
    } else {
        // Only a loss against a vanishing revenue can leave the range.
        (revenue - cost)
            .checked_div(revenue)
            .and_then(|ratio| ratio.checked_mul(HUNDRED))
            .unwrap_or(Decimal::MIN)
    }
}

/// Gates on the blended margin of all lines; individual lines only warn.
pub fn evaluate_margins(lines: &[MarginLine], low_margin_threshold: Decimal) -> MarginReport {
    let mut warnings = Vec::new();
    let mut revenue = Decimal::ZERO;
    let mut cost = Decimal::ZERO;

    for line in lines {
        revenue += line.revenue;
        cost += line.cost;
        let margin = margin_percent(line.revenue, line.cost);
        if margin < Decimal::ZERO {
            warnings.push(MarginWarning {
                product_id: line.product_id,
                margin_percent: margin,
                message: format!("negative margin of {}%", margin.round_dp(2)),
            });
        } else if margin < low_margin_threshold {
            warnings.push(MarginWarning {
                product_id: line.product_id,
                margin_percent: margin,
                message: format!(
                    "margin of {}% is below {}%",
                    margin.round_dp(2),
                    low_margin_threshold
                ),
            });
        }
    }

    let total_margin = margin_percent(revenue, cost);
    MarginReport {
        valid: total_margin >= Decimal::ZERO,
        warnings,
        total_margin,
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct InvoiceQuotationInput {
    #[validate(range(min = 1, max = 99999))]
    pub point_of_sale: Option<i32>,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct InvoiceConsignmentInput {
    #[validate(length(min = 1))]
    pub items: Vec<SettlementLineInput>,
    #[validate(range(min = 1, max = 99999))]
    pub point_of_sale: Option<i32>,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedInvoice {
    pub invoice: invoice::Model,
    pub display_number: String,
    pub sale: sale::Model,
    pub items: Vec<sale_item::Model>,
    pub payment: Option<payment::Model>,
    pub margin: MarginReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceView {
    pub invoice: invoice::Model,
    pub display_number: String,
    pub sale: sale::Model,
    pub items: Vec<sale_item::Model>,
    pub payments: Vec<payment::Model>,
}

#[derive(Debug, Clone)]
struct SaleLine {
    product_id: Uuid,
    product_name: String,
    product_sku: String,
    quantity: i32,
    unit_price: Decimal,
    discount_percent: Decimal,
    tax_rate: Decimal,
    line_total: Decimal,
    tax_amount: Decimal,
}

impl From<&quotation_item::Model> for SaleLine {
    fn from(item: &quotation_item::Model) -> Self {
        Self {
            product_id: item.product_id,
            product_name: item.product_name.clone(),
            product_sku: item.product_sku.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            discount_percent: item.discount_percent,
            tax_rate: item.tax_rate,
            line_total: item.line_total,
            tax_amount: item.tax_amount,
        }
    }
}

struct SaleDraft<'a> {
    sale_id: Uuid,
    channel: SaleChannel,
    customer: &'a CustomerSnapshot,
    lines: &'a [SaleLine],
    quotation_id: Option<Uuid>,
    consignment_id: Option<Uuid>,
    point_of_sale: i32,
    invoice_type: InvoiceType,
}

#[derive(Clone)]
pub struct InvoicingService {
    db: Arc<DatabaseConnection>,
    catalog: Arc<dyn CatalogLookup>,
    cae: Arc<dyn CaeAuthority>,
    audit: Arc<dyn AuditSink>,
    events: EventSender,
    seller_tax_condition: TaxCondition,
    default_point_of_sale: i32,
    low_margin_threshold: Decimal,
}

impl InvoicingService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        catalog: Arc<dyn CatalogLookup>,
        cae: Arc<dyn CaeAuthority>,
        audit: Arc<dyn AuditSink>,
        events: EventSender,
        seller_tax_condition: TaxCondition,
        default_point_of_sale: i32,
        low_margin_threshold: Decimal,
    ) -> Self {
        Self {
            db,
            catalog,
            cae,
            audit,
            events,
            seller_tax_condition,
            default_point_of_sale,
            low_margin_threshold,
        }
    }

    pub fn determine_invoice_type(&self, buyer: TaxCondition) -> InvoiceType {
        determine_invoice_type(self.seller_tax_condition, buyer)
    }

    /// Looks up each product's cost and evaluates the margin gate.
    #[instrument(skip(self, items), fields(lines = items.len()))]
    pub async fn validate_margins(&self, items: &[MarginInput]) -> Result<MarginReport, ServiceError> {
        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            if item.revenue < Decimal::ZERO || item.revenue > MAX_LINE_AMOUNT {
                return Err(ServiceError::ValidationError(format!(
                    "revenue for product {} must be between 0 and {}",
                    item.product_id, MAX_LINE_AMOUNT
                )));
            }
            let product = self.catalog.get_product(item.product_id).await?;
            lines.push(MarginLine {
                product_id: item.product_id,
                revenue: item.revenue,
                cost: extended_amount(item.product_id, item.quantity, product.cost_price)?,
            });
        }
        Ok(evaluate_margins(&lines, self.low_margin_threshold))
    }

    fn enforce_margin(&self, report: &MarginReport, reference_id: Uuid) -> Result<(), ServiceError> {
        if report.valid {
            return Ok(());
        }
        warn!(
            %reference_id,
            total_margin = %report.total_margin,
            warnings = report.warnings.len(),
            "invoicing blocked by negative aggregate margin"
        );
        Err(ServiceError::MarginRejected {
            total_margin: report.total_margin,
        })
    }

    fn point_of_sale(&self, requested: Option<i32>) -> i32 {
        requested.unwrap_or(self.default_point_of_sale)
    }

    /// Stores the sale, its lines and the numbered invoice with its CAE.
    async fn issue(
        &self,
        txn: &DatabaseTransaction,
        draft: SaleDraft<'_>,
    ) -> Result<(sale::Model, invoice::Model), ServiceError> {
        let now = Utc::now();
        let subtotal: Decimal = draft.lines.iter().map(|l| l.line_total).sum();
        let tax_amount: Decimal = draft.lines.iter().map(|l| l.tax_amount).sum();
        let total = subtotal + tax_amount;

        let code = next_document_code(txn, DocumentKind::Sale).await?;
        let sale = sale::ActiveModel {
            id: Set(draft.sale_id),
            code: Set(code),
            channel: Set(draft.channel.as_str().to_string()),
            status: Set(SaleStatus::Pending.as_str().to_string()),
            customer_id: Set(draft.customer.id),
            subtotal: Set(subtotal),
            tax_amount: Set(tax_amount),
            total_amount: Set(total),
            quotation_id: Set(draft.quotation_id),
            consignment_id: Set(draft.consignment_id),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(txn)
        .await
        .map_err(ServiceError::db_error)?;

        let items = draft.lines.iter().map(|line| sale_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            sale_id: Set(draft.sale_id),
            product_id: Set(line.product_id),
            product_name: Set(line.product_name.clone()),
            product_sku: Set(line.product_sku.clone()),
            quantity: Set(line.quantity),
            unit_price: Set(line.unit_price),
            discount_percent: Set(line.discount_percent),
            tax_rate: Set(line.tax_rate),
            line_total: Set(line.line_total),
            tax_amount: Set(line.tax_amount),
        });
        sale_item::Entity::insert_many(items)
            .exec_without_returning(txn)
            .await
            .map_err(ServiceError::db_error)?;

        let number = next_invoice_number(txn, draft.point_of_sale, draft.invoice_type).await?;
        let grant = self
            .cae
            .authorize(&CaeRequest {
                invoice_type: draft.invoice_type,
                point_of_sale: draft.point_of_sale,
                number,
                total,
                issued_on: now.date_naive(),
            })
            .await?;

        let invoice = invoice::ActiveModel {
            id: Set(Uuid::new_v4()),
            sale_id: Set(draft.sale_id),
            invoice_type: Set(draft.invoice_type.as_str().to_string()),
            status: Set(InvoiceStatus::Issued.as_str().to_string()),
            point_of_sale: Set(draft.point_of_sale),
            number: Set(number),
            customer_id: Set(draft.customer.id),
            customer_name: Set(draft.customer.name.clone()),
            customer_tax_id: Set(draft.customer.tax_id.clone()),
            customer_tax_condition: Set(draft.customer.tax_condition.as_str().to_string()),
            subtotal: Set(subtotal),
            tax_amount: Set(tax_amount),
            total: Set(total),
            cae: Set(grant.cae),
            cae_expiration: Set(grant.expires_on),
            issued_at: Set(now),
        }
        .insert(txn)
        .await
        .map_err(ServiceError::db_error)?;

        Ok((sale, invoice))
    }

    /// Post-commit work shared by both invoicing paths: events, the optional
    /// payment and the assembled result.
    async fn finish(
        &self,
        sale: sale::Model,
        invoice: invoice::Model,
        margin: MarginReport,
        payment_method: Option<String>,
        payment_reference: Option<String>,
    ) -> Result<IssuedInvoice, ServiceError> {
        let display_number = format_invoice_number(invoice.point_of_sale, invoice.number);
        info!(
            invoice_id = %invoice.id,
            sale_id = %sale.id,
            invoice_type = %invoice.invoice_type,
            number = %display_number,
            total = %invoice.total,
            "invoice issued"
        );
        self.events.emit(SettlementEvent::InvoiceIssued {
            invoice_id: invoice.id,
            sale_id: sale.id,
            invoice_type: invoice.invoice_type.clone(),
            number: display_number.clone(),
            total: invoice.total,
        });
        for warning in &margin.warnings {
            self.events.emit(SettlementEvent::LowMarginWarning {
                reference_id: invoice.id,
                product_id: warning.product_id,
                margin_percent: warning.margin_percent,
            });
        }

        // The invoice is already valid; a failed payment is left for a retry.
        let payment = match payment_method {
            Some(method) => match self.record_payment(sale.id, method, payment_reference).await {
                Ok(payment) => Some(payment),
                Err(e) => {
                    error!(sale_id = %sale.id, error = %e, "invoice issued but payment not recorded");
                    None
                }
            },
            None => None,
        };

        let sale = self.load_sale(sale.id).await?;
        let items = self.load_sale_items(sale.id).await?;
        Ok(IssuedInvoice {
            invoice,
            display_number,
            sale,
            items,
            payment,
            margin,
        })
    }

    async fn audited(
        &self,
        resource_id: Uuid,
        action: &str,
        result: Result<IssuedInvoice, ServiceError>,
    ) -> Result<IssuedInvoice, ServiceError> {
        let event = match &result {
            Ok(issued) => AuditEvent::success(RESOURCE, action, issued.invoice.id),
            Err(e) => AuditEvent::failure(RESOURCE, action, Some(resource_id), e),
        };
        self.audit.record(event).await;
        result
    }

    /// Invoices an ACCEPTED quotation: sale, invoice and stock deduction in
    /// one transaction, quotation marked INVOICED.
    #[instrument(skip(self, input))]
    pub async fn invoice_from_quotation(
        &self,
        quotation_id: Uuid,
        input: InvoiceQuotationInput,
    ) -> Result<IssuedInvoice, ServiceError> {
        let result = self.invoice_from_quotation_inner(quotation_id, input).await;
        self.audited(quotation_id, "invoice_quotation", result).await
    }

    async fn invoice_from_quotation_inner(
        &self,
        quotation_id: Uuid,
        input: InvoiceQuotationInput,
    ) -> Result<IssuedInvoice, ServiceError> {
        input.validate()?;
        let point_of_sale = self.point_of_sale(input.point_of_sale);

        let source = load_quotation(&*self.db, quotation_id).await?;
        ensure_convertible(&source, "invoice")?;
        let items = load_quotation_items(&*self.db, quotation_id).await?;
        if items.is_empty() {
            return Err(ServiceError::ValidationError(format!(
                "quotation {} has no items",
                quotation_id
            )));
        }

        let margin_inputs: Vec<MarginInput> = items
            .iter()
            .map(|item| MarginInput {
                product_id: item.product_id,
                quantity: item.quantity,
                revenue: item.line_total,
            })
            .collect();
        let margin = self.validate_margins(&margin_inputs).await?;
        self.enforce_margin(&margin, quotation_id)?;

        let customer = self.catalog.get_customer(source.customer_id).await?;
        let invoice_type = self.determine_invoice_type(customer.tax_condition);
        let lines: Vec<SaleLine> = items.iter().map(SaleLine::from).collect();
        let sale_id = Uuid::new_v4();

        let started = Instant::now();
        let txn = db::begin(&self.db).await?;
        let now = Utc::now();

        let result = quotation::Entity::update_many()
            .col_expr(
                quotation::Column::Status,
                Expr::value(QuotationStatus::Invoiced.as_str()),
            )
            .col_expr(quotation::Column::ConvertedToSaleId, Expr::value(sale_id))
            .col_expr(quotation::Column::UpdatedAt, Expr::value(now))
            .filter(quotation::Column::Id.eq(quotation_id))
            .filter(quotation::Column::Status.eq(QuotationStatus::Accepted.as_str()))
            .filter(quotation::Column::ValidUntil.gte(now))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        if result.rows_affected == 0 {
            let latest = load_quotation(&txn, quotation_id).await?;
            ensure_convertible(&latest, "invoice")?;
            return Err(ServiceError::Retryable(format!(
                "quotation {} changed during invoicing",
                quotation_id
            )));
        }

        let (sale, invoice) = self
            .issue(
                &txn,
                SaleDraft {
                    sale_id,
                    channel: SaleChannel::Quotation,
                    customer: &customer,
                    lines: &lines,
                    quotation_id: Some(quotation_id),
                    consignment_id: None,
                    point_of_sale,
                    invoice_type,
                },
            )
            .await?;

        for line in &lines {
            StockLedger::deduct(
                &txn,
                line.product_id,
                line.quantity,
                MovementReason::QuotationSale,
                sale_id,
            )
            .await?;
        }

        db::commit(txn, started).await?;
        self.events.emit(SettlementEvent::QuotationStatusChanged {
            quotation_id,
            old_status: source.status.clone(),
            new_status: QuotationStatus::Invoiced.as_str().to_string(),
        });

        self.finish(
            sale,
            invoice,
            margin,
            input.payment_method,
            input.payment_reference,
        )
        .await
    }

    /// Invoices part of what is still out on a consignment. Stock is not
    /// touched again; it left the warehouse at delivery.
    #[instrument(skip(self, input), fields(lines = input.items.len()))]
    pub async fn invoice_from_consignment(
        &self,
        consignment_id: Uuid,
        input: InvoiceConsignmentInput,
    ) -> Result<IssuedInvoice, ServiceError> {
        let result = self.invoice_from_consignment_inner(consignment_id, input).await;
        self.audited(consignment_id, "invoice_consignment", result).await
    }

    async fn invoice_from_consignment_inner(
        &self,
        consignment_id: Uuid,
        input: InvoiceConsignmentInput,
    ) -> Result<IssuedInvoice, ServiceError> {
        input.validate()?;
        let point_of_sale = self.point_of_sale(input.point_of_sale);
        let requested = aggregate_lines(&input.items)?;

        let current = load_consignment(&*self.db, consignment_id).await?;
        if current.is_closed() {
            return Err(closed_error(&current, "invoice"));
        }
        let items = load_consignment_items(&*self.db, consignment_id).await?;
        let claims = match_claims(&items, &requested)?;

        let mut lines = Vec::with_capacity(claims.len());
        let mut margin_lines = Vec::with_capacity(claims.len());
        for claim in &claims {
            let product = self.catalog.get_product(claim.item.product_id).await?;
            let line_total = extended_amount(product.id, claim.quantity, claim.item.unit_price)?;
            let tax_amount = percent_of(product.id, line_total, product.tax_rate)?;
            margin_lines.push(MarginLine {
                product_id: product.id,
                revenue: line_total,
                cost: extended_amount(product.id, claim.quantity, product.cost_price)?,
            });
            lines.push(SaleLine {
                product_id: claim.item.product_id,
                product_name: claim.item.product_name.clone(),
                product_sku: claim.item.product_sku.clone(),
                quantity: claim.quantity,
                unit_price: claim.item.unit_price,
                discount_percent: Decimal::ZERO,
                tax_rate: product.tax_rate,
                line_total,
                tax_amount,
            });
        }
        let margin = evaluate_margins(&margin_lines, self.low_margin_threshold);
        self.enforce_margin(&margin, consignment_id)?;

        let customer = self.catalog.get_customer(current.customer_id).await?;
        let invoice_type = self.determine_invoice_type(customer.tax_condition);
        let subtotal: Decimal = lines.iter().map(|l| l.line_total).sum();
        let sale_id = Uuid::new_v4();

        let started = Instant::now();
        let txn = db::begin(&self.db).await?;

        for claim in &claims {
            claim_item(&txn, claim.item, claim.quantity, ClaimKind::Invoiced).await?;
        }

        let result = consignment::Entity::update_many()
            .col_expr(
                consignment::Column::InvoicedValue,
                Expr::col(consignment::Column::InvoicedValue).add(subtotal),
            )
            .col_expr(
                consignment::Column::Status,
                Expr::value(ConsignmentStatus::PartiallyInvoiced.as_str()),
            )
            .col_expr(consignment::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(consignment::Column::Id.eq(consignment_id))
            .filter(consignment::Column::Status.ne(ConsignmentStatus::Closed.as_str()))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        if result.rows_affected == 0 {
            let latest = load_consignment(&txn, consignment_id).await?;
            return Err(closed_error(&latest, "invoice"));
        }

        let (sale, invoice) = self
            .issue(
                &txn,
                SaleDraft {
                    sale_id,
                    channel: SaleChannel::Consignment,
                    customer: &customer,
                    lines: &lines,
                    quotation_id: None,
                    consignment_id: Some(consignment_id),
                    point_of_sale,
                    invoice_type,
                },
            )
            .await?;

        let closed_at = close_if_settled(&txn, consignment_id).await?;
        db::commit(txn, started).await?;

        if let Some(closed_at) = closed_at {
            info!(%consignment_id, "consignment closed by invoicing");
            self.events.emit(SettlementEvent::ConsignmentClosed {
                consignment_id,
                closed_at,
            });
        }

        self.finish(
            sale,
            invoice,
            margin,
            input.payment_method,
            input.payment_reference,
        )
        .await
    }

    /// Records full payment of a PENDING sale and marks it PAID.
    #[instrument(skip(self))]
    pub async fn record_payment(
        &self,
        sale_id: Uuid,
        method: String,
        reference: Option<String>,
    ) -> Result<payment::Model, ServiceError> {
        if method.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "payment method must not be empty".into(),
            ));
        }

        let current = self.load_sale(sale_id).await?;
        let invalid = |status: String| ServiceError::InvalidState {
            entity: "sale",
            id: sale_id,
            status,
            operation: "pay",
        };
        if current.status != SaleStatus::Pending.as_str() {
            return Err(invalid(current.status));
        }

        let started = Instant::now();
        let txn = db::begin(&self.db).await?;
        let now = Utc::now();

        let result = sale::Entity::update_many()
            .col_expr(sale::Column::Status, Expr::value(SaleStatus::Paid.as_str()))
            .col_expr(sale::Column::UpdatedAt, Expr::value(now))
            .filter(sale::Column::Id.eq(sale_id))
            .filter(sale::Column::Status.eq(SaleStatus::Pending.as_str()))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        if result.rows_affected == 0 {
            return Err(invalid(SaleStatus::Paid.as_str().to_string()));
        }

        let payment = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            sale_id: Set(sale_id),
            amount: Set(current.total_amount),
            method: Set(method),
            reference: Set(reference),
            created_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        db::commit(txn, started).await?;
        info!(%sale_id, payment_id = %payment.id, amount = %payment.amount, "payment recorded");
        Ok(payment)
    }

    async fn load_sale(&self, sale_id: Uuid) -> Result<sale::Model, ServiceError> {
        sale::Entity::find_by_id(sale_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("Sale", sale_id))
    }

    async fn load_sale_items(&self, sale_id: Uuid) -> Result<Vec<sale_item::Model>, ServiceError> {
        sale_item::Entity::find()
            .filter(sale_item::Column::SaleId.eq(sale_id))
            .order_by_asc(sale_item::Column::ProductName)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Invoice with its sale, lines and payments.
    #[instrument(skip(self))]
    pub async fn find_invoice(&self, invoice_id: Uuid) -> Result<InvoiceView, ServiceError> {
        let invoice = invoice::Entity::find_by_id(invoice_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("Invoice", invoice_id))?;
        let sale = self.load_sale(invoice.sale_id).await?;
        let items = self.load_sale_items(sale.id).await?;
        let payments = payment::Entity::find()
            .filter(payment::Column::SaleId.eq(sale.id))
            .order_by_asc(payment::Column::CreatedAt)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(InvoiceView {
            display_number: invoice.display_number(),
            invoice,
            sale,
            items,
            payments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(revenue: Decimal, cost: Decimal) -> MarginLine {
        MarginLine {
            product_id: Uuid::new_v4(),
            revenue,
            cost,
        }
    }

    #[test]
    fn margin_percent_basic() {
        assert_eq!(margin_percent(dec!(100), dec!(75)), dec!(25));
        assert_eq!(margin_percent(dec!(100), dec!(125)), dec!(-25));
        assert_eq!(margin_percent(dec!(0), dec!(0)), dec!(0));
        assert_eq!(margin_percent(dec!(0), dec!(5)), dec!(-100));
        assert_eq!(margin_percent(Decimal::new(1, 20), MAX_LINE_AMOUNT), Decimal::MIN);
    }

    #[test]
    fn subsidized_loss_line_passes_with_warning() {
        let loss = line(dec!(100), dec!(120));
        let report = evaluate_margins(
            &[loss.clone(), line(dec!(300), dec!(150))],
            dec!(10),
        );
        assert!(report.valid);
        assert_eq!(report.total_margin, dec!(32.5));
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].product_id, loss.product_id);
        assert_eq!(report.warnings[0].margin_percent, dec!(-20));
    }

    #[test]
    fn negative_aggregate_is_invalid() {
        let report = evaluate_margins(
            &[line(dec!(100), dec!(130)), line(dec!(100), dec!(95))],
            dec!(10),
        );
        assert!(!report.valid);
        assert_eq!(report.total_margin, dec!(-12.5));
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn thin_margins_warn_without_blocking() {
        let report = evaluate_margins(&[line(dec!(100), dec!(95))], dec!(10));
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].message.contains("below 10%"));
    }

    #[test]
    fn healthy_margins_produce_no_warnings() {
        let report = evaluate_margins(&[line(dec!(200), dec!(100))], dec!(10));
        assert!(report.valid);
        assert!(report.warnings.is_empty());
        assert_eq!(report.total_margin, dec!(50));
    }
}
