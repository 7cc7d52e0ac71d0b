use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::db;
use crate::entities::quotation::{self, QuotationStatus};
use crate::entities::quotation_item;
use crate::errors::ServiceError;
use crate::events::{EventSender, SettlementEvent};
use crate::services::audit::{AuditEvent, AuditSink};
use crate::services::catalog::{CatalogLookup, CustomerSnapshot};
use crate::services::pricing::{DocumentTotals, PricedLine, PricingResolver};
use crate::services::sequences::{next_document_code, DocumentKind};

const RESOURCE: &str = "quotation";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotationLineInput {
    pub product_id: Uuid,
    pub quantity: i32,
    /// Overrides list and base price when present
    pub unit_price: Option<Decimal>,
    pub discount_percent: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateQuotationInput {
    pub customer_id: Uuid,
    #[validate(length(min = 1))]
    pub items: Vec<QuotationLineInput>,
    #[validate(range(min = 1, max = 365))]
    pub valid_days: Option<i64>,
    pub notes: Option<String>,
    pub terms_and_conditions: Option<String>,
}

/// Fields left as `None` are kept. `items` replaces the whole item set.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateQuotationInput {
    pub items: Option<Vec<QuotationLineInput>>,
    #[validate(range(min = 1, max = 365))]
    pub valid_days: Option<i64>,
    pub notes: Option<String>,
    pub terms_and_conditions: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotationDetail {
    pub quotation: quotation::Model,
    pub items: Vec<quotation_item::Model>,
}

/// Result of a read. `expired_on_read` is set when this read moved the
/// quotation to EXPIRED.
#[derive(Debug, Clone, Serialize)]
pub struct FetchedQuotation {
    pub quotation: quotation::Model,
    pub items: Vec<quotation_item::Model>,
    pub expired_on_read: bool,
}

pub(crate) async fn load_quotation<C>(conn: &C, id: Uuid) -> Result<quotation::Model, ServiceError>
where
    C: ConnectionTrait,
{
    quotation::Entity::find_by_id(id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::not_found("Quotation", id))
}

pub(crate) async fn load_quotation_items<C>(
    conn: &C,
    quotation_id: Uuid,
) -> Result<Vec<quotation_item::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    quotation_item::Entity::find()
        .filter(quotation_item::Column::QuotationId.eq(quotation_id))
        .order_by_asc(quotation_item::Column::Position)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

pub(crate) fn invalid_state(model: &quotation::Model, operation: &'static str) -> ServiceError {
    ServiceError::InvalidState {
        entity: RESOURCE,
        id: model.id,
        status: model.status.clone(),
        operation,
    }
}

pub(crate) fn expired(model: &quotation::Model) -> ServiceError {
    ServiceError::Expired {
        quotation_id: model.id,
        valid_until: model.valid_until,
    }
}

/// Checks that a quotation can be converted into a sale or consignment.
pub(crate) fn ensure_convertible(
    model: &quotation::Model,
    operation: &'static str,
) -> Result<(), ServiceError> {
    match model.status() {
        Some(QuotationStatus::Accepted) if model.is_past_validity(Utc::now()) => Err(expired(model)),
        Some(QuotationStatus::Accepted) => Ok(()),
        Some(QuotationStatus::Expired) => Err(expired(model)),
        _ => Err(invalid_state(model, operation)),
    }
}

fn statuses(list: &[QuotationStatus]) -> Vec<&'static str> {
    list.iter().map(|s| s.as_str()).collect()
}

fn item_models(quotation_id: Uuid, lines: &[PricedLine]) -> Vec<quotation_item::ActiveModel> {
    lines
        .iter()
        .enumerate()
        .map(|(position, line)| quotation_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            quotation_id: Set(quotation_id),
            position: Set(position as i32 + 1),
            product_id: Set(line.product.id),
            product_name: Set(line.product.name.clone()),
            product_sku: Set(line.product.sku.clone()),
            quantity: Set(line.quantity),
            unit_price: Set(line.unit_price),
            discount_percent: Set(line.discount_percent),
            tax_rate: Set(line.product.tax_rate),
            line_total: Set(line.line_total),
            tax_amount: Set(line.tax_amount),
        })
        .collect()
}

#[derive(Clone)]
pub struct QuotationService {
    db: Arc<DatabaseConnection>,
    catalog: Arc<dyn CatalogLookup>,
    pricing: PricingResolver,
    audit: Arc<dyn AuditSink>,
    events: EventSender,
    valid_days: i64,
}

impl QuotationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        catalog: Arc<dyn CatalogLookup>,
        audit: Arc<dyn AuditSink>,
        events: EventSender,
        valid_days: i64,
    ) -> Self {
        Self {
            db,
            pricing: PricingResolver::new(catalog.clone()),
            catalog,
            audit,
            events,
            valid_days,
        }
    }

    async fn price_lines(
        &self,
        customer: &CustomerSnapshot,
        lines: &[QuotationLineInput],
    ) -> Result<Vec<PricedLine>, ServiceError> {
        let mut priced = Vec::with_capacity(lines.len());
        for line in lines {
            priced.push(
                self.pricing
                    .price(
                        customer,
                        line.product_id,
                        line.quantity,
                        line.unit_price,
                        line.discount_percent,
                    )
                    .await?,
            );
        }
        Ok(priced)
    }

    async fn detail(&self, id: Uuid) -> Result<QuotationDetail, ServiceError> {
        let quotation = load_quotation(&*self.db, id).await?;
        let items = load_quotation_items(&*self.db, id).await?;
        Ok(QuotationDetail { quotation, items })
    }

    fn status_changed(&self, id: Uuid, old: &str, new: QuotationStatus) {
        self.events.emit(SettlementEvent::QuotationStatusChanged {
            quotation_id: id,
            old_status: old.to_string(),
            new_status: new.as_str().to_string(),
        });
    }

    /// Prices every line and stores a new DRAFT quotation.
    #[instrument(skip(self, input), fields(customer_id = %input.customer_id))]
    pub async fn create(&self, input: CreateQuotationInput) -> Result<QuotationDetail, ServiceError> {
        let result = self.create_inner(input).await;
        let event = match &result {
            Ok(detail) => AuditEvent::success(RESOURCE, "create", detail.quotation.id),
            Err(e) => AuditEvent::failure(RESOURCE, "create", None, e),
        };
        self.audit.record(event).await;
        result
    }

    async fn create_inner(&self, input: CreateQuotationInput) -> Result<QuotationDetail, ServiceError> {
        input.validate()?;
        let customer = self.catalog.get_customer(input.customer_id).await?;
        let lines = self.price_lines(&customer, &input.items).await?;
        let totals = DocumentTotals::from_lines(&lines);
        let valid_days = input.valid_days.unwrap_or(self.valid_days);

        let started = Instant::now();
        let txn = db::begin(&self.db).await?;
        let code = next_document_code(&txn, DocumentKind::Quotation).await?;
        let now = Utc::now();
        let id = Uuid::new_v4();

        quotation::ActiveModel {
            id: Set(id),
            code: Set(code.clone()),
            customer_id: Set(customer.id),
            status: Set(QuotationStatus::Draft.as_str().to_string()),
            valid_until: Set(now + Duration::days(valid_days)),
            subtotal: Set(totals.subtotal),
            tax_amount: Set(totals.tax_amount),
            total: Set(totals.total),
            notes: Set(input.notes),
            terms_and_conditions: Set(input.terms_and_conditions),
            converted_to_sale_id: Set(None),
            converted_to_consignment_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        quotation_item::Entity::insert_many(item_models(id, &lines))
            .exec_without_returning(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        db::commit(txn, started).await?;
        info!(quotation_id = %id, %code, total = %totals.total, "quotation created");
        self.detail(id).await
    }

    /// Edits a DRAFT quotation, recomputing totals from scratch when items
    /// are replaced.
    #[instrument(skip(self, input))]
    pub async fn update(
        &self,
        id: Uuid,
        input: UpdateQuotationInput,
    ) -> Result<QuotationDetail, ServiceError> {
        input.validate()?;
        let current = load_quotation(&*self.db, id).await?;
        if current.status() != Some(QuotationStatus::Draft) {
            return Err(invalid_state(&current, "update"));
        }

        let lines = match &input.items {
            Some(items) if items.is_empty() => {
                return Err(ServiceError::ValidationError(
                    "a quotation needs at least one item".into(),
                ))
            }
            Some(items) => {
                let customer = self.catalog.get_customer(current.customer_id).await?;
                Some(self.price_lines(&customer, items).await?)
            }
            None => None,
        };

        let started = Instant::now();
        let txn = db::begin(&self.db).await?;
        let now = Utc::now();

        let mut update = quotation::Entity::update_many()
            .col_expr(quotation::Column::UpdatedAt, Expr::value(now))
            .filter(quotation::Column::Id.eq(id))
            .filter(quotation::Column::Status.eq(QuotationStatus::Draft.as_str()));
        if let Some(days) = input.valid_days {
            update = update.col_expr(
                quotation::Column::ValidUntil,
                Expr::value(now + Duration::days(days)),
            );
        }
        if let Some(notes) = input.notes {
            update = update.col_expr(quotation::Column::Notes, Expr::value(notes));
        }
        if let Some(terms) = input.terms_and_conditions {
            update = update.col_expr(quotation::Column::TermsAndConditions, Expr::value(terms));
        }
        if let Some(lines) = &lines {
            let totals = DocumentTotals::from_lines(lines);
            update = update
                .col_expr(quotation::Column::Subtotal, Expr::value(totals.subtotal))
                .col_expr(quotation::Column::TaxAmount, Expr::value(totals.tax_amount))
                .col_expr(quotation::Column::Total, Expr::value(totals.total));
        }

        let result = update.exec(&txn).await.map_err(ServiceError::db_error)?;
        if result.rows_affected == 0 {
            let latest = load_quotation(&txn, id).await?;
            return Err(invalid_state(&latest, "update"));
        }

        if let Some(lines) = &lines {
            quotation_item::Entity::delete_many()
                .filter(quotation_item::Column::QuotationId.eq(id))
                .exec(&txn)
                .await
                .map_err(ServiceError::db_error)?;
            quotation_item::Entity::insert_many(item_models(id, lines))
                .exec_without_returning(&txn)
                .await
                .map_err(ServiceError::db_error)?;
        }

        db::commit(txn, started).await?;
        info!(quotation_id = %id, items_replaced = lines.is_some(), "quotation updated");
        self.detail(id).await
    }

    /// Moves a quotation between statuses with a single guarded update.
    async fn transition(
        &self,
        id: Uuid,
        from: &[QuotationStatus],
        to: QuotationStatus,
        operation: &'static str,
    ) -> Result<quotation::Model, ServiceError> {
        let current = load_quotation(&*self.db, id).await?;
        let result = quotation::Entity::update_many()
            .col_expr(quotation::Column::Status, Expr::value(to.as_str()))
            .col_expr(quotation::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(quotation::Column::Id.eq(id))
            .filter(quotation::Column::Status.is_in(statuses(from)))
            .exec(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected == 0 {
            let latest = load_quotation(&*self.db, id).await?;
            return Err(invalid_state(&latest, operation));
        }

        self.status_changed(id, &current.status, to);
        load_quotation(&*self.db, id).await
    }

    /// DRAFT -> SENT
    #[instrument(skip(self))]
    pub async fn send(&self, id: Uuid) -> Result<quotation::Model, ServiceError> {
        self.transition(id, &[QuotationStatus::Draft], QuotationStatus::Sent, "send")
            .await
    }

    /// SENT -> ACCEPTED, only while `now <= valid_until`.
    #[instrument(skip(self))]
    pub async fn accept(&self, id: Uuid) -> Result<quotation::Model, ServiceError> {
        let now = Utc::now();
        let current = load_quotation(&*self.db, id).await?;
        match current.status() {
            Some(QuotationStatus::Expired) => return Err(expired(&current)),
            Some(QuotationStatus::Sent) if current.is_past_validity(now) => {
                self.expire_one(&current).await?;
                return Err(expired(&current));
            }
            Some(QuotationStatus::Sent) => {}
            _ => return Err(invalid_state(&current, "accept")),
        }

        let result = quotation::Entity::update_many()
            .col_expr(
                quotation::Column::Status,
                Expr::value(QuotationStatus::Accepted.as_str()),
            )
            .col_expr(quotation::Column::UpdatedAt, Expr::value(now))
            .filter(quotation::Column::Id.eq(id))
            .filter(quotation::Column::Status.eq(QuotationStatus::Sent.as_str()))
            .filter(quotation::Column::ValidUntil.gte(now))
            .exec(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected == 0 {
            let latest = load_quotation(&*self.db, id).await?;
            return Err(match latest.status() {
                Some(QuotationStatus::Expired) => expired(&latest),
                Some(QuotationStatus::Sent) if latest.is_past_validity(Utc::now()) => expired(&latest),
                _ => invalid_state(&latest, "accept"),
            });
        }

        self.status_changed(id, &current.status, QuotationStatus::Accepted);
        info!(quotation_id = %id, "quotation accepted");
        load_quotation(&*self.db, id).await
    }

    /// DRAFT or SENT -> REJECTED, appending the reason to the notes.
    #[instrument(skip(self))]
    pub async fn reject(
        &self,
        id: Uuid,
        reason: Option<String>,
    ) -> Result<quotation::Model, ServiceError> {
        let current = load_quotation(&*self.db, id).await?;
        let notes = match (current.notes.clone(), reason) {
            (Some(notes), Some(reason)) => Some(format!("{}\nRejection reason: {}", notes, reason)),
            (None, Some(reason)) => Some(format!("Rejection reason: {}", reason)),
            (notes, None) => notes,
        };

        let result = quotation::Entity::update_many()
            .col_expr(
                quotation::Column::Status,
                Expr::value(QuotationStatus::Rejected.as_str()),
            )
            .col_expr(quotation::Column::Notes, Expr::value(notes))
            .col_expr(quotation::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(quotation::Column::Id.eq(id))
            .filter(
                quotation::Column::Status
                    .is_in(statuses(&[QuotationStatus::Draft, QuotationStatus::Sent])),
            )
            .exec(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected == 0 {
            let latest = load_quotation(&*self.db, id).await?;
            return Err(invalid_state(&latest, "reject"));
        }

        self.status_changed(id, &current.status, QuotationStatus::Rejected);
        load_quotation(&*self.db, id).await
    }

    /// Moves a DRAFT/SENT quotation past its validity to EXPIRED. Returns
    /// whether this call made the change.
    async fn expire_one(&self, current: &quotation::Model) -> Result<bool, ServiceError> {
        let now = Utc::now();
        let result = quotation::Entity::update_many()
            .col_expr(
                quotation::Column::Status,
                Expr::value(QuotationStatus::Expired.as_str()),
            )
            .col_expr(quotation::Column::UpdatedAt, Expr::value(now))
            .filter(quotation::Column::Id.eq(current.id))
            .filter(
                quotation::Column::Status
                    .is_in(statuses(&[QuotationStatus::Draft, QuotationStatus::Sent])),
            )
            .filter(quotation::Column::ValidUntil.lt(now))
            .exec(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        let changed = result.rows_affected > 0;
        if changed {
            debug!(quotation_id = %current.id, "quotation expired");
            self.status_changed(current.id, &current.status, QuotationStatus::Expired);
        }
        Ok(changed)
    }

    /// Reads a quotation. A DRAFT or SENT quotation past `valid_until` is
    /// moved to EXPIRED first and reported through `expired_on_read`.
    #[instrument(skip(self))]
    pub async fn find_one(&self, id: Uuid) -> Result<FetchedQuotation, ServiceError> {
        let mut quotation = load_quotation(&*self.db, id).await?;
        let mut expired_on_read = false;

        let lapsable = quotation.status().map_or(false, |s| s.can_expire());
        if lapsable && quotation.is_past_validity(Utc::now()) {
            expired_on_read = self.expire_one(&quotation).await?;
            quotation = load_quotation(&*self.db, id).await?;
        }

        let items = load_quotation_items(&*self.db, id).await?;
        Ok(FetchedQuotation {
            quotation,
            items,
            expired_on_read,
        })
    }

    /// Copies items and totals into a new DRAFT with a fresh code and
    /// validity window.
    #[instrument(skip(self))]
    pub async fn duplicate(&self, id: Uuid) -> Result<QuotationDetail, ServiceError> {
        let source = load_quotation(&*self.db, id).await?;
        let source_items = load_quotation_items(&*self.db, id).await?;

        let started = Instant::now();
        let txn = db::begin(&self.db).await?;
        let code = next_document_code(&txn, DocumentKind::Quotation).await?;
        let now = Utc::now();
        let new_id = Uuid::new_v4();

        quotation::ActiveModel {
            id: Set(new_id),
            code: Set(code.clone()),
            customer_id: Set(source.customer_id),
            status: Set(QuotationStatus::Draft.as_str().to_string()),
            valid_until: Set(now + Duration::days(self.valid_days)),
            subtotal: Set(source.subtotal),
            tax_amount: Set(source.tax_amount),
            total: Set(source.total),
            notes: Set(source.notes.clone()),
            terms_and_conditions: Set(source.terms_and_conditions.clone()),
            converted_to_sale_id: Set(None),
            converted_to_consignment_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        if !source_items.is_empty() {
            let copies = source_items.iter().map(|item| quotation_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                quotation_id: Set(new_id),
                position: Set(item.position),
                product_id: Set(item.product_id),
                product_name: Set(item.product_name.clone()),
                product_sku: Set(item.product_sku.clone()),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                discount_percent: Set(item.discount_percent),
                tax_rate: Set(item.tax_rate),
                line_total: Set(item.line_total),
                tax_amount: Set(item.tax_amount),
            });
            quotation_item::Entity::insert_many(copies)
                .exec_without_returning(&txn)
                .await
                .map_err(ServiceError::db_error)?;
        }

        db::commit(txn, started).await?;
        info!(source_id = %id, quotation_id = %new_id, %code, "quotation duplicated");
        self.audit
            .record(AuditEvent::success(RESOURCE, "duplicate", new_id))
            .await;
        self.detail(new_id).await
    }

    /// Deletes a DRAFT quotation with its items.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let started = Instant::now();
        let txn = db::begin(&self.db).await?;
        let current = load_quotation(&txn, id).await?;
        if current.status() != Some(QuotationStatus::Draft) {
            return Err(invalid_state(&current, "delete"));
        }

        quotation_item::Entity::delete_many()
            .filter(quotation_item::Column::QuotationId.eq(id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        let result = quotation::Entity::delete_many()
            .filter(quotation::Column::Id.eq(id))
            .filter(quotation::Column::Status.eq(QuotationStatus::Draft.as_str()))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        if result.rows_affected == 0 {
            return Err(invalid_state(&current, "delete"));
        }

        db::commit(txn, started).await?;
        info!(quotation_id = %id, "quotation deleted");
        Ok(())
    }

    /// Bulk sweep: every DRAFT/SENT quotation past `valid_until` becomes
    /// EXPIRED. Returns how many rows moved.
    #[instrument(skip(self))]
    pub async fn expire_old_quotations(&self) -> Result<u64, ServiceError> {
        let now = Utc::now();
        let result = quotation::Entity::update_many()
            .col_expr(
                quotation::Column::Status,
                Expr::value(QuotationStatus::Expired.as_str()),
            )
            .col_expr(quotation::Column::UpdatedAt, Expr::value(now))
            .filter(
                quotation::Column::Status
                    .is_in(statuses(&[QuotationStatus::Draft, QuotationStatus::Sent])),
            )
            .filter(quotation::Column::ValidUntil.lt(now))
            .exec(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected > 0 {
            self.events.emit(SettlementEvent::QuotationsExpired {
                count: result.rows_affected,
                swept_at: now,
            });
        }
        Ok(result.rows_affected)
    }
}

/// Runs `expire_old_quotations` every `every` until the task is aborted.
pub fn spawn_expiry_sweeper(
    service: Arc<QuotationService>,
    every: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match service.expire_old_quotations().await {
                Ok(0) => debug!("expiry sweep found nothing to expire"),
                Ok(count) => info!(count, "expiry sweep expired quotations"),
                Err(e) if e.is_retryable() => warn!(error = %e, "expiry sweep hit contention"),
                Err(e) => error!(error = %e, "expiry sweep failed"),
            }
        }
    })
}
