use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    entities::quotation,
    errors::ServiceError,
    handlers::common::{created, ok, Created},
    services::{
        invoicing::{InvoiceQuotationInput, IssuedInvoice},
        quotations::{
            CreateQuotationInput, FetchedQuotation, QuotationDetail, UpdateQuotationInput,
        },
    },
    ApiResult, AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct RejectQuotationRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExpirySweepResult {
    pub expired: u64,
}

pub async fn create_quotation(
    State(state): State<AppState>,
    Json(payload): Json<CreateQuotationInput>,
) -> Result<Created<QuotationDetail>, ServiceError> {
    let detail = state.services.quotations.create(payload).await?;
    Ok(created(detail))
}

pub async fn get_quotation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<FetchedQuotation> {
    Ok(ok(state.services.quotations.find_one(id).await?))
}

pub async fn update_quotation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateQuotationInput>,
) -> ApiResult<QuotationDetail> {
    Ok(ok(state.services.quotations.update(id, payload).await?))
}

pub async fn send_quotation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<quotation::Model> {
    Ok(ok(state.services.quotations.send(id).await?))
}

pub async fn accept_quotation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<quotation::Model> {
    Ok(ok(state.services.quotations.accept(id).await?))
}

pub async fn reject_quotation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Option<Json<RejectQuotationRequest>>,
) -> ApiResult<quotation::Model> {
    let reason = payload.and_then(|Json(body)| body.reason);
    Ok(ok(state.services.quotations.reject(id, reason).await?))
}

pub async fn duplicate_quotation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Created<QuotationDetail>, ServiceError> {
    Ok(created(state.services.quotations.duplicate(id).await?))
}

pub async fn delete_quotation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    state.services.quotations.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn invoice_quotation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Option<Json<InvoiceQuotationInput>>,
) -> Result<Created<IssuedInvoice>, ServiceError> {
    let input = payload.map(|Json(body)| body).unwrap_or_default();
    let issued = state
        .services
        .invoicing
        .invoice_from_quotation(id, input)
        .await?;
    Ok(created(issued))
}

pub async fn expire_quotations(State(state): State<AppState>) -> ApiResult<ExpirySweepResult> {
    let expired = state.services.quotations.expire_old_quotations().await?;
    Ok(ok(ExpirySweepResult { expired }))
}
