use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::payment,
    errors::ServiceError,
    handlers::common::{created, ok, Created},
    services::invoicing::{InvoiceView, MarginInput, MarginReport},
    ApiResult, AppState,
};

#[derive(Debug, Deserialize, Validate)]
pub struct MarginCheckRequest {
    #[validate(length(min = 1, message = "at least one line is required"))]
    pub items: Vec<MarginInput>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RecordPaymentRequest {
    #[validate(length(min = 1, message = "Payment method cannot be empty"))]
    pub method: String,
    pub reference: Option<String>,
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<InvoiceView> {
    Ok(ok(state.services.invoicing.find_invoice(id).await?))
}

pub async fn validate_margins(
    State(state): State<AppState>,
    Json(payload): Json<MarginCheckRequest>,
) -> ApiResult<MarginReport> {
    payload.validate()?;
    Ok(ok(state
        .services
        .invoicing
        .validate_margins(&payload.items)
        .await?))
}

pub async fn record_payment(
    State(state): State<AppState>,
    Path(sale_id): Path<Uuid>,
    Json(payload): Json<RecordPaymentRequest>,
) -> Result<Created<payment::Model>, ServiceError> {
    payload.validate()?;
    let payment = state
        .services
        .invoicing
        .record_payment(sale_id, payload.method, payload.reference)
        .await?;
    Ok(created(payment))
}
