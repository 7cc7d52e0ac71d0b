use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::{
    entities::consignment,
    errors::ServiceError,
    handlers::common::{created, ok, Created},
    services::{
        consignments::{
            AvailableItem, ConsignmentDetail, CreateConsignmentInput, ProcessReturnInput,
            ReturnOutcome,
        },
        invoicing::{InvoiceConsignmentInput, IssuedInvoice},
    },
    ApiResult, AppState,
};

pub async fn create_consignment(
    State(state): State<AppState>,
    Json(payload): Json<CreateConsignmentInput>,
) -> Result<Created<ConsignmentDetail>, ServiceError> {
    Ok(created(state.services.consignments.create(payload).await?))
}

pub async fn create_from_quotation(
    State(state): State<AppState>,
    Path(quotation_id): Path<Uuid>,
) -> Result<Created<ConsignmentDetail>, ServiceError> {
    let detail = state
        .services
        .consignments
        .create_from_quotation(quotation_id)
        .await?;
    Ok(created(detail))
}

pub async fn get_consignment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<ConsignmentDetail> {
    Ok(ok(state.services.consignments.find_one(id).await?))
}

pub async fn process_return(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ProcessReturnInput>,
) -> Result<Created<ReturnOutcome>, ServiceError> {
    let outcome = state
        .services
        .consignments
        .process_return(id, payload)
        .await?;
    Ok(created(outcome))
}

pub async fn available_to_invoice(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<AvailableItem>> {
    Ok(ok(state
        .services
        .consignments
        .get_available_to_invoice(id)
        .await?))
}

pub async fn invoice_consignment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<InvoiceConsignmentInput>,
) -> Result<Created<IssuedInvoice>, ServiceError> {
    let issued = state
        .services
        .invoicing
        .invoice_from_consignment(id, payload)
        .await?;
    Ok(created(issued))
}

pub async fn check_and_close(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<consignment::Model> {
    Ok(ok(state
        .services
        .consignments
        .check_and_close_consignment(id)
        .await?))
}
