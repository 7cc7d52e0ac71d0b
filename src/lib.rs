//! Wholesale settlement engine
//!
//! Quotations, consignments and invoicing for a wholesale distributor's back
//! office, backed by a relational store and served over HTTP.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod services;

use axum::{
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: events::EventSender,
    ) -> Self {
        let services = handlers::AppServices::new(db.clone(), &config, event_sender.clone());
        Self {
            db,
            config,
            event_sender,
            services,
        }
    }
}

// Common response wrappers
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

pub fn api_v1_routes() -> Router<AppState> {
    use handlers::{consignments, invoices, quotations};

    let quotation_routes = Router::new()
        .route("/quotations", post(quotations::create_quotation))
        .route(
            "/quotations/:id",
            get(quotations::get_quotation)
                .put(quotations::update_quotation)
                .delete(quotations::delete_quotation),
        )
        .route("/quotations/:id/send", post(quotations::send_quotation))
        .route("/quotations/:id/accept", post(quotations::accept_quotation))
        .route("/quotations/:id/reject", post(quotations::reject_quotation))
        .route(
            "/quotations/:id/duplicate",
            post(quotations::duplicate_quotation),
        )
        .route(
            "/quotations/:id/invoice",
            post(quotations::invoice_quotation),
        )
        .route(
            "/quotations/:id/consignment",
            post(consignments::create_from_quotation),
        )
        .route(
            "/maintenance/expire-quotations",
            post(quotations::expire_quotations),
        );

    let consignment_routes = Router::new()
        .route("/consignments", post(consignments::create_consignment))
        .route("/consignments/:id", get(consignments::get_consignment))
        .route(
            "/consignments/:id/returns",
            post(consignments::process_return),
        )
        .route(
            "/consignments/:id/available",
            get(consignments::available_to_invoice),
        )
        .route(
            "/consignments/:id/invoice",
            post(consignments::invoice_consignment),
        )
        .route(
            "/consignments/:id/close-check",
            post(consignments::check_and_close),
        );

    let invoice_routes = Router::new()
        .route("/invoices/:id", get(invoices::get_invoice))
        .route("/margins/validate", post(invoices::validate_margins))
        .route("/sales/:id/payments", post(invoices::record_payment));

    Router::new()
        .merge(quotation_routes)
        .merge(consignment_routes)
        .merge(invoice_routes)
}

/// Full application router with state applied; transport layers are added
/// by the binary.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .merge(handlers::health::health_routes())
        .nest("/api/v1", api_v1_routes())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_has_data_and_timestamp_only() {
        let body = serde_json::to_value(ApiResponse::success(42)).unwrap();
        let object = body.as_object().unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"], 42);
        assert!(object.contains_key("timestamp"));
        assert_eq!(object.len(), 3);
    }
}
