pub mod common;
pub mod consignments;
pub mod health;
pub mod invoices;
pub mod quotations;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    audit::{AuditSink, EventAuditSink},
    catalog::{CatalogLookup, SeaOrmCatalog},
    consignments::ConsignmentService,
    fiscal::{CaeAuthority, MockCaeAuthority},
    invoicing::InvoicingService,
    quotations::QuotationService,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub quotations: Arc<QuotationService>,
    pub consignments: Arc<ConsignmentService>,
    pub invoicing: Arc<InvoicingService>,
}

impl AppServices {
    /// Wires every service against the database catalog and the mock CAE
    /// authority.
    pub fn new(db_pool: Arc<DbPool>, config: &AppConfig, event_sender: EventSender) -> Self {
        let catalog: Arc<dyn CatalogLookup> = Arc::new(SeaOrmCatalog::new(db_pool.clone()));
        let cae: Arc<dyn CaeAuthority> = Arc::new(MockCaeAuthority::new(config.cae_validity_days));
        Self::with_parts(db_pool, config, event_sender, catalog, cae)
    }

    /// Same as `new` with the catalog and CAE authority supplied by the caller.
    pub fn with_parts(
        db_pool: Arc<DbPool>,
        config: &AppConfig,
        event_sender: EventSender,
        catalog: Arc<dyn CatalogLookup>,
        cae: Arc<dyn CaeAuthority>,
    ) -> Self {
        let audit: Arc<dyn AuditSink> = Arc::new(EventAuditSink::new(event_sender.clone()));

        let quotations = Arc::new(QuotationService::new(
            db_pool.clone(),
            catalog.clone(),
            audit.clone(),
            event_sender.clone(),
            config.quotation_valid_days,
        ));
        let consignments = Arc::new(ConsignmentService::new(
            db_pool.clone(),
            catalog.clone(),
            audit.clone(),
            event_sender.clone(),
        ));
        let invoicing = Arc::new(InvoicingService::new(
            db_pool,
            catalog,
            cae,
            audit,
            event_sender,
            config.seller_tax_condition(),
            config.default_point_of_sale,
            config.low_margin_threshold(),
        ));

        Self {
            quotations,
            consignments,
            invoicing,
        }
    }
}
