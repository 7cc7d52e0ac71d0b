#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    Router,
};
use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{sea_query::Expr, ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;
use wholesale_settlement::{
    config::AppConfig,
    db,
    entities::{customer, price_list_entry, product, quotation, stock_lot, stock_movement},
    events,
    services::{
        consignments::ConsignmentService, invoicing::InvoicingService,
        quotations::QuotationService, stock_ledger::StockLedger,
    },
    AppState,
};

pub const CONCURRENT_CONNECTIONS: u32 = 4;

/// Application state over a file-backed SQLite database living in a
/// temporary directory that is removed on drop.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
    _dir: TempDir,
}

pub struct SeededProduct {
    pub id: Uuid,
    pub base_price: Decimal,
    pub cost_price: Decimal,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Pool wide enough for spawned callers to hold overlapping
    /// transactions. Pair with a multi-thread runtime.
    pub async fn concurrent() -> Self {
        Self::with_config(|cfg| {
            cfg.db_max_connections = CONCURRENT_CONNECTIONS;
            cfg.db_min_connections = CONCURRENT_CONNECTIONS;
        })
        .await
    }

    /// Builds the app after letting the caller adjust the configuration.
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let db_path = dir.path().join("settlement_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.expiry_sweep_interval_secs = 0;
        adjust(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_sender, event_rx) = events::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let state = AppState::new(Arc::new(pool), cfg, event_sender);
        let router = wholesale_settlement::app_router(state.clone());

        Self {
            router,
            state,
            _event_task: event_task,
            _dir: dir,
        }
    }

    pub fn db(&self) -> &sea_orm::DatabaseConnection {
        &self.state.db
    }

    pub fn quotations(&self) -> Arc<QuotationService> {
        self.state.services.quotations.clone()
    }

    pub fn consignments(&self) -> Arc<ConsignmentService> {
        self.state.services.consignments.clone()
    }

    pub fn invoicing(&self) -> Arc<InvoicingService> {
        self.state.services.invoicing.clone()
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize request body"))
            }
            None => Body::empty(),
        };
        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn seed_customer(&self, tax_condition: &str) -> Uuid {
        self.seed_customer_with_list(tax_condition, None).await
    }

    pub async fn seed_customer_with_list(
        &self,
        tax_condition: &str,
        price_list_id: Option<Uuid>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        customer::ActiveModel {
            id: Set(id),
            name: Set(format!("Cliente {}", &id.to_string()[..8])),
            tax_id: Set(Some("30-71234567-8".to_string())),
            tax_condition: Set(tax_condition.to_string()),
            price_list_id: Set(price_list_id),
            created_at: Set(Utc::now()),
        }
        .insert(self.db())
        .await
        .expect("seed customer");
        id
    }

    /// Product with a 21% tax rate.
    pub async fn seed_product(&self, base_price: Decimal, cost_price: Decimal) -> SeededProduct {
        self.seed_product_with_tax(base_price, cost_price, Decimal::from(21))
            .await
    }

    pub async fn seed_product_with_tax(
        &self,
        base_price: Decimal,
        cost_price: Decimal,
        tax_rate: Decimal,
    ) -> SeededProduct {
        let id = Uuid::new_v4();
        product::ActiveModel {
            id: Set(id),
            name: Set(format!("Producto {}", &id.to_string()[..8])),
            sku: Set(format!("SKU-{}", &id.to_string()[..8])),
            base_price: Set(base_price),
            cost_price: Set(cost_price),
            tax_rate: Set(tax_rate),
            created_at: Set(Utc::now()),
        }
        .insert(self.db())
        .await
        .expect("seed product");
        SeededProduct {
            id,
            base_price,
            cost_price,
        }
    }

    pub async fn seed_list_price(&self, price_list_id: Uuid, product_id: Uuid, price: Decimal) {
        price_list_entry::ActiveModel {
            id: Set(Uuid::new_v4()),
            price_list_id: Set(price_list_id),
            product_id: Set(product_id),
            price: Set(price),
        }
        .insert(self.db())
        .await
        .expect("seed price list entry");
    }

    pub async fn seed_lot(
        &self,
        product_id: Uuid,
        quantity: i32,
        expiration_date: Option<NaiveDate>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        stock_lot::ActiveModel {
            id: Set(id),
            product_id: Set(product_id),
            lot_number: Set(format!("L-{}", &id.to_string()[..8])),
            quantity: Set(quantity),
            expiration_date: Set(expiration_date),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db())
        .await
        .expect("seed stock lot");
        id
    }

    pub async fn stock(&self, product_id: Uuid) -> i32 {
        StockLedger::available_quantity(self.db(), product_id)
            .await
            .expect("read stock")
    }

    pub async fn lot_quantity(&self, lot_id: Uuid) -> i32 {
        stock_lot::Entity::find_by_id(lot_id)
            .one(self.db())
            .await
            .expect("read lot")
            .expect("lot exists")
            .quantity
    }

    pub async fn movements(&self, reference_id: Uuid) -> Vec<stock_movement::Model> {
        stock_movement::Entity::find()
            .filter(stock_movement::Column::ReferenceId.eq(reference_id))
            .all(self.db())
            .await
            .expect("read movements")
    }

    /// Moves a quotation's validity window into the past.
    pub async fn backdate_quotation(&self, quotation_id: Uuid) {
        quotation::Entity::update_many()
            .col_expr(
                quotation::Column::ValidUntil,
                Expr::value(Utc::now() - Duration::days(1)),
            )
            .filter(quotation::Column::Id.eq(quotation_id))
            .exec(self.db())
            .await
            .expect("backdate quotation");
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}
