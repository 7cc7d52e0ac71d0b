use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::{customer, price_list_entry, product};
use crate::errors::ServiceError;
use crate::services::fiscal::TaxCondition;

/// Customer data the settlement engine reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerSnapshot {
    pub id: Uuid,
    pub name: String,
    pub tax_id: Option<String>,
    pub tax_condition: TaxCondition,
    pub price_list_id: Option<Uuid>,
}

impl From<customer::Model> for CustomerSnapshot {
    fn from(model: customer::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            tax_id: model.tax_id,
            tax_condition: TaxCondition::from_str(&model.tax_condition)
                .unwrap_or(TaxCondition::Other),
            price_list_id: model.price_list_id,
        }
    }
}

/// Product fields copied onto document lines at creation time. Later catalog
/// edits never reach documents that already carry a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductSnapshot {
    pub id: Uuid,
    pub name: String,
    pub sku: String,
    pub base_price: Decimal,
    pub cost_price: Decimal,
    pub tax_rate: Decimal,
}

impl From<product::Model> for ProductSnapshot {
    fn from(model: product::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            sku: model.sku,
            base_price: model.base_price,
            cost_price: model.cost_price,
            tax_rate: model.tax_rate,
        }
    }
}

/// Read-only access to the customer and product catalog.
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    async fn get_customer(&self, id: Uuid) -> Result<CustomerSnapshot, ServiceError>;

    async fn get_product(&self, id: Uuid) -> Result<ProductSnapshot, ServiceError>;

    /// `None` when the list has no entry for the product.
    async fn get_list_price(
        &self,
        price_list_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<Decimal>, ServiceError>;
}

#[derive(Clone)]
pub struct SeaOrmCatalog {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmCatalog {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CatalogLookup for SeaOrmCatalog {
    async fn get_customer(&self, id: Uuid) -> Result<CustomerSnapshot, ServiceError> {
        customer::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .map(CustomerSnapshot::from)
            .ok_or_else(|| ServiceError::not_found("Customer", id))
    }

    async fn get_product(&self, id: Uuid) -> Result<ProductSnapshot, ServiceError> {
        product::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .map(ProductSnapshot::from)
            .ok_or_else(|| ServiceError::not_found("Product", id))
    }

    async fn get_list_price(
        &self,
        price_list_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<Decimal>, ServiceError> {
        let entry = price_list_entry::Entity::find()
            .filter(price_list_entry::Column::PriceListId.eq(price_list_id))
            .filter(price_list_entry::Column::ProductId.eq(product_id))
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(entry.map(|e| e.price))
    }
}
