use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::services::catalog::{CatalogLookup, CustomerSnapshot, ProductSnapshot};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Ceiling for any single line amount, within the money columns' width.
/// Document sums over lines bounded by this stay inside `Decimal`'s range.
pub const MAX_LINE_AMOUNT: Decimal = dec!(100000000000000);

fn amount_out_of_range(product_id: Uuid) -> ServiceError {
    ServiceError::ValidationError(format!(
        "amount for product {} exceeds {}",
        product_id, MAX_LINE_AMOUNT
    ))
}

/// `quantity * price` for a line of `product_id`, rejected past [`MAX_LINE_AMOUNT`].
pub fn extended_amount(product_id: Uuid, quantity: i32, price: Decimal) -> Result<Decimal, ServiceError> {
    scaled_amount(product_id, price, Decimal::from(quantity))
}

/// `amount * factor`, rejected past [`MAX_LINE_AMOUNT`].
pub fn scaled_amount(product_id: Uuid, amount: Decimal, factor: Decimal) -> Result<Decimal, ServiceError> {
    amount
        .checked_mul(factor)
        .filter(|value| value.abs() <= MAX_LINE_AMOUNT)
        .ok_or_else(|| amount_out_of_range(product_id))
}

/// `amount * percent / 100`, rejected past [`MAX_LINE_AMOUNT`].
pub fn percent_of(product_id: Uuid, amount: Decimal, percent: Decimal) -> Result<Decimal, ServiceError> {
    amount
        .checked_mul(percent)
        .map(|value| value / HUNDRED)
        .filter(|value| value.abs() <= MAX_LINE_AMOUNT)
        .ok_or_else(|| amount_out_of_range(product_id))
}

/// Unit price precedence: explicit override, then the customer's price list,
/// then the product's base price.
pub fn resolve_unit_price(
    explicit_price: Option<Decimal>,
    list_price: Option<Decimal>,
    product: &ProductSnapshot,
) -> Decimal {
    explicit_price.or(list_price).unwrap_or(product.base_price)
}

/// A priced document line with its product snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricedLine {
    pub product: ProductSnapshot,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub discount_percent: Decimal,
    pub line_total: Decimal,
    pub tax_amount: Decimal,
}

impl PricedLine {
    /// Revenue per unit after discount, before tax.
    pub fn net_unit_price(&self) -> Decimal {
        net_unit_price(self.unit_price, self.discount_percent)
    }
}

pub fn net_unit_price(unit_price: Decimal, discount_percent: Decimal) -> Decimal {
    unit_price * (HUNDRED - discount_percent) / HUNDRED
}

/// `line_total = quantity * unit_price * (1 - discount/100)` and
/// `tax_amount = line_total * tax_rate / 100`. No rounding is applied.
pub fn price_line(
    product: ProductSnapshot,
    quantity: i32,
    unit_price: Decimal,
    discount_percent: Decimal,
) -> Result<PricedLine, ServiceError> {
    if quantity <= 0 {
        return Err(ServiceError::ValidationError(format!(
            "quantity for product {} must be positive, got {}",
            product.id, quantity
        )));
    }
    if unit_price < Decimal::ZERO {
        return Err(ServiceError::ValidationError(format!(
            "unit price for product {} must not be negative",
            product.id
        )));
    }
    if discount_percent < Decimal::ZERO || discount_percent > HUNDRED {
        return Err(ServiceError::ValidationError(format!(
            "discount for product {} must be between 0 and 100, got {}",
            product.id, discount_percent
        )));
    }

    let gross = extended_amount(product.id, quantity, unit_price)?;
    let line_total = percent_of(product.id, gross, HUNDRED - discount_percent)?;
    let tax_amount = percent_of(product.id, line_total, product.tax_rate)?;

    Ok(PricedLine {
        product,
        quantity,
        unit_price,
        discount_percent,
        line_total,
        tax_amount,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DocumentTotals {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
}

impl DocumentTotals {
    pub fn add_line(&mut self, line_total: Decimal, tax_amount: Decimal) {
        self.subtotal += line_total;
        self.tax_amount += tax_amount;
        self.total = self.subtotal + self.tax_amount;
    }

    pub fn from_lines(lines: &[PricedLine]) -> Self {
        let mut totals = Self::default();
        for line in lines {
            totals.add_line(line.line_total, line.tax_amount);
        }
        totals
    }
}

/// Resolves prices against the catalog.
#[derive(Clone)]
pub struct PricingResolver {
    catalog: Arc<dyn CatalogLookup>,
}

impl PricingResolver {
    pub fn new(catalog: Arc<dyn CatalogLookup>) -> Self {
        Self { catalog }
    }

    pub async fn resolve_unit_price(
        &self,
        customer: &CustomerSnapshot,
        product: &ProductSnapshot,
        explicit_price: Option<Decimal>,
    ) -> Result<Decimal, ServiceError> {
        if let Some(price) = explicit_price {
            return Ok(price);
        }
        let list_price = match customer.price_list_id {
            Some(price_list_id) => self.catalog.get_list_price(price_list_id, product.id).await?,
            None => None,
        };
        let price = resolve_unit_price(None, list_price, product);
        debug!(
            customer_id = %customer.id,
            product_id = %product.id,
            %price,
            from_list = list_price.is_some(),
            "resolved unit price"
        );
        Ok(price)
    }

    /// Looks up the product, resolves its price and prices the line.
    pub async fn price(
        &self,
        customer: &CustomerSnapshot,
        product_id: Uuid,
        quantity: i32,
        explicit_price: Option<Decimal>,
        discount_percent: Option<Decimal>,
    ) -> Result<PricedLine, ServiceError> {
        let product = self.catalog.get_product(product_id).await?;
        let unit_price = self
            .resolve_unit_price(customer, &product, explicit_price)
            .await?;
        price_line(
            product,
            quantity,
            unit_price,
            discount_percent.unwrap_or(Decimal::ZERO),
        )
    }
}
