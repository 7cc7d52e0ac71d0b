//! Inventory lot ledger.
//!
//! The only writer of `stock_lots` and `stock_movements`. All operations take
//! the caller's connection so they commit or roll back with the document
//! they support.

use chrono::{NaiveDate, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Serialize;
use std::cmp::Ordering;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::entities::stock_lot;
use crate::entities::stock_movement::{self, MovementReason};
use crate::errors::ServiceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotSnapshot {
    pub id: Uuid,
    pub quantity: i32,
    pub expiration_date: Option<NaiveDate>,
}

impl From<&stock_lot::Model> for LotSnapshot {
    fn from(lot: &stock_lot::Model) -> Self {
        Self {
            id: lot.id,
            quantity: lot.quantity,
            expiration_date: lot.expiration_date,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LotDraw {
    pub lot_id: Uuid,
    pub quantity: i32,
}

/// Earliest expiration first; lots without expiration go last.
fn fefo_order(a: &LotSnapshot, b: &LotSnapshot) -> Ordering {
    match (a.expiration_date, b.expiration_date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Plans a first-expired-first-out withdrawal of `requested` units.
///
/// Returns `None` when the lots together hold less than `requested`; in that
/// case nothing should be touched. Ties keep the input order.
pub fn plan_fefo(lots: &[LotSnapshot], requested: i32) -> Option<Vec<LotDraw>> {
    if requested <= 0 {
        return Some(Vec::new());
    }
    if total_quantity(lots) < i64::from(requested) {
        return None;
    }

    let mut ordered: Vec<&LotSnapshot> = lots.iter().filter(|lot| lot.quantity > 0).collect();
    ordered.sort_by(|a, b| fefo_order(a, b));

    let mut remaining = requested;
    let mut draws = Vec::new();
    for lot in ordered {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(lot.quantity);
        draws.push(LotDraw {
            lot_id: lot.id,
            quantity: take,
        });
        remaining -= take;
    }
    Some(draws)
}

fn total_quantity(lots: &[LotSnapshot]) -> i64 {
    lots.iter().map(|lot| i64::from(lot.quantity.max(0))).sum()
}

fn clamp_quantity(total: i64) -> i32 {
    i32::try_from(total).unwrap_or(i32::MAX)
}

pub struct StockLedger;

impl StockLedger {
    async fn load_lots<C>(conn: &C, product_id: Uuid) -> Result<Vec<stock_lot::Model>, ServiceError>
    where
        C: ConnectionTrait,
    {
        stock_lot::Entity::find()
            .filter(stock_lot::Column::ProductId.eq(product_id))
            .order_by_asc(stock_lot::Column::CreatedAt)
            .order_by_asc(stock_lot::Column::Id)
            .all(conn)
            .await
            .map_err(ServiceError::db_error)
    }

    /// On-hand units of a product across all lots.
    pub async fn available_quantity<C>(conn: &C, product_id: Uuid) -> Result<i32, ServiceError>
    where
        C: ConnectionTrait,
    {
        let lots = Self::load_lots(conn, product_id).await?;
        let snapshots: Vec<LotSnapshot> = lots.iter().map(LotSnapshot::from).collect();
        Ok(clamp_quantity(total_quantity(&snapshots)))
    }

    /// Withdraws `quantity` units in FEFO order and appends one negative
    /// movement. Fails with `InsufficientStock` before touching any lot when
    /// the product does not hold enough units.
    #[instrument(skip(conn))]
    pub async fn deduct<C>(
        conn: &C,
        product_id: Uuid,
        quantity: i32,
        reason: MovementReason,
        reference_id: Uuid,
    ) -> Result<Vec<LotDraw>, ServiceError>
    where
        C: ConnectionTrait,
    {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "deduction quantity must be positive, got {}",
                quantity
            )));
        }

        let lots = Self::load_lots(conn, product_id).await?;
        let snapshots: Vec<LotSnapshot> = lots.iter().map(LotSnapshot::from).collect();
        let available = clamp_quantity(total_quantity(&snapshots));
        let draws = plan_fefo(&snapshots, quantity).ok_or(ServiceError::InsufficientStock {
            product_id,
            available,
            requested: quantity,
        })?;

        let now = Utc::now();
        for draw in &draws {
            // Guarded decrement: a concurrent writer that drained the lot
            // first leaves zero rows affected.
            let result = stock_lot::Entity::update_many()
                .col_expr(
                    stock_lot::Column::Quantity,
                    Expr::col(stock_lot::Column::Quantity).sub(draw.quantity),
                )
                .col_expr(stock_lot::Column::UpdatedAt, Expr::value(now))
                .filter(stock_lot::Column::Id.eq(draw.lot_id))
                .filter(stock_lot::Column::Quantity.gte(draw.quantity))
                .exec(conn)
                .await
                .map_err(ServiceError::db_error)?;

            if result.rows_affected == 0 {
                let current = Self::available_quantity(conn, product_id).await?;
                warn!(
                    %product_id,
                    lot_id = %draw.lot_id,
                    current,
                    "lot changed underneath deduction"
                );
                return Err(ServiceError::InsufficientStock {
                    product_id,
                    available: current,
                    requested: quantity,
                });
            }
        }

        let lot_id = match draws.as_slice() {
            [single] => Some(single.lot_id),
            _ => None,
        };
        Self::append_movement(conn, product_id, lot_id, -quantity, reason, reference_id).await?;

        counter!("settlement_stock.deductions", 1);
        debug!(%product_id, quantity, lots = draws.len(), "stock deducted");
        Ok(draws)
    }

    /// Puts `quantity` units back on the product's first lot, creating a lot
    /// when the product has none, and appends a positive movement.
    #[instrument(skip(conn))]
    pub async fn restore<C>(
        conn: &C,
        product_id: Uuid,
        quantity: i32,
        reason: MovementReason,
        reference_id: Uuid,
    ) -> Result<Uuid, ServiceError>
    where
        C: ConnectionTrait,
    {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "restore quantity must be positive, got {}",
                quantity
            )));
        }

        let now = Utc::now();
        let lots = Self::load_lots(conn, product_id).await?;
        let lot_id = match lots.first() {
            Some(lot) => {
                stock_lot::Entity::update_many()
                    .col_expr(
                        stock_lot::Column::Quantity,
                        Expr::col(stock_lot::Column::Quantity).add(quantity),
                    )
                    .col_expr(stock_lot::Column::UpdatedAt, Expr::value(now))
                    .filter(stock_lot::Column::Id.eq(lot.id))
                    .exec(conn)
                    .await
                    .map_err(ServiceError::db_error)?;
                lot.id
            }
            None => {
                let lot = stock_lot::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    product_id: Set(product_id),
                    lot_number: Set(format!("RET-{}", reference_id.simple())),
                    quantity: Set(quantity),
                    expiration_date: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(conn)
                .await
                .map_err(ServiceError::db_error)?;
                lot.id
            }
        };

        Self::append_movement(conn, product_id, Some(lot_id), quantity, reason, reference_id)
            .await?;

        counter!("settlement_stock.restorations", 1);
        debug!(%product_id, quantity, %lot_id, "stock restored");
        Ok(lot_id)
    }

    /// Records a written-off return: a zero-quantity movement, no lot change.
    pub async fn record_write_off<C>(
        conn: &C,
        product_id: Uuid,
        reason: MovementReason,
        reference_id: Uuid,
    ) -> Result<(), ServiceError>
    where
        C: ConnectionTrait,
    {
        Self::append_movement(conn, product_id, None, 0, reason, reference_id).await
    }

    async fn append_movement<C>(
        conn: &C,
        product_id: Uuid,
        lot_id: Option<Uuid>,
        quantity: i32,
        reason: MovementReason,
        reference_id: Uuid,
    ) -> Result<(), ServiceError>
    where
        C: ConnectionTrait,
    {
        stock_movement::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            lot_id: Set(lot_id),
            quantity: Set(quantity),
            reason: Set(reason.as_str().to_string()),
            reference_id: Set(reference_id),
            created_at: Set(Utc::now()),
        }
        .insert(conn)
        .await
        .map_err(ServiceError::db_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lot(quantity: i32, expiration: Option<(i32, u32, u32)>) -> LotSnapshot {
        LotSnapshot {
            id: Uuid::new_v4(),
            quantity,
            expiration_date: expiration.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
        }
    }

    #[test]
    fn consumes_earliest_expiration_first() {
        let late = lot(5, Some((2025, 6, 1)));
        let early = lot(3, Some((2024, 12, 1)));
        let undated = lot(10, None);
        let lots = vec![undated.clone(), late.clone(), early.clone()];

        let draws = plan_fefo(&lots, 6).unwrap();
        assert_eq!(
            draws,
            vec![
                LotDraw { lot_id: early.id, quantity: 3 },
                LotDraw { lot_id: late.id, quantity: 3 },
            ]
        );
    }

    #[test]
    fn undated_lots_are_used_last() {
        let undated = lot(4, None);
        let dated = lot(2, Some((2030, 1, 1)));
        let draws = plan_fefo(&[undated.clone(), dated.clone()], 5).unwrap();
        assert_eq!(draws[0].lot_id, dated.id);
        assert_eq!(draws[1], LotDraw { lot_id: undated.id, quantity: 3 });
    }

    #[test]
    fn insufficient_total_plans_nothing() {
        let lots = vec![lot(2, None), lot(3, Some((2024, 1, 1)))];
        assert!(plan_fefo(&lots, 6).is_none());
    }

    #[test]
    fn empty_lots_are_skipped() {
        let empty = lot(0, Some((2020, 1, 1)));
        let full = lot(4, Some((2021, 1, 1)));
        let draws = plan_fefo(&[empty, full.clone()], 4).unwrap();
        assert_eq!(draws, vec![LotDraw { lot_id: full.id, quantity: 4 }]);
    }
}
