//! Access layer for the shared stock ledger: per-period balance counters and
//! the append-only batch ledger.
//!
//! All mutations run on the caller's connection (normally the approval
//! transaction) so a later failure rolls back every reservation made so far.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use tracing::instrument;
use uuid::Uuid;

use crate::entities::{stock_balance, stock_batch};
use crate::errors::ServiceError;

/// Period key for a point in time: the first day of its calendar month.
pub fn period_for(at: DateTime<Utc>) -> NaiveDate {
    let date = at.date_naive();
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
        .unwrap_or(date)
}

/// Reads the balance row for (product, warehouse, period), if any.
pub async fn get_balance<C: ConnectionTrait>(
    db: &C,
    product_id: Uuid,
    warehouse_id: Uuid,
    period: NaiveDate,
) -> Result<Option<stock_balance::Model>, ServiceError> {
    stock_balance::Entity::find()
        .filter(stock_balance::Column::ProductId.eq(product_id))
        .filter(stock_balance::Column::WarehouseId.eq(warehouse_id))
        .filter(stock_balance::Column::Period.eq(period))
        .one(db)
        .await
        .map_err(ServiceError::DatabaseError)
}

/// Atomically moves `qty` from available to booked on a balance row.
///
/// The decrement is a single conditional update guarded by
/// `available_qty >= qty`; an affected-row count of zero means another
/// transaction consumed the availability first, and the caller sees
/// `InsufficientStock` instead of an oversubscribed ledger.
#[instrument(skip(db, balance), fields(balance_id = %balance.id, qty = %qty))]
pub async fn reserve<C: ConnectionTrait>(
    db: &C,
    balance: &stock_balance::Model,
    qty: Decimal,
) -> Result<(), ServiceError> {
    if qty <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(format!(
            "Reservation quantity must be positive, got {qty}"
        )));
    }

    let result = stock_balance::Entity::update_many()
        .col_expr(
            stock_balance::Column::AvailableQty,
            Expr::col(stock_balance::Column::AvailableQty).sub(qty),
        )
        .col_expr(
            stock_balance::Column::BookedQty,
            Expr::col(stock_balance::Column::BookedQty).add(qty),
        )
        .col_expr(
            stock_balance::Column::Version,
            Expr::col(stock_balance::Column::Version).add(1),
        )
        .col_expr(stock_balance::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(stock_balance::Column::Id.eq(balance.id))
        .filter(stock_balance::Column::AvailableQty.gte(qty))
        .exec(db)
        .await
        .map_err(ServiceError::DatabaseError)?;

    if result.rows_affected == 0 {
        return Err(ServiceError::InsufficientStock {
            product_id: balance.product_id,
            warehouse_id: balance.warehouse_id,
            requested: qty,
            available: balance.available_qty,
        });
    }

    Ok(())
}

/// Lists unconsumed batches for (product, warehouse), oldest arrival first.
pub async fn list_batches<C: ConnectionTrait>(
    db: &C,
    product_id: Uuid,
    warehouse_id: Uuid,
) -> Result<Vec<stock_batch::Model>, ServiceError> {
    stock_batch::Entity::find()
        .filter(stock_batch::Column::ProductId.eq(product_id))
        .filter(stock_batch::Column::WarehouseId.eq(warehouse_id))
        .filter(stock_batch::Column::FullyConsumed.eq(false))
        .order_by_asc(stock_batch::Column::ArrivedAt)
        .all(db)
        .await
        .map_err(ServiceError::DatabaseError)
}

/// Total physical residual across a batch listing.
pub fn physical_residual(batches: &[stock_batch::Model]) -> Decimal {
    batches.iter().map(|b| b.residual_qty).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn period_is_first_of_month() {
        let at = Utc.with_ymd_and_hms(2026, 8, 29, 13, 45, 0).unwrap();
        assert_eq!(period_for(at), NaiveDate::from_ymd_opt(2026, 8, 1).unwrap());

        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(period_for(at), NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
    }
}
