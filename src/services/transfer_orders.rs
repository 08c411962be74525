//! Generation of internal stock-transfer work orders from allocation
//! results: one order per warehouse touched by an approval, items grouped
//! per originating line.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set, SqlErr};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::{purchase_request_line, transfer_order, transfer_order_item};
use crate::errors::ServiceError;
use crate::services::allocation::LineAllocationOutcome;
use crate::services::sequences::{self, DOC_TYPE_TRANSFER};

const MAX_NUMBER_ATTEMPTS: usize = 3;

/// A minted transfer order with its items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedTransferOrder {
    pub order: transfer_order::Model,
    pub items: Vec<transfer_order_item::Model>,
}

/// Emits transfer work orders for every warehouse that contributed stock to
/// this approval.
///
/// `allocated` pairs each stock-withdrawal line with its allocation outcome;
/// lines that received nothing produce no order. Two lines drawing from the
/// same warehouse share one order with one item each.
#[instrument(skip(db, allocated), fields(request_id = %request_id))]
pub async fn generate_for_request<C: ConnectionTrait>(
    db: &C,
    request_id: Uuid,
    allocated: &[(purchase_request_line::Model, LineAllocationOutcome)],
    at: DateTime<Utc>,
) -> Result<Vec<GeneratedTransferOrder>, ServiceError> {
    // Group allocation entries by warehouse, preserving first-touch order.
    let mut warehouses: Vec<Uuid> = Vec::new();
    let mut grouped: Vec<Vec<(&purchase_request_line::Model, rust_decimal::Decimal)>> = Vec::new();

    for (line, outcome) in allocated {
        for entry in &outcome.entries {
            if entry.quantity <= rust_decimal::Decimal::ZERO {
                continue;
            }
            match warehouses.iter().position(|w| *w == entry.warehouse_id) {
                Some(idx) => grouped[idx].push((line, entry.quantity)),
                None => {
                    warehouses.push(entry.warehouse_id);
                    grouped.push(vec![(line, entry.quantity)]);
                }
            }
        }
    }

    let period = sequences::period_tag(at);
    let floor = existing_max_sequence(db, &period).await?;
    let mut orders = Vec::with_capacity(warehouses.len());

    for (warehouse_id, items) in warehouses.into_iter().zip(grouped) {
        let order = mint_order(db, request_id, warehouse_id, &period, floor, at).await?;
        let mut order_items = Vec::with_capacity(items.len());
        for (line, quantity) in items {
            let item = transfer_order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                transfer_order_id: Set(order.id),
                line_id: Set(line.id),
                product_id: Set(line.product_id),
                quantity: Set(quantity),
                unit: Set(line.unit.clone()),
                created_at: Set(at),
            }
            .insert(db)
            .await
            .map_err(ServiceError::DatabaseError)?;
            order_items.push(item);
        }

        info!(
            order_number = %order.order_number,
            warehouse_id = %order.warehouse_id,
            item_count = order_items.len(),
            "Generated transfer work order"
        );
        orders.push(GeneratedTransferOrder {
            order,
            items: order_items,
        });
    }

    Ok(orders)
}

/// Inserts the order header, retrying with a fresh sequence if the unique
/// constraint on `order_number` reports a concurrent mint.
async fn mint_order<C: ConnectionTrait>(
    db: &C,
    request_id: Uuid,
    warehouse_id: Uuid,
    period: &str,
    floor: i32,
    at: DateTime<Utc>,
) -> Result<transfer_order::Model, ServiceError> {
    for _ in 0..MAX_NUMBER_ATTEMPTS {
        let seq = sequences::next_sequence(db, DOC_TYPE_TRANSFER, period, floor).await?;
        let number = sequences::format_number(DOC_TYPE_TRANSFER, period, seq);

        let insert = transfer_order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set(number.clone()),
            warehouse_id: Set(warehouse_id),
            request_id: Set(request_id),
            created_at: Set(at),
        }
        .insert(db)
        .await;

        match insert {
            Ok(order) => return Ok(order),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                warn!(%number, "Transfer number collision, recomputing sequence");
            }
            Err(e) => return Err(ServiceError::DatabaseError(e)),
        }
    }

    Err(ServiceError::DocumentNumberCollision(format!(
        "transfer order numbering for period {period} kept colliding"
    )))
}

/// Highest sequence already present among this period's transfer orders.
/// Seeds the counter so numbering continues over pre-counter data.
async fn existing_max_sequence<C: ConnectionTrait>(
    db: &C,
    period: &str,
) -> Result<i32, ServiceError> {
    let prefix = format!("{DOC_TYPE_TRANSFER}-{period}-%");
    let numbers = transfer_order::Entity::find()
        .filter(transfer_order::Column::OrderNumber.like(&prefix))
        .all(db)
        .await
        .map_err(ServiceError::DatabaseError)?;

    Ok(numbers
        .iter()
        .filter_map(|o| sequences::parse_sequence(&o.order_number))
        .max()
        .unwrap_or(0))
}
