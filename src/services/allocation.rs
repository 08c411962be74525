//! Allocation engine for stock-sourced requisition lines.
//!
//! Satisfies one line's requested quantity across an ordered list of
//! candidate warehouses, pricing every take with FIFO batch costing and
//! reserving against the balance counters as it goes. Runs entirely on the
//! caller's transaction; any fatal error unwinds every reservation made for
//! the request so far.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::entities::{line_allocation, product, purchase_request_line, warehouse};
use crate::errors::ServiceError;
use crate::services::{batch_costing, stock_ledger};

/// One candidate warehouse, in caller-supplied priority order.
///
/// `observed_available` is whatever stock figure the client saw when
/// composing the request. It is persisted for audit display only and never
/// consulted for the reservation decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateWarehouse {
    pub warehouse_id: Uuid,
    pub observed_available: Option<Decimal>,
}

/// Stock reserved at one warehouse for one line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationEntry {
    pub warehouse_id: Uuid,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
}

/// Result of allocating a single line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineAllocationOutcome {
    pub line_id: Uuid,
    pub product_id: Uuid,
    pub entries: Vec<AllocationEntry>,
    pub total_cost: Decimal,
    pub total_qty: Decimal,
    /// Requested quantity the candidates could not cover.
    pub remaining_unmet: Decimal,
    /// True when any take was partly priced at a fallback cost because the
    /// batch ledger ran out mid-pricing.
    pub cost_shortfall: bool,
}

impl LineAllocationOutcome {
    pub fn fully_met(&self) -> bool {
        self.remaining_unmet <= Decimal::ZERO
    }
}

/// Allocates `line.quantity` across `candidates`, reserving and pricing as
/// it goes.
///
/// Fatal conditions (`LedgerInconsistency`, database errors) propagate to
/// the caller; an exhausted candidate list is not an error and surfaces as
/// `remaining_unmet > 0`. A line allocated nothing keeps its candidate list
/// as zero-quantity audit rows and its price untouched; otherwise the line
/// is re-priced to the weighted allocated cost.
#[instrument(skip(db, line, candidates), fields(line_id = %line.id, product_id = %line.product_id))]
pub async fn allocate_line<C: sea_orm::ConnectionTrait>(
    db: &C,
    line: &purchase_request_line::Model,
    candidates: &[CandidateWarehouse],
    period: NaiveDate,
) -> Result<LineAllocationOutcome, ServiceError> {
    let mut remaining = line.quantity;
    let mut entries: Vec<AllocationEntry> = Vec::new();
    let mut total_cost = Decimal::ZERO;
    let mut total_qty = Decimal::ZERO;
    let mut cost_shortfall = false;

    for candidate in candidates {
        if remaining <= Decimal::ZERO {
            break;
        }

        let balance =
            match stock_ledger::get_balance(db, line.product_id, candidate.warehouse_id, period)
                .await?
            {
                Some(balance) if balance.available_qty > Decimal::ZERO => balance,
                _ => continue,
            };

        let take_qty = remaining.min(balance.available_qty);

        let batches =
            stock_ledger::list_batches(db, line.product_id, candidate.warehouse_id).await?;
        let physical = stock_ledger::physical_residual(&batches);

        // The physical batch ledger must be able to cover this take on top
        // of everything already booked; otherwise the counters are lying and
        // nothing here can be trusted.
        if physical - balance.booked_qty < take_qty {
            log_inconsistency(db, line.product_id, candidate.warehouse_id).await;
            return Err(ServiceError::LedgerInconsistency {
                product_id: line.product_id,
                warehouse_id: candidate.warehouse_id,
                needed: take_qty,
                logical_available: balance.available_qty,
                physical_available: physical,
            });
        }

        let priced = batch_costing::price_quantity(&batches, balance.booked_qty, take_qty);
        if priced.shortfall > Decimal::ZERO {
            cost_shortfall = true;
            warn!(
                product_id = %line.product_id,
                warehouse_id = %candidate.warehouse_id,
                shortfall = %priced.shortfall,
                "Batch ledger exhausted mid-pricing, shortfall priced at last batch cost"
            );
        }

        stock_ledger::reserve(db, &balance, take_qty).await?;

        entries.push(AllocationEntry {
            warehouse_id: candidate.warehouse_id,
            quantity: take_qty,
            unit_cost: priced.unit_cost,
        });
        total_cost += priced.unit_cost * take_qty;
        total_qty += take_qty;
        remaining -= take_qty;
    }

    let outcome = LineAllocationOutcome {
        line_id: line.id,
        product_id: line.product_id,
        entries,
        total_cost,
        total_qty,
        remaining_unmet: remaining.max(Decimal::ZERO),
        cost_shortfall,
    };

    persist_outcome(db, line, candidates, &outcome).await?;

    Ok(outcome)
}

/// Writes the allocation breakdown and re-prices the line.
async fn persist_outcome<C: sea_orm::ConnectionTrait>(
    db: &C,
    line: &purchase_request_line::Model,
    candidates: &[CandidateWarehouse],
    outcome: &LineAllocationOutcome,
) -> Result<(), ServiceError> {
    let now = Utc::now();

    if outcome.total_qty <= Decimal::ZERO {
        // Nothing allocated anywhere: keep the untouched candidate list as
        // an audit record and leave the line's estimate alone.
        for (idx, candidate) in candidates.iter().enumerate() {
            line_allocation::ActiveModel {
                id: Set(Uuid::new_v4()),
                line_id: Set(line.id),
                warehouse_id: Set(candidate.warehouse_id),
                sequence: Set(idx as i32),
                quantity: Set(Decimal::ZERO),
                unit_cost: Set(Decimal::ZERO),
                observed_available: Set(candidate.observed_available),
                created_at: Set(now),
            }
            .insert(db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        }
        return Ok(());
    }

    for (idx, entry) in outcome.entries.iter().enumerate() {
        let observed = candidates
            .iter()
            .find(|c| c.warehouse_id == entry.warehouse_id)
            .and_then(|c| c.observed_available);
        line_allocation::ActiveModel {
            id: Set(Uuid::new_v4()),
            line_id: Set(line.id),
            warehouse_id: Set(entry.warehouse_id),
            sequence: Set(idx as i32),
            quantity: Set(entry.quantity),
            unit_cost: Set(entry.unit_cost.round_dp(4)),
            observed_available: Set(observed),
            created_at: Set(now),
        }
        .insert(db)
        .await
        .map_err(ServiceError::DatabaseError)?;
    }

    let unit_price = (outcome.total_cost / outcome.total_qty).round_dp(4);
    let mut active: purchase_request_line::ActiveModel = line.clone().into();
    active.unit_price = Set(unit_price);
    active.total = Set(outcome.total_cost.round_dp(4));
    active.updated_at = Set(Some(now));
    active.update(db).await.map_err(ServiceError::DatabaseError)?;

    Ok(())
}

/// Best-effort name lookup so the inconsistency shows up in logs with
/// human-readable context; the error itself carries the ids.
async fn log_inconsistency<C: sea_orm::ConnectionTrait>(
    db: &C,
    product_id: Uuid,
    warehouse_id: Uuid,
) {
    let product_name = product::Entity::find_by_id(product_id)
        .one(db)
        .await
        .ok()
        .flatten()
        .map(|p| p.name);
    let warehouse_name = warehouse::Entity::find_by_id(warehouse_id)
        .one(db)
        .await
        .ok()
        .flatten()
        .map(|w| w.name);
    warn!(
        %product_id,
        %warehouse_id,
        product = product_name.as_deref().unwrap_or("?"),
        warehouse = warehouse_name.as_deref().unwrap_or("?"),
        "Stock ledger inconsistency detected, aborting approval for manual reconciliation"
    );
}
