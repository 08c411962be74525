//! Status-change command for purchase requisitions.
//!
//! The sole entry point for moving a requisition through its lifecycle.
//! Most transitions are plain status writes; the transition into `approved`
//! additionally allocates every stock-withdrawal line across its candidate
//! warehouses, re-prices the lines from FIFO batch costs, and emits one
//! stock-transfer work order per warehouse touched. The whole approval is a
//! single transaction: any failure leaves the request, the balance counters,
//! and the document tables exactly as they were.

use crate::commands::Command;
use crate::{
    db::DbPool,
    entities::{
        line_allocation, purchase_request,
        purchase_request::RequestStatus,
        purchase_request_line,
        purchase_request_line::LineSource,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        allocation::{self, CandidateWarehouse},
        request_status, stock_ledger,
        transfer_orders::{self, GeneratedTransferOrder},
    },
};
use chrono::Utc;
use lazy_static::lazy_static;
use prometheus::{CounterVec, IntCounterVec, Opts};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionError,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

lazy_static! {
    static ref STATUS_CHANGES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "requisition_status_changes_total",
            "Total number of requisition status changes"
        ),
        &["new_status"]
    )
    .expect("metric can be created");
    static ref STATUS_CHANGE_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "requisition_status_change_failures_total",
            "Total number of failed requisition status changes"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
    static ref RESERVED_QUANTITY: CounterVec = CounterVec::new(
        Opts::new(
            "requisition_reserved_quantity_total",
            "Total quantity reserved from warehouse stock"
        ),
        &["warehouse_id"]
    )
    .expect("metric can be created");
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ChangeRequestStatusCommand {
    pub request_id: Uuid,
    pub new_status: RequestStatus,
    /// Per-line candidate warehouses, required only for approvals that have
    /// stock-withdrawal lines. Priority is the list order.
    #[validate]
    pub allocations: Option<Vec<LineAllocationInstruction>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LineAllocationInstruction {
    pub line_id: Uuid,
    #[validate(length(min = 1))]
    pub candidates: Vec<CandidateWarehouseRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateWarehouseRequest {
    pub warehouse_id: Uuid,
    /// Stock figure the client observed; audit display only.
    pub observed_available: Option<Decimal>,
}

/// The full updated request returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatedRequest {
    pub request: purchase_request::Model,
    pub lines: Vec<LineDetail>,
    pub transfer_orders: Vec<GeneratedTransferOrder>,
    /// Lines the candidate warehouses could not fully cover. Always explicit;
    /// a deficit never silently disappears into the response.
    pub unmet_lines: Vec<UnmetLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineDetail {
    pub line: purchase_request_line::Model,
    pub allocations: Vec<line_allocation::Model>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnmetLine {
    pub line_id: Uuid,
    pub requested: Decimal,
    pub unmet: Decimal,
}

struct TxnOutcome {
    updated: UpdatedRequest,
    events: Vec<Event>,
}

#[async_trait::async_trait]
impl Command for ChangeRequestStatusCommand {
    type Result = UpdatedRequest;

    #[instrument(skip(self, db_pool, event_sender), fields(request_id = %self.request_id, new_status = self.new_status.as_str()))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate().map_err(|e| {
            STATUS_CHANGE_FAILURES
                .with_label_values(&["validation_error"])
                .inc();
            let msg = format!("Invalid input: {}", e);
            error!("{}", msg);
            ServiceError::ValidationError(msg)
        })?;

        let db = db_pool.as_ref();
        let outcome = self.apply_in_transaction(db).await.map_err(|e| {
            STATUS_CHANGE_FAILURES
                .with_label_values(&[error_label(&e)])
                .inc();
            e
        })?;

        STATUS_CHANGES
            .with_label_values(&[self.new_status.as_str()])
            .inc();

        // The transaction is committed; event delivery is best-effort.
        for event in outcome.events {
            if let Event::StockReserved {
                warehouse_id,
                quantity,
                ..
            } = &event
            {
                RESERVED_QUANTITY
                    .with_label_values(&[&warehouse_id.to_string()])
                    .inc_by(quantity.to_f64().unwrap_or(0.0));
            }
            if let Err(e) = event_sender.send(event).await {
                warn!(request_id = %self.request_id, error = %e, "Failed to publish event");
            }
        }

        info!(
            request_id = %self.request_id,
            new_status = self.new_status.as_str(),
            "Request status change committed"
        );

        Ok(outcome.updated)
    }
}

impl ChangeRequestStatusCommand {
    async fn apply_in_transaction(&self, db: &DbPool) -> Result<TxnOutcome, ServiceError> {
        let command = self.clone();
        db.transaction::<_, TxnOutcome, ServiceError>(move |txn| {
            Box::pin(async move { command.apply(txn).await })
        })
        .await
        .map_err(|e| {
            error!(request_id = %self.request_id, "Status change transaction failed: {}", e);
            match e {
                TransactionError::Connection(db_err) => ServiceError::DatabaseError(db_err),
                TransactionError::Transaction(service_err) => service_err,
            }
        })
    }

    async fn apply(&self, txn: &sea_orm::DatabaseTransaction) -> Result<TxnOutcome, ServiceError> {
        let request = purchase_request::Entity::find_by_id(self.request_id)
            .one(txn)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Request {} not found", self.request_id))
            })?;

        let old_status = request.status;
        request_status::ensure_transition(old_status, self.new_status)?;

        let now = Utc::now();
        let mut events = Vec::new();
        let mut unmet_lines = Vec::new();
        let mut generated_orders = Vec::new();

        if self.new_status == RequestStatus::Approved {
            let (orders, unmet, alloc_events) = self.allocate_stock_lines(txn, &request).await?;
            generated_orders = orders;
            unmet_lines = unmet;
            events.extend(alloc_events);
        }

        let mut active: purchase_request::ActiveModel = request.clone().into();
        active.status = Set(self.new_status);
        active.version = Set(request.version + 1);
        active.updated_at = Set(Some(now));
        let updated_request = active
            .update(txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        events.push(Event::RequestStatusChanged {
            request_id: updated_request.id,
            request_number: updated_request.request_number.clone(),
            old_status,
            new_status: self.new_status,
        });
        for order in &generated_orders {
            events.push(Event::TransferOrderCreated {
                request_id: updated_request.id,
                transfer_order_id: order.order.id,
                order_number: order.order.order_number.clone(),
                warehouse_id: order.order.warehouse_id,
            });
        }

        let lines = load_line_details(txn, updated_request.id).await?;

        Ok(TxnOutcome {
            updated: UpdatedRequest {
                request: updated_request,
                lines,
                transfer_orders: generated_orders,
                unmet_lines,
            },
            events,
        })
    }

    /// Runs the allocation engine over every stock-withdrawal line, strictly
    /// sequentially: later lines price against booked stock the earlier ones
    /// just reserved.
    async fn allocate_stock_lines(
        &self,
        txn: &sea_orm::DatabaseTransaction,
        request: &purchase_request::Model,
    ) -> Result<
        (
            Vec<GeneratedTransferOrder>,
            Vec<UnmetLine>,
            Vec<Event>,
        ),
        ServiceError,
    > {
        let lines = purchase_request_line::Entity::find()
            .filter(purchase_request_line::Column::RequestId.eq(request.id))
            .order_by_asc(purchase_request_line::Column::CreatedAt)
            .all(txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let now = Utc::now();
        let period = stock_ledger::period_for(now);
        let mut events = Vec::new();
        let mut unmet_lines = Vec::new();
        let mut allocated = Vec::new();

        for line in lines {
            if line.source != LineSource::StockWithdrawal {
                continue;
            }

            let instruction = self
                .allocations
                .as_deref()
                .and_then(|list| list.iter().find(|i| i.line_id == line.id));

            let Some(instruction) = instruction else {
                // No candidates supplied for this line: it stays entirely
                // unallocated and the deficit is reported back.
                unmet_lines.push(UnmetLine {
                    line_id: line.id,
                    requested: line.quantity,
                    unmet: line.quantity,
                });
                events.push(Event::PartialAllocationWarning {
                    request_id: request.id,
                    line_id: line.id,
                    requested: line.quantity,
                    allocated: Decimal::ZERO,
                });
                continue;
            };

            let candidates: Vec<CandidateWarehouse> = instruction
                .candidates
                .iter()
                .map(|c| CandidateWarehouse {
                    warehouse_id: c.warehouse_id,
                    observed_available: c.observed_available,
                })
                .collect();

            let outcome = allocation::allocate_line(txn, &line, &candidates, period).await?;

            for entry in &outcome.entries {
                events.push(Event::StockReserved {
                    request_id: request.id,
                    line_id: line.id,
                    product_id: line.product_id,
                    warehouse_id: entry.warehouse_id,
                    quantity: entry.quantity,
                    unit_cost: entry.unit_cost,
                });
            }
            if outcome.cost_shortfall {
                events.push(Event::BatchCostShortfall {
                    request_id: request.id,
                    line_id: line.id,
                    product_id: line.product_id,
                });
            }
            if !outcome.fully_met() {
                unmet_lines.push(UnmetLine {
                    line_id: line.id,
                    requested: line.quantity,
                    unmet: outcome.remaining_unmet,
                });
                events.push(Event::PartialAllocationWarning {
                    request_id: request.id,
                    line_id: line.id,
                    requested: line.quantity,
                    allocated: outcome.total_qty,
                });
            }

            allocated.push((line, outcome));
        }

        let orders = transfer_orders::generate_for_request(txn, request.id, &allocated, now).await?;

        Ok((orders, unmet_lines, events))
    }
}

/// Loads all lines of a request with their allocation breakdowns.
pub async fn load_line_details<C: sea_orm::ConnectionTrait>(
    db: &C,
    request_id: Uuid,
) -> Result<Vec<LineDetail>, ServiceError> {
    let lines = purchase_request_line::Entity::find()
        .filter(purchase_request_line::Column::RequestId.eq(request_id))
        .order_by_asc(purchase_request_line::Column::CreatedAt)
        .all(db)
        .await
        .map_err(ServiceError::DatabaseError)?;

    let mut details = Vec::with_capacity(lines.len());
    for line in lines {
        let allocations = line_allocation::Entity::find()
            .filter(line_allocation::Column::LineId.eq(line.id))
            .order_by_asc(line_allocation::Column::Sequence)
            .all(db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        details.push(LineDetail { line, allocations });
    }

    Ok(details)
}

fn error_label(e: &ServiceError) -> &'static str {
    match e {
        ServiceError::ValidationError(_) => "validation_error",
        ServiceError::InvalidStatusTransition { .. } => "invalid_transition",
        ServiceError::InsufficientStock { .. } => "insufficient_stock",
        ServiceError::LedgerInconsistency { .. } => "ledger_inconsistency",
        ServiceError::DocumentNumberCollision(_) => "number_collision",
        ServiceError::NotFound(_) => "not_found",
        ServiceError::DatabaseError(_) => "database_error",
        _ => "other",
    }
}
