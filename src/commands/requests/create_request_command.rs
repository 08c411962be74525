use crate::commands::Command;
use crate::{
    db::DbPool,
    entities::{
        purchase_request,
        purchase_request::RequestStatus,
        purchase_request_line,
        purchase_request_line::LineSource,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::sequences::{self, DOC_TYPE_REQUEST},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionError,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateRequestCommand {
    pub project_id: Option<Uuid>,
    pub requested_by: Uuid,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
    #[validate(length(min = 1))]
    pub lines: Vec<NewRequestLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRequestLine {
    pub product_id: Uuid,
    pub source: LineSource,
    pub quantity: Decimal,
    pub unit: String,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedRequest {
    pub request: purchase_request::Model,
    pub lines: Vec<purchase_request_line::Model>,
}

#[async_trait::async_trait]
impl Command for CreateRequestCommand {
    type Result = CreatedRequest;

    #[instrument(skip(self, db_pool, event_sender), fields(requested_by = %self.requested_by, line_count = self.lines.len()))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate().map_err(|e| {
            let msg = format!("Invalid input: {}", e);
            error!("{}", msg);
            ServiceError::ValidationError(msg)
        })?;

        // Quantities and prices are Decimal, which validator's range rules
        // do not cover; check them by hand before touching the database.
        for (idx, line) in self.lines.iter().enumerate() {
            if line.quantity <= Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "Line {idx}: quantity must be positive, got {}",
                    line.quantity
                )));
            }
            if line.unit_price < Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "Line {idx}: unit price must not be negative, got {}",
                    line.unit_price
                )));
            }
        }

        let db = db_pool.as_ref();
        let command = self.clone();
        let created = db
            .transaction::<_, CreatedRequest, ServiceError>(move |txn| {
                Box::pin(async move { command.insert_draft(txn).await })
            })
            .await
            .map_err(|e| {
                error!("Request creation transaction failed: {}", e);
                match e {
                    TransactionError::Connection(db_err) => ServiceError::DatabaseError(db_err),
                    TransactionError::Transaction(service_err) => service_err,
                }
            })?;

        if let Err(e) = event_sender
            .send(Event::RequestCreated {
                request_id: created.request.id,
                request_number: created.request.request_number.clone(),
            })
            .await
        {
            warn!(request_id = %created.request.id, error = %e, "Failed to publish event");
        }

        info!(
            request_id = %created.request.id,
            request_number = %created.request.request_number,
            "Created purchase requisition draft"
        );

        Ok(created)
    }
}

impl CreateRequestCommand {
    async fn insert_draft(
        &self,
        txn: &sea_orm::DatabaseTransaction,
    ) -> Result<CreatedRequest, ServiceError> {
        let now = Utc::now();
        let period = sequences::period_tag(now);
        let floor = existing_max_sequence(txn, &period).await?;
        let seq = sequences::next_sequence(txn, DOC_TYPE_REQUEST, &period, floor).await?;
        let request_number = sequences::format_number(DOC_TYPE_REQUEST, &period, seq);

        let request = purchase_request::ActiveModel {
            id: Set(Uuid::new_v4()),
            request_number: Set(request_number),
            project_id: Set(self.project_id),
            requested_by: Set(self.requested_by),
            status: Set(RequestStatus::Draft),
            notes: Set(self.notes.clone()),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(None),
        }
        .insert(txn)
        .await
        .map_err(ServiceError::DatabaseError)?;

        let mut lines = Vec::with_capacity(self.lines.len());
        for (idx, line) in self.lines.iter().enumerate() {
            let model = purchase_request_line::ActiveModel {
                id: Set(Uuid::new_v4()),
                request_id: Set(request.id),
                product_id: Set(line.product_id),
                source: Set(line.source),
                quantity: Set(line.quantity),
                unit: Set(line.unit.clone()),
                unit_price: Set(line.unit_price),
                total: Set(line.quantity * line.unit_price),
                // Preserve submission order under a shared timestamp.
                created_at: Set(now + chrono::Duration::milliseconds(idx as i64)),
                updated_at: Set(None),
            }
            .insert(txn)
            .await
            .map_err(ServiceError::DatabaseError)?;
            lines.push(model);
        }

        Ok(CreatedRequest { request, lines })
    }
}

/// Highest request sequence already present for this period.
async fn existing_max_sequence<C: sea_orm::ConnectionTrait>(
    db: &C,
    period: &str,
) -> Result<i32, ServiceError> {
    let prefix = format!("{DOC_TYPE_REQUEST}-{period}-%");
    let numbers = purchase_request::Entity::find()
        .filter(purchase_request::Column::RequestNumber.like(&prefix))
        .all(db)
        .await
        .map_err(ServiceError::DatabaseError)?;

    Ok(numbers
        .iter()
        .filter_map(|r| sequences::parse_sequence(&r.request_number))
        .max()
        .unwrap_or(0))
}
