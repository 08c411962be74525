use super::common::{
    created_response, map_service_error, success_response, validate_input, PaginationMeta,
    PaginationParams,
};
use crate::{
    commands::requests::{
        change_status_command::{CandidateWarehouseRequest, UpdatedRequest},
        ChangeRequestStatusCommand, CreateRequestCommand, LineAllocationInstruction,
    },
    commands::requests::create_request_command::NewRequestLine,
    commands::requests::change_status_command::load_line_details,
    commands::Command,
    entities::{
        purchase_request, purchase_request::RequestStatus, purchase_request_line::LineSource,
        transfer_order, transfer_order_item,
    },
    errors::{ApiError, ServiceError},
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::Response,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

// Request DTOs

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateRequestRequest {
    pub project_id: Option<Uuid>,
    pub requested_by: Uuid,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
    #[validate(length(min = 1))]
    pub lines: Vec<RequestLineRequest>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RequestLineRequest {
    pub product_id: Uuid,
    pub source: LineSource,
    pub quantity: Decimal,
    #[schema(example = "pcs")]
    pub unit: String,
    pub unit_price: Decimal,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct ChangeStatusRequest {
    pub status: RequestStatus,
    /// Required for approvals with stock-withdrawal lines: per-line candidate
    /// warehouses in priority order.
    pub allocations: Option<Vec<LineAllocationRequest>>,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct LineAllocationRequest {
    pub line_id: Uuid,
    #[validate(length(min = 1))]
    pub candidates: Vec<CandidateWarehouseDto>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CandidateWarehouseDto {
    pub warehouse_id: Uuid,
    pub observed_available: Option<Decimal>,
}

// Response DTOs

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RequestSummaryResponse {
    pub id: Uuid,
    pub request_number: String,
    pub status: RequestStatus,
    pub project_id: Option<Uuid>,
    pub requested_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<purchase_request::Model> for RequestSummaryResponse {
    fn from(model: purchase_request::Model) -> Self {
        Self {
            id: model.id,
            request_number: model.request_number,
            status: model.status,
            project_id: model.project_id,
            requested_by: model.requested_by,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RequestListResponse {
    pub requests: Vec<RequestSummaryResponse>,
    #[schema(value_type = Object)]
    pub meta: PaginationMeta,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AllocationResponse {
    pub warehouse_id: Uuid,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub observed_available: Option<Decimal>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LineResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub source: LineSource,
    pub quantity: Decimal,
    pub unit: String,
    pub unit_price: Decimal,
    pub total: Decimal,
    pub allocations: Vec<AllocationResponse>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TransferOrderItemResponse {
    pub line_id: Uuid,
    pub product_id: Uuid,
    pub quantity: Decimal,
    pub unit: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TransferOrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub warehouse_id: Uuid,
    pub items: Vec<TransferOrderItemResponse>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UnmetLineResponse {
    pub line_id: Uuid,
    pub requested: Decimal,
    pub unmet: Decimal,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RequestDetailResponse {
    pub id: Uuid,
    pub request_number: String,
    pub status: RequestStatus,
    pub project_id: Option<Uuid>,
    pub requested_by: Uuid,
    pub notes: Option<String>,
    pub lines: Vec<LineResponse>,
    pub transfer_orders: Vec<TransferOrderResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChangeStatusResponse {
    #[serde(flatten)]
    pub request: RequestDetailResponse,
    pub unmet_lines: Vec<UnmetLineResponse>,
}

impl From<UpdatedRequest> for ChangeStatusResponse {
    fn from(updated: UpdatedRequest) -> Self {
        let lines = updated
            .lines
            .into_iter()
            .map(|detail| LineResponse {
                id: detail.line.id,
                product_id: detail.line.product_id,
                source: detail.line.source,
                quantity: detail.line.quantity,
                unit: detail.line.unit,
                unit_price: detail.line.unit_price,
                total: detail.line.total,
                allocations: detail
                    .allocations
                    .into_iter()
                    .map(|a| AllocationResponse {
                        warehouse_id: a.warehouse_id,
                        quantity: a.quantity,
                        unit_cost: a.unit_cost,
                        observed_available: a.observed_available,
                    })
                    .collect(),
            })
            .collect();

        let transfer_orders = updated
            .transfer_orders
            .into_iter()
            .map(|generated| TransferOrderResponse {
                id: generated.order.id,
                order_number: generated.order.order_number,
                warehouse_id: generated.order.warehouse_id,
                items: generated
                    .items
                    .into_iter()
                    .map(|item| TransferOrderItemResponse {
                        line_id: item.line_id,
                        product_id: item.product_id,
                        quantity: item.quantity,
                        unit: item.unit,
                    })
                    .collect(),
            })
            .collect();

        Self {
            request: RequestDetailResponse {
                id: updated.request.id,
                request_number: updated.request.request_number,
                status: updated.request.status,
                project_id: updated.request.project_id,
                requested_by: updated.request.requested_by,
                notes: updated.request.notes,
                lines,
                transfer_orders,
                created_at: updated.request.created_at,
                updated_at: updated.request.updated_at,
            },
            unmet_lines: updated
                .unmet_lines
                .into_iter()
                .map(|u| UnmetLineResponse {
                    line_id: u.line_id,
                    requested: u.requested,
                    unmet: u.unmet,
                })
                .collect(),
        }
    }
}

// Handlers

/// Creates a new requisition draft.
pub async fn create_request(
    State(state): State<AppState>,
    Json(payload): Json<CreateRequestRequest>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;

    let command = CreateRequestCommand {
        project_id: payload.project_id,
        requested_by: payload.requested_by,
        notes: payload.notes,
        lines: payload
            .lines
            .into_iter()
            .map(|l| NewRequestLine {
                product_id: l.product_id,
                source: l.source,
                quantity: l.quantity,
                unit: l.unit,
                unit_price: l.unit_price,
            })
            .collect(),
    };

    let created = command
        .execute(state.db.clone(), state.event_sender.clone())
        .await
        .map_err(map_service_error)?;

    Ok(created_response(RequestSummaryResponse::from(
        created.request,
    )))
}

/// Lists requisitions, newest first.
pub async fn list_requests(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> Result<Response, ApiError> {
    if params.page == 0 || params.per_page == 0 {
        return Err(ApiError::BadRequest(
            "Page and per_page must be greater than 0".to_string(),
        ));
    }

    let paginator = purchase_request::Entity::find()
        .order_by_desc(purchase_request::Column::CreatedAt)
        .paginate(&*state.db, params.per_page);

    let total = paginator
        .num_items()
        .await
        .map_err(|e| map_service_error(ServiceError::DatabaseError(e)))?;
    let models = paginator
        .fetch_page(params.page - 1)
        .await
        .map_err(|e| map_service_error(ServiceError::DatabaseError(e)))?;

    Ok(success_response(RequestListResponse {
        requests: models
            .into_iter()
            .map(RequestSummaryResponse::from)
            .collect(),
        meta: PaginationMeta::new(params.page, params.per_page, total),
    }))
}

/// Fetches one requisition with lines, allocation breakdown, and any
/// generated transfer work orders.
pub async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let db = &*state.db;

    let request = purchase_request::Entity::find_by_id(id)
        .one(db)
        .await
        .map_err(|e| map_service_error(ServiceError::DatabaseError(e)))?
        .ok_or_else(|| ApiError::NotFound(format!("Request {} not found", id)))?;

    let details = load_line_details(db, request.id)
        .await
        .map_err(map_service_error)?;

    let orders = transfer_order::Entity::find()
        .filter(transfer_order::Column::RequestId.eq(request.id))
        .order_by_asc(transfer_order::Column::OrderNumber)
        .all(db)
        .await
        .map_err(|e| map_service_error(ServiceError::DatabaseError(e)))?;

    let mut transfer_orders = Vec::with_capacity(orders.len());
    for order in orders {
        let items = transfer_order_item::Entity::find()
            .filter(transfer_order_item::Column::TransferOrderId.eq(order.id))
            .all(db)
            .await
            .map_err(|e| map_service_error(ServiceError::DatabaseError(e)))?;
        transfer_orders.push(TransferOrderResponse {
            id: order.id,
            order_number: order.order_number,
            warehouse_id: order.warehouse_id,
            items: items
                .into_iter()
                .map(|item| TransferOrderItemResponse {
                    line_id: item.line_id,
                    product_id: item.product_id,
                    quantity: item.quantity,
                    unit: item.unit,
                })
                .collect(),
        });
    }

    Ok(success_response(RequestDetailResponse {
        id: request.id,
        request_number: request.request_number,
        status: request.status,
        project_id: request.project_id,
        requested_by: request.requested_by,
        notes: request.notes,
        lines: details
            .into_iter()
            .map(|detail| LineResponse {
                id: detail.line.id,
                product_id: detail.line.product_id,
                source: detail.line.source,
                quantity: detail.line.quantity,
                unit: detail.line.unit,
                unit_price: detail.line.unit_price,
                total: detail.line.total,
                allocations: detail
                    .allocations
                    .into_iter()
                    .map(|a| AllocationResponse {
                        warehouse_id: a.warehouse_id,
                        quantity: a.quantity,
                        unit_cost: a.unit_cost,
                        observed_available: a.observed_available,
                    })
                    .collect(),
            })
            .collect(),
        transfer_orders,
        created_at: request.created_at,
        updated_at: request.updated_at,
    }))
}

/// Applies a status transition; the only path that triggers stock
/// allocation and transfer-order generation.
pub async fn change_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ChangeStatusRequest>,
) -> Result<Response, ApiError> {
    validate_input(&payload)?;

    let command = ChangeRequestStatusCommand {
        request_id: id,
        new_status: payload.status,
        allocations: payload.allocations.map(|list| {
            list.into_iter()
                .map(|a| LineAllocationInstruction {
                    line_id: a.line_id,
                    candidates: a
                        .candidates
                        .into_iter()
                        .map(|c| CandidateWarehouseRequest {
                            warehouse_id: c.warehouse_id,
                            observed_available: c.observed_available,
                        })
                        .collect(),
                })
                .collect()
        }),
    };

    let updated = command
        .execute(state.db.clone(), state.event_sender.clone())
        .await
        .map_err(map_service_error)?;

    Ok(success_response(ChangeStatusResponse::from(updated)))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_request).get(list_requests))
        .route("/:id", get(get_request))
        .route("/:id/status", post(change_status))
}
