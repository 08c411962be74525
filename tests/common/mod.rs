use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use requisition_api::{
    db::{self, DbConfig, DbPool},
    entities::{product, stock_balance, stock_batch, warehouse},
    events::{self, EventSender},
    notifications::{LogNotifier, Notifier},
    services::stock_ledger,
    AppState,
};

/// Helper harness backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        // A single connection keeps every query on the same in-memory
        // database.
        let cfg = DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };

        let pool = db::establish_connection_with_config(&cfg)
            .await
            .expect("failed to create test database");
        db::ensure_schema(&pool)
            .await
            .expect("failed to create schema for tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
        let event_task = tokio::spawn(events::process_events(event_rx, notifier));

        let state = AppState::new(db_arc, event_sender);
        let router = requisition_api::app_router(state.clone());

        Self {
            router,
            state,
            _event_task: event_task,
        }
    }

    pub fn db(&self) -> &DbPool {
        &self.state.db
    }

    /// Send a JSON request against the router, returning status and parsed body.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request");

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("failed to read response body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("response body was not valid json")
        };
        (status, value)
    }

    pub async fn seed_product(&self, code: &str) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            name: Set(format!("Product {}", code)),
            unit: Set("pcs".to_string()),
            created_at: Set(Utc::now()),
        }
        .insert(self.db())
        .await
        .expect("seed product")
    }

    pub async fn seed_warehouse(&self, code: &str) -> warehouse::Model {
        warehouse::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            name: Set(format!("Warehouse {}", code)),
            created_at: Set(Utc::now()),
        }
        .insert(self.db())
        .await
        .expect("seed warehouse")
    }

    /// Seeds a balance row for the current period.
    pub async fn seed_balance(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
        available: Decimal,
        booked: Decimal,
    ) -> stock_balance::Model {
        stock_balance::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            warehouse_id: Set(warehouse_id),
            period: Set(stock_ledger::period_for(Utc::now())),
            available_qty: Set(available),
            booked_qty: Set(booked),
            ending_qty: Set(available + booked),
            version: Set(1),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(self.db())
        .await
        .expect("seed stock balance")
    }

    /// Seeds a batch that arrived `age_days` days ago.
    pub async fn seed_batch(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
        residual: Decimal,
        unit_cost: Decimal,
        age_days: i64,
    ) -> stock_batch::Model {
        stock_batch::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            warehouse_id: Set(warehouse_id),
            residual_qty: Set(residual),
            unit_cost: Set(unit_cost),
            arrived_at: Set(Utc::now() - Duration::days(age_days)),
            fully_consumed: Set(false),
            created_at: Set(Utc::now()),
        }
        .insert(self.db())
        .await
        .expect("seed stock batch")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// Parses a decimal out of a JSON field serialized by rust_decimal.
#[allow(dead_code)]
pub fn json_decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("invalid decimal string"),
        Value::Number(n) => n.to_string().parse().expect("invalid decimal number"),
        other => panic!("expected decimal, got {other:?}"),
    }
}
