mod common;

use common::{json_decimal, TestApp};

use axum::http::{Method, StatusCode};
use chrono::Utc;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde_json::{json, Value};
use uuid::Uuid;

use requisition_api::{
    entities::{purchase_request, purchase_request::RequestStatus, transfer_order},
    services::sequences,
};

async fn create_request(app: &TestApp, lines: Value) -> Value {
    let (status, body) = app
        .request(
            Method::POST,
            "/requests",
            Some(json!({
                "requested_by": Uuid::new_v4(),
                "lines": lines,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {body}");
    body
}

async fn set_status(app: &TestApp, id: &str, payload: Value) -> (StatusCode, Value) {
    app.request(Method::POST, &format!("/requests/{id}/status"), Some(payload))
        .await
}

fn stock_line_json(product_id: Uuid, quantity: &str) -> Value {
    json!({
        "product_id": product_id,
        "source": "stock_withdrawal",
        "quantity": quantity,
        "unit": "pcs",
        "unit_price": "90",
    })
}

#[tokio::test]
async fn full_lifecycle_draft_to_approved() {
    let app = TestApp::new().await;
    let product = app.seed_product("LIFE-1").await;
    let wh = app.seed_warehouse("WH-1").await;
    app.seed_balance(product.id, wh.id, dec!(15), dec!(0)).await;
    app.seed_batch(product.id, wh.id, dec!(5), dec!(100), 10)
        .await;
    app.seed_batch(product.id, wh.id, dec!(10), dec!(120), 2)
        .await;

    let period = sequences::period_tag(Utc::now());

    let created = create_request(&app, json!([stock_line_json(product.id, "8")])).await;
    assert_eq!(created["status"], "draft");
    assert_eq!(
        created["request_number"],
        format!("PR-{period}-0001").as_str()
    );
    let id = created["id"].as_str().expect("request id").to_string();

    let (status, body) = set_status(&app, &id, json!({"status": "submitted"})).await;
    assert_eq!(status, StatusCode::OK, "submit failed: {body}");
    assert_eq!(body["status"], "submitted");

    let (_, detail) = app
        .request(Method::GET, &format!("/requests/{id}"), None)
        .await;
    let line_id = detail["lines"][0]["id"].as_str().expect("line id");

    let (status, body) = set_status(
        &app,
        &id,
        json!({
            "status": "approved",
            "allocations": [{
                "line_id": line_id,
                "candidates": [{"warehouse_id": wh.id, "observed_available": "15"}],
            }],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "approve failed: {body}");
    assert_eq!(body["status"], "approved");
    assert!(body["unmet_lines"].as_array().expect("unmet").is_empty());

    // Line re-priced from FIFO batch costs: (5*100 + 3*120) / 8 = 107.5.
    assert_eq!(json_decimal(&body["lines"][0]["unit_price"]), dec!(107.5));
    assert_eq!(
        json_decimal(&body["lines"][0]["allocations"][0]["unit_cost"]),
        dec!(107.5)
    );
    assert_eq!(
        json_decimal(&body["lines"][0]["allocations"][0]["quantity"]),
        dec!(8)
    );

    let orders = body["transfer_orders"].as_array().expect("orders");
    assert_eq!(orders.len(), 1);
    assert_eq!(
        orders[0]["order_number"],
        format!("TRF-{period}-0001").as_str()
    );
    assert_eq!(json_decimal(&orders[0]["items"][0]["quantity"]), dec!(8));

    // The detail view reflects the committed state.
    let (status, detail) = app
        .request(Method::GET, &format!("/requests/{id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["status"], "approved");
    assert_eq!(detail["transfer_orders"].as_array().expect("orders").len(), 1);
}

#[tokio::test]
async fn two_lines_from_one_warehouse_share_one_transfer_order() {
    let app = TestApp::new().await;
    let product_a = app.seed_product("SHARE-A").await;
    let product_b = app.seed_product("SHARE-B").await;
    let wh = app.seed_warehouse("WH-2").await;
    app.seed_balance(product_a.id, wh.id, dec!(10), dec!(0))
        .await;
    app.seed_balance(product_b.id, wh.id, dec!(10), dec!(0))
        .await;
    app.seed_batch(product_a.id, wh.id, dec!(10), dec!(100), 1)
        .await;
    app.seed_batch(product_b.id, wh.id, dec!(10), dec!(200), 1)
        .await;

    let created = create_request(
        &app,
        json!([
            stock_line_json(product_a.id, "5"),
            stock_line_json(product_b.id, "7"),
        ]),
    )
    .await;
    let id = created["id"].as_str().expect("request id").to_string();
    set_status(&app, &id, json!({"status": "submitted"})).await;

    let (_, detail) = app
        .request(Method::GET, &format!("/requests/{id}"), None)
        .await;
    let lines = detail["lines"].as_array().expect("lines");
    let allocations: Vec<Value> = lines
        .iter()
        .map(|line| {
            json!({
                "line_id": line["id"],
                "candidates": [{"warehouse_id": wh.id, "observed_available": null}],
            })
        })
        .collect();

    let (status, body) = set_status(
        &app,
        &id,
        json!({"status": "approved", "allocations": allocations}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "approve failed: {body}");

    let orders = body["transfer_orders"].as_array().expect("orders");
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["items"].as_array().expect("items").len(), 2);
}

#[tokio::test]
async fn document_numbers_continue_across_approvals() {
    let app = TestApp::new().await;
    let product = app.seed_product("SEQ-1").await;
    let wh = app.seed_warehouse("WH-3").await;
    app.seed_balance(product.id, wh.id, dec!(50), dec!(0)).await;
    app.seed_batch(product.id, wh.id, dec!(50), dec!(100), 1)
        .await;

    let period = sequences::period_tag(Utc::now());

    for expected_seq in 1..=2 {
        let created = create_request(&app, json!([stock_line_json(product.id, "5")])).await;
        assert_eq!(
            created["request_number"],
            format!("PR-{period}-{expected_seq:04}").as_str()
        );
        let id = created["id"].as_str().expect("request id").to_string();
        set_status(&app, &id, json!({"status": "submitted"})).await;

        let (_, detail) = app
            .request(Method::GET, &format!("/requests/{id}"), None)
            .await;
        let line_id = detail["lines"][0]["id"].clone();

        let (status, body) = set_status(
            &app,
            &id,
            json!({
                "status": "approved",
                "allocations": [{
                    "line_id": line_id,
                    "candidates": [{"warehouse_id": wh.id, "observed_available": null}],
                }],
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "approve failed: {body}");
        assert_eq!(
            body["transfer_orders"][0]["order_number"],
            format!("TRF-{period}-{expected_seq:04}").as_str()
        );
    }
}

#[tokio::test]
async fn illegal_transition_fails_identically_and_mutates_nothing() {
    let app = TestApp::new().await;
    let product = app.seed_product("TERM-1").await;

    let created = create_request(
        &app,
        json!([{
            "product_id": product.id,
            "source": "purchase",
            "quantity": "2",
            "unit": "pcs",
            "unit_price": "10",
        }]),
    )
    .await;
    let id = created["id"].as_str().expect("request id").to_string();
    let request_id: Uuid = id.parse().expect("uuid");

    set_status(&app, &id, json!({"status": "submitted"})).await;
    set_status(&app, &id, json!({"status": "approved"})).await;
    let (status, _) = set_status(&app, &id, json!({"status": "completed"})).await;
    assert_eq!(status, StatusCode::OK);

    let version_before = purchase_request::Entity::find_by_id(request_id)
        .one(app.db())
        .await
        .expect("query")
        .expect("request")
        .version;

    // Completed is terminal; the same illegal transition fails the same way
    // every time and leaves the row untouched.
    let (first_status, first_body) = set_status(&app, &id, json!({"status": "approved"})).await;
    let (second_status, second_body) = set_status(&app, &id, json!({"status": "approved"})).await;
    assert_eq!(first_status, StatusCode::CONFLICT);
    assert_eq!(second_status, StatusCode::CONFLICT);
    assert_eq!(first_body["message"], second_body["message"]);

    let request = purchase_request::Entity::find_by_id(request_id)
        .one(app.db())
        .await
        .expect("query")
        .expect("request");
    assert_eq!(request.status, RequestStatus::Completed);
    assert_eq!(request.version, version_before);
}

#[tokio::test]
async fn failed_approval_leaves_no_trace() {
    let app = TestApp::new().await;
    let product = app.seed_product("ROLL-1").await;
    let wh = app.seed_warehouse("WH-4").await;
    // Counters out of step with the batch ledger.
    app.seed_balance(product.id, wh.id, dec!(10), dec!(0)).await;
    app.seed_batch(product.id, wh.id, dec!(6), dec!(100), 1)
        .await;

    let created = create_request(&app, json!([stock_line_json(product.id, "10")])).await;
    let id = created["id"].as_str().expect("request id").to_string();
    set_status(&app, &id, json!({"status": "submitted"})).await;

    let (_, detail) = app
        .request(Method::GET, &format!("/requests/{id}"), None)
        .await;
    let line_id = detail["lines"][0]["id"].clone();

    let (status, body) = set_status(
        &app,
        &id,
        json!({
            "status": "approved",
            "allocations": [{
                "line_id": line_id,
                "candidates": [{"warehouse_id": wh.id, "observed_available": null}],
            }],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "expected abort: {body}");

    let (_, detail) = app
        .request(Method::GET, &format!("/requests/{id}"), None)
        .await;
    assert_eq!(detail["status"], "submitted");
    assert!(detail["lines"][0]["allocations"]
        .as_array()
        .expect("allocations")
        .is_empty());

    let request_id: Uuid = id.parse().expect("uuid");
    let orders = transfer_order::Entity::find()
        .filter(transfer_order::Column::RequestId.eq(request_id))
        .all(app.db())
        .await
        .expect("order query");
    assert!(orders.is_empty());
}

#[tokio::test]
async fn create_request_validates_input() {
    let app = TestApp::new().await;
    let product = app.seed_product("VAL-1").await;

    let (status, _) = app
        .request(
            Method::POST,
            "/requests",
            Some(json!({"requested_by": Uuid::new_v4(), "lines": []})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .request(
            Method::POST,
            "/requests",
            Some(json!({
                "requested_by": Uuid::new_v4(),
                "lines": [{
                    "product_id": product.id,
                    "source": "purchase",
                    "quantity": "0",
                    "unit": "pcs",
                    "unit_price": "10",
                }],
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "zero quantity: {body}");
}

#[tokio::test]
async fn list_and_fetch_endpoints() {
    let app = TestApp::new().await;
    let product = app.seed_product("LIST-1").await;

    for _ in 0..3 {
        create_request(
            &app,
            json!([{
                "product_id": product.id,
                "source": "service",
                "quantity": "1",
                "unit": "job",
                "unit_price": "500",
            }]),
        )
        .await;
    }

    let (status, body) = app
        .request(Method::GET, "/requests?page=1&per_page=2", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["requests"].as_array().expect("requests").len(), 2);
    assert_eq!(body["meta"]["total"], 3);
    assert_eq!(body["meta"]["total_pages"], 2);

    let (status, _) = app.request(Method::GET, "/requests?page=0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .request(Method::GET, "/requests?per_page=0", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .request(
            Method::GET,
            &format!("/requests/{}", Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app.request(Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
