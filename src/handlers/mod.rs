pub mod common;
pub mod health;
pub mod requests;

use crate::AppState;
use axum::{routing::get, Router};

/// Assembles the API surface.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_check))
        .nest("/requests", requests::routes())
}
