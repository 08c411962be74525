//! Requisition API Library
//!
//! Purchase request lifecycle management with stock reservation,
//! oldest-first batch costing and transfer order generation.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod commands;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod notifications;
pub mod services;

use axum::Router;
use std::sync::Arc;

use crate::db::DbPool;
use crate::events::EventSender;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub event_sender: Arc<EventSender>,
}

impl AppState {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }
}

/// Builds the application router with the given state.
pub fn app_router(state: AppState) -> Router {
    handlers::api_routes().with_state(state)
}
