use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// A notification about a requisition lifecycle event.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Notification {
    pub id: Uuid,
    pub request_id: Uuid,
    pub message: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum NotificationType {
    RequestApproved,
    SystemMessage,
}

impl Notification {
    pub fn request_approved(request_id: Uuid, request_number: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id,
            message: format!("Purchase requisition {request_number} was approved"),
            notification_type: NotificationType::RequestApproved,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Delivery channel for notifications. Dispatch is fire-and-forget: callers
/// log failures and never fail the triggering operation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), NotificationError>;
}

/// Default transport: structured log lines. Stands in for the mail/chat
/// dispatcher the surrounding system wires up.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotificationError> {
        info!(
            notification_id = %notification.id,
            request_id = %notification.request_id,
            message = %notification.message,
            "Notification dispatched"
        );
        Ok(())
    }
}
