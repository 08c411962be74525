use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::purchase_request::RequestStatus;
use crate::notifications::{Notification, Notifier};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Domain events emitted after a requisition operation commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    RequestCreated {
        request_id: Uuid,
        request_number: String,
    },
    RequestStatusChanged {
        request_id: Uuid,
        request_number: String,
        old_status: RequestStatus,
        new_status: RequestStatus,
    },
    StockReserved {
        request_id: Uuid,
        line_id: Uuid,
        product_id: Uuid,
        warehouse_id: Uuid,
        quantity: Decimal,
        unit_cost: Decimal,
    },
    PartialAllocationWarning {
        request_id: Uuid,
        line_id: Uuid,
        requested: Decimal,
        allocated: Decimal,
    },
    /// FIFO pricing ran past the batch ledger and fell back to the last
    /// batch cost; the ledger needs a stock count.
    BatchCostShortfall {
        request_id: Uuid,
        line_id: Uuid,
        product_id: Uuid,
    },
    TransferOrderCreated {
        request_id: Uuid,
        transfer_order_id: Uuid,
        order_number: String,
        warehouse_id: Uuid,
    },
}

/// Consumes events off the channel, logs them, and dispatches notifications.
///
/// Runs until every sender is dropped. Notification failures are logged and
/// swallowed; dispatch is fire-and-forget by contract.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, notifier: Arc<dyn Notifier>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::RequestStatusChanged {
                request_id,
                request_number,
                old_status,
                new_status,
            } => {
                info!(
                    %request_id,
                    %request_number,
                    old_status = old_status.as_str(),
                    new_status = new_status.as_str(),
                    "Request status changed"
                );
                if *new_status == RequestStatus::Approved {
                    let notification = Notification::request_approved(*request_id, request_number);
                    if let Err(e) = notifier.notify(notification).await {
                        warn!(%request_id, error = %e, "Approval notification failed");
                    }
                }
            }
            Event::PartialAllocationWarning {
                request_id,
                line_id,
                requested,
                allocated,
            } => {
                warn!(
                    %request_id,
                    %line_id,
                    %requested,
                    %allocated,
                    "Line only partially covered from stock"
                );
            }
            Event::BatchCostShortfall {
                request_id,
                line_id,
                product_id,
            } => {
                warn!(
                    %request_id,
                    %line_id,
                    %product_id,
                    "Batch ledger exhausted during pricing; stock count needed"
                );
            }
            other => {
                info!(event = ?other, "Processed event");
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::LogNotifier;

    #[tokio::test]
    async fn events_round_trip_through_the_channel() {
        let (tx, rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);

        let handle = tokio::spawn(process_events(rx, Arc::new(LogNotifier)));

        sender
            .send(Event::RequestCreated {
                request_id: Uuid::new_v4(),
                request_number: "PR-202608-0001".into(),
            })
            .await
            .unwrap();

        drop(sender);
        handle.await.unwrap();
    }

    #[test]
    fn events_serialize() {
        let event = Event::StockReserved {
            request_id: Uuid::nil(),
            line_id: Uuid::nil(),
            product_id: Uuid::nil(),
            warehouse_id: Uuid::nil(),
            quantity: rust_decimal_macros::dec!(5),
            unit_cost: rust_decimal_macros::dec!(107.5),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("StockReserved"));
    }
}
