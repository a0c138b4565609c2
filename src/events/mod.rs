use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::entities::order::{OrderStatus, PaymentMethod};

/// Events emitted by the order, payment, and delivery-confirmation services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Order events
    OrderCreated(Uuid),
    OrderUpdated(Uuid),
    OrderCancelled(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },

    // Payment events
    PaymentConfirmed {
        order_id: Uuid,
        method: PaymentMethod,
    },
    PaymentSucceeded(Uuid),
    PaymentFailed(Uuid),

    // Delivery-confirmation events
    /// A single-use confirmation link was issued for the order; the
    /// notification carrying it is dispatched out of band.
    ConfirmationRequested {
        order_id: Uuid,
        token: String,
    },
    DeliveryConfirmed(Uuid),
    DeliveryReported(Uuid),
    DisputeCleared(Uuid),
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously. Failures are reported to the caller,
    /// which logs and moves on; event delivery is never allowed to fail a
    /// request.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Consumes events from the channel and logs them. Notification dispatch
/// (e.g. mailing the confirmation link) hangs off this loop.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Event processor started");
    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "order status changed");
            }
            Event::ConfirmationRequested { order_id, .. } => {
                // The token itself is never logged.
                info!(%order_id, "confirmation link requested");
            }
            other => debug!(event = ?other, "event processed"),
        }
    }
    info!("Event processor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_to_receiver() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let id = Uuid::new_v4();
        sender.send(Event::OrderCreated(id)).await.unwrap();
        match rx.recv().await {
            Some(Event::OrderCreated(got)) => assert_eq!(got, id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_reports_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        assert!(sender.send(Event::OrderUpdated(Uuid::new_v4())).await.is_err());
    }
}
