use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entities::{PaymentMethod, Provider};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Best-effort send. Never blocks the caller and never fails it.
    pub fn send_or_log(&self, event: Event) {
        if let Err(e) = self.sender.try_send(event) {
            warn!(error = %e, "dropping domain event");
        }
    }
}

/// Checkout and settlement lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        owner_id: Uuid,
        total: i64,
        payment_method: PaymentMethod,
    },
    PaymentInitiated {
        payment_id: Uuid,
        order_id: Uuid,
        provider: Provider,
    },
    PaymentSucceeded {
        payment_id: Uuid,
        order_id: Uuid,
        provider: Provider,
        amount: i64,
        settled_at: DateTime<Utc>,
    },
    PaymentFailed {
        payment_id: Uuid,
        order_id: Uuid,
        provider: Provider,
        reason: String,
    },
    CartConverted {
        cart_id: Uuid,
        order_id: Uuid,
    },
    CartUnlocked {
        cart_id: Uuid,
        order_id: Uuid,
        abandoned: bool,
    },
}

/// Drains the event channel, logging each event until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::PaymentSucceeded {
                payment_id,
                order_id,
                provider,
                amount,
                ..
            } => info!(%payment_id, %order_id, %provider, amount, "payment settled"),
            Event::PaymentFailed {
                payment_id,
                order_id,
                reason,
                ..
            } => info!(%payment_id, %order_id, reason = %reason, "payment failed"),
            other => debug!(event = ?other, "domain event"),
        }
    }

    info!("Event processing loop stopped");
}
