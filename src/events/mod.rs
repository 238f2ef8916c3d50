use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Events emitted by the services as orders move through their lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        user_id: i64,
        referrer_id: Option<i64>,
    },
    OrderOpened {
        user_id: i64,
        quantity: i64,
        rail: String,
        final_usd: Decimal,
    },
    PaymentConfirmed {
        user_id: i64,
        rail: String,
    },
    OrderFulfilled {
        user_id: i64,
        recipient: String,
        quantity: i64,
        rail: String,
    },
    IssuanceFailed {
        user_id: i64,
        recipient: String,
        quantity: i64,
    },
    ReferralCredited {
        referrer_id: i64,
        referred_id: i64,
        amount: Decimal,
        currency: String,
    },
    ProfitCountersReset {
        admin_id: i64,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {e}"))
    }
}

/// Drains the event channel and logs each event. Runs for the lifetime of
/// the process; dropping all senders terminates it.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderFulfilled {
                user_id,
                recipient,
                quantity,
                rail,
            } => {
                info!(user_id, recipient = %recipient, quantity, rail = %rail, "Order fulfilled");
            }
            Event::IssuanceFailed {
                user_id,
                recipient,
                quantity,
            } => {
                warn!(user_id, recipient = %recipient, quantity, "Issuance failed; order kept for retry");
            }
            other => {
                info!(event = ?other, "Event processed");
            }
        }
    }
    info!("Event channel closed; processor exiting");
}
