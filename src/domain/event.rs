use crate::domain::gateway::TRANSACTION_METADATA_KEY;
use crate::domain::transaction::{ActionKind, TransactionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A gateway notification whose signature has already been verified upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayEvent {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub object: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    IntentSucceeded,
    IntentPaymentFailed,
    IntentCanceled,
    RefundUpdated,
}

impl EventKind {
    pub fn parse(event_type: &str) -> Option<Self> {
        match event_type {
            "payment_intent.succeeded" => Some(EventKind::IntentSucceeded),
            "payment_intent.payment_failed" => Some(EventKind::IntentPaymentFailed),
            "payment_intent.canceled" => Some(EventKind::IntentCanceled),
            "refund.updated" => Some(EventKind::RefundUpdated),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::IntentSucceeded => "payment_intent.succeeded",
            EventKind::IntentPaymentFailed => "payment_intent.payment_failed",
            EventKind::IntentCanceled => "payment_intent.canceled",
            EventKind::RefundUpdated => "refund.updated",
        }
    }

    /// Ledger actions whose reference may equal the intent id carried by this event,
    /// in lookup order.
    pub fn correlated_actions(self) -> &'static [ActionKind] {
        match self {
            EventKind::IntentSucceeded
            | EventKind::IntentPaymentFailed
            | EventKind::IntentCanceled => &[
                ActionKind::Authorize,
                ActionKind::Charge,
                ActionKind::Purchase,
            ],
            EventKind::RefundUpdated => &[
                ActionKind::Capture,
                ActionKind::Purchase,
                ActionKind::Charge,
            ],
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl GatewayEvent {
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::parse(&self.event_type)
    }

    /// Ledger id written into the gateway object's metadata when we created it.
    pub fn correlated_transaction(&self) -> Option<TransactionId> {
        self.data
            .object
            .get("metadata")?
            .get(TRANSACTION_METADATA_KEY)?
            .as_str()?
            .parse()
            .ok()
    }

    /// Intent id the event refers to: the object itself for intent events, the
    /// `payment_intent` field for refunds.
    pub fn intent_id(&self) -> Option<&str> {
        let field = match self.kind()? {
            EventKind::RefundUpdated => "payment_intent",
            _ => "id",
        };
        self.data.object.get(field)?.as_str()
    }
}
