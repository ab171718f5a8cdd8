//! Wire-level view of the card gateway.
//!
//! Amounts on this boundary are always integer minor units; converting to and
//! from ledger decimals is the caller's job (see [`crate::domain::money`]).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// The gateway answered and refused the operation (declined card, invalid request).
    #[error("{message}")]
    Api {
        code: Option<String>,
        message: String,
    },
    /// The gateway could not be reached or answered garbage.
    #[error("gateway unreachable: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMethod {
    Automatic,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntentRequest {
    pub amount: i64,
    pub currency: String,
    pub capture_method: CaptureMethod,
    pub customer: Option<String>,
    pub payment_method: Option<String>,
    pub confirm: bool,
    pub off_session: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: IntentStatus,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
    #[serde(default)]
    pub last_payment_error: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    RequiresAction,
    Succeeded,
    Failed,
    Canceled,
}

impl RefundStatus {
    /// `(successful, active)` as recorded on the ledger.
    ///
    /// Pending refunds count as successful but stay active until the gateway
    /// settles them.
    pub fn ledger_flags(self) -> (bool, bool) {
        match self {
            RefundStatus::Succeeded => (true, false),
            RefundStatus::Pending | RefundStatus::RequiresAction => (true, true),
            RefundStatus::Failed | RefundStatus::Canceled => (false, false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub payment_intent: String,
    pub amount: Option<i64>,
    pub reason: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    pub id: String,
    pub payment_intent: String,
    pub amount: i64,
    pub currency: String,
    pub status: RefundStatus,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Metadata key the engine writes on every gateway object it creates so that
/// webhooks can be correlated back to the ledger.
pub const TRANSACTION_METADATA_KEY: &str = "payment_transaction_id";

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> Result<PaymentIntent, GatewayError>;

    async fn capture_payment_intent(
        &self,
        intent_id: &str,
        amount_to_capture: Option<i64>,
    ) -> Result<PaymentIntent, GatewayError>;

    async fn cancel_payment_intent(
        &self,
        intent_id: &str,
        reason: Option<&str>,
    ) -> Result<PaymentIntent, GatewayError>;

    async fn confirm_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError>;

    async fn create_refund(&self, request: RefundRequest) -> Result<Refund, GatewayError>;
}
