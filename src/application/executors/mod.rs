//! One strategy per gateway action, plus the webhook handlers.
//!
//! Every strategy implements [`Executor`] for its context type and is picked by a
//! [`Dispatcher`](crate::application::dispatcher::Dispatcher) that tries them in
//! registration order.

pub mod authorize;
pub mod cancel;
pub mod capture;
pub mod charge;
pub mod confirm;
pub mod purchase;
pub mod refund;
pub mod webhook;

use crate::application::reconciliation::ReconciliationService;
use crate::domain::config::GatewayConfig;
use crate::domain::event::{EventKind, GatewayEvent};
use crate::domain::gateway::{GatewayError, PaymentGateway, TRANSACTION_METADATA_KEY};
use crate::domain::money::AmountConverter;
use crate::domain::ports::LedgerStoreRef;
use crate::domain::transaction::{EntityRef, OptionKey, PaymentTransaction, TransactionId};
use crate::error::{ReconcileError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A strategy selectable by action or event name.
///
/// `is_supported` and `is_applicable` must be pure: the dispatcher may call them
/// on every registered strategy.
#[async_trait]
pub trait Executor<C>: Send + Sync
where
    C: Send + Sync + 'static,
{
    fn is_supported(&self, name: &str) -> bool;

    fn is_applicable(&self, ctx: &C) -> bool;

    async fn execute(&self, ctx: C) -> Result<ActionResult>;
}

pub type ActionExecutor = dyn Executor<ActionContext>;
pub type WebhookHandler = dyn Executor<WebhookContext>;

/// Structured outcome handed back to the checkout layer (or turned into an HTTP
/// status by the webhook router).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionResult {
    pub successful: bool,
    pub transaction_id: TransactionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub requires_action: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_successful: Option<bool>,
}

impl ActionResult {
    pub fn success(transaction_id: TransactionId) -> Self {
        Self {
            successful: true,
            transaction_id,
            error: None,
            requires_action: false,
            client_secret: None,
            has_successful: None,
        }
    }

    pub fn failure(transaction_id: TransactionId, error: impl Into<String>) -> Self {
        Self {
            successful: false,
            error: Some(error.into()),
            ..Self::success(transaction_id)
        }
    }

    pub fn requires_action(transaction_id: TransactionId, client_secret: Option<String>) -> Self {
        Self {
            successful: false,
            requires_action: true,
            client_secret,
            ..Self::success(transaction_id)
        }
    }
}

/// One entity's share of a multi-entity purchase.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityShare {
    pub entity: EntityRef,
    pub amount: Decimal,
}

/// What the checkout layer asks for.
///
/// For `capture`, `cancel` and `refund` the transaction is the one being
/// captured, canceled or refunded; the executor reconciles the child itself.
/// For every other action it is the transaction to execute.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub action: String,
    pub transaction: PaymentTransaction,
    pub amount: Option<Decimal>,
    pub reason: Option<String>,
    pub split: Vec<EntityShare>,
}

impl ActionRequest {
    pub fn new(action: impl Into<String>, transaction: PaymentTransaction) -> Self {
        Self {
            action: action.into(),
            transaction,
            amount: None,
            reason: None,
            split: Vec::new(),
        }
    }

    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_split(mut self, split: Vec<EntityShare>) -> Self {
        self.split = split;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ActionContext {
    pub action: String,
    pub transaction: PaymentTransaction,
    pub amount: Option<Decimal>,
    pub reason: Option<String>,
    pub split: Vec<EntityShare>,
    pub config: GatewayConfig,
}

impl ActionContext {
    pub fn new(request: ActionRequest, config: GatewayConfig) -> Self {
        Self {
            action: request.action,
            transaction: request.transaction,
            amount: request.amount,
            reason: request.reason,
            split: request.split,
            config,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookContext {
    pub event: GatewayEvent,
    pub kind: EventKind,
    /// The ledger row the event was correlated to.
    pub transaction: PaymentTransaction,
    pub config: GatewayConfig,
}

/// Collaborators needed to reconcile signals onto the ledger without talking to
/// the gateway. This is all a webhook handler gets.
#[derive(Clone)]
pub struct LedgerServices {
    pub ledger: LedgerStoreRef,
    pub reconciliation: ReconciliationService,
    pub converter: Arc<dyn AmountConverter>,
}

impl LedgerServices {
    pub fn new(ledger: LedgerStoreRef, converter: Arc<dyn AmountConverter>) -> Self {
        Self {
            reconciliation: ReconciliationService::new(ledger.clone()),
            ledger,
            converter,
        }
    }

    /// Re-reads `source` from the ledger. A source that was never persisted cannot
    /// own children, which is a wiring error on the caller's side.
    pub async fn load_parent(&self, source: &PaymentTransaction) -> Result<PaymentTransaction> {
        self.ledger
            .get(source.id)
            .await?
            .ok_or(ReconcileError::MissingParent(source.id))
    }

    /// Writes `tx` without ever un-confirming the stored row, then refreshes
    /// `tx` with what was written.
    pub async fn save(&self, tx: &mut PaymentTransaction) -> Result<()> {
        *tx = self.ledger.update(tx.clone()).await?;
        Ok(())
    }

    /// Whether `tx`, or the row stored under its id, is already confirmed.
    pub async fn is_confirmed(&self, tx: &PaymentTransaction) -> Result<bool> {
        if tx.successful {
            return Ok(true);
        }
        Ok(self
            .ledger
            .get(tx.id)
            .await?
            .is_some_and(|stored| stored.successful))
    }
}

/// [`LedgerServices`] plus the gateway, for executors on the API path.
#[derive(Clone)]
pub struct GatewayServices {
    pub ledger: LedgerServices,
    pub gateway: Arc<dyn PaymentGateway>,
}

impl GatewayServices {
    pub fn new(ledger: LedgerServices, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { ledger, gateway }
    }
}

/// Result for a row another call is still waiting on the gateway for.
pub const IN_PROGRESS: &str = "another gateway call for this transaction is in progress";

/// Intent id used to address the gateway on behalf of `tx`.
pub(crate) fn intent_id(tx: &PaymentTransaction) -> Result<String> {
    match &tx.reference {
        Some(reference) => Ok(reference.clone()),
        None => tx
            .require_option(OptionKey::PaymentIntentId)
            .map(str::to_string),
    }
}

pub(crate) fn correlation_metadata(tx: &PaymentTransaction) -> BTreeMap<String, String> {
    BTreeMap::from([(TRANSACTION_METADATA_KEY.to_string(), tx.id.to_string())])
}

/// Splits gateway errors: API refusals become a message to record, transport
/// failures propagate.
pub(crate) fn refusal_message(err: GatewayError) -> Result<String> {
    match err {
        GatewayError::Api { message, .. } => Ok(message),
        transport @ GatewayError::Transport(_) => Err(transport.into()),
    }
}

pub(crate) fn audit_error(
    tx: &mut PaymentTransaction,
    operation: &str,
    request: serde_json::Value,
    message: &str,
) {
    tx.options
        .record(operation, request, serde_json::json!({ "error": message }));
}
