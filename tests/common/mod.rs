#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use payment_reconciler::application::engine::PaymentEngine;
use payment_reconciler::domain::config::GatewayConfig;
use payment_reconciler::domain::event::GatewayEvent;
use payment_reconciler::domain::gateway::{
    CaptureMethod, GatewayError, IntentStatus, PaymentGateway, PaymentIntent,
    PaymentIntentRequest, Refund, RefundRequest, RefundStatus,
};
use payment_reconciler::domain::money::{CompositeConverter, RoundingMode};
use payment_reconciler::domain::ports::FailureNotifier;
use payment_reconciler::domain::transaction::{
    ActionKind, EntityRef, OptionKey, PaymentTransaction, TransactionId,
};
use payment_reconciler::error::Result;
use payment_reconciler::infrastructure::in_memory::{InMemoryConfigProvider, InMemoryLedger};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const PAYMENT_METHOD: &str = "stripe_1";

#[derive(Default)]
struct GatewayState {
    intent_seq: u32,
    refund_seq: u32,
    calls: HashMap<&'static str, usize>,
    failures: HashMap<&'static str, VecDeque<GatewayError>>,
    requires_action: bool,
    refund_status: Option<RefundStatus>,
    intents: HashMap<String, (PaymentIntent, CaptureMethod)>,
}

/// Holds one gateway call open until the test lets it go.
#[derive(Clone, Default)]
pub struct Gate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl Gate {
    /// Resolves once the held call has reached the gateway.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

/// Scripted stand-in for the card gateway.
///
/// Succeeds by default; `fail_next` queues errors per operation and
/// `pause_next` parks the next call of an operation on a [`Gate`].
#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<GatewayState>,
    gates: Mutex<HashMap<&'static str, Gate>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, operation: &'static str, error: GatewayError) {
        let mut state = self.state.lock().unwrap();
        state.failures.entry(operation).or_default().push_back(error);
    }

    pub fn set_requires_action(&self, requires_action: bool) {
        self.state.lock().unwrap().requires_action = requires_action;
    }

    pub fn set_refund_status(&self, status: RefundStatus) {
        self.state.lock().unwrap().refund_status = Some(status);
    }

    pub fn pause_next(&self, operation: &'static str) -> Gate {
        let gate = Gate::default();
        self.gates.lock().unwrap().insert(operation, gate.clone());
        gate
    }

    async fn pause(&self, operation: &'static str) {
        let gate = self.gates.lock().unwrap().remove(operation);
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
    }

    pub fn calls(&self, operation: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.calls.get(operation).copied().unwrap_or(0)
    }

    fn begin(&self, operation: &'static str) -> std::result::Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(operation).or_default() += 1;
        match state.failures.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn known_intent(state: &mut GatewayState, id: &str) -> (PaymentIntent, CaptureMethod) {
        state
            .intents
            .entry(id.to_string())
            .or_insert_with(|| {
                (
                    PaymentIntent {
                        id: id.to_string(),
                        status: IntentStatus::RequiresCapture,
                        amount: 10000,
                        currency: "usd".to_string(),
                        customer: None,
                        payment_method: None,
                        client_secret: None,
                        cancellation_reason: None,
                        last_payment_error: None,
                        metadata: BTreeMap::new(),
                    },
                    CaptureMethod::Manual,
                )
            })
            .clone()
    }

    fn store(
        state: &mut GatewayState,
        intent: PaymentIntent,
        method: CaptureMethod,
    ) -> PaymentIntent {
        state
            .intents
            .insert(intent.id.clone(), (intent.clone(), method));
        intent
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> std::result::Result<PaymentIntent, GatewayError> {
        self.pause("create_payment_intent").await;
        self.begin("create_payment_intent")?;
        let mut state = self.state.lock().unwrap();
        state.intent_seq += 1;
        let id = format!("pi_{}", state.intent_seq);
        let status = if state.requires_action {
            IntentStatus::RequiresAction
        } else {
            match request.capture_method {
                CaptureMethod::Manual => IntentStatus::RequiresCapture,
                CaptureMethod::Automatic => IntentStatus::Succeeded,
            }
        };
        let intent = PaymentIntent {
            client_secret: Some(format!("{id}_secret")),
            id,
            status,
            amount: request.amount,
            currency: request.currency,
            customer: request.customer,
            payment_method: request.payment_method,
            cancellation_reason: None,
            last_payment_error: None,
            metadata: request.metadata,
        };
        Ok(Self::store(&mut state, intent, request.capture_method))
    }

    async fn capture_payment_intent(
        &self,
        intent_id: &str,
        amount_to_capture: Option<i64>,
    ) -> std::result::Result<PaymentIntent, GatewayError> {
        self.pause("capture_payment_intent").await;
        self.begin("capture_payment_intent")?;
        let mut state = self.state.lock().unwrap();
        let (mut intent, method) = Self::known_intent(&mut state, intent_id);
        intent.status = IntentStatus::Succeeded;
        intent.amount = amount_to_capture.unwrap_or(intent.amount);
        Ok(Self::store(&mut state, intent, method))
    }

    async fn cancel_payment_intent(
        &self,
        intent_id: &str,
        reason: Option<&str>,
    ) -> std::result::Result<PaymentIntent, GatewayError> {
        self.pause("cancel_payment_intent").await;
        self.begin("cancel_payment_intent")?;
        let mut state = self.state.lock().unwrap();
        let (mut intent, method) = Self::known_intent(&mut state, intent_id);
        intent.status = IntentStatus::Canceled;
        intent.cancellation_reason = reason.map(str::to_string);
        Ok(Self::store(&mut state, intent, method))
    }

    async fn confirm_payment_intent(
        &self,
        intent_id: &str,
    ) -> std::result::Result<PaymentIntent, GatewayError> {
        self.pause("confirm_payment_intent").await;
        self.begin("confirm_payment_intent")?;
        let mut state = self.state.lock().unwrap();
        let (mut intent, method) = Self::known_intent(&mut state, intent_id);
        intent.status = match method {
            CaptureMethod::Manual => IntentStatus::RequiresCapture,
            CaptureMethod::Automatic => IntentStatus::Succeeded,
        };
        Ok(Self::store(&mut state, intent, method))
    }

    async fn create_refund(
        &self,
        request: RefundRequest,
    ) -> std::result::Result<Refund, GatewayError> {
        self.pause("create_refund").await;
        self.begin("create_refund")?;
        let mut state = self.state.lock().unwrap();
        state.refund_seq += 1;
        let (intent, _) = Self::known_intent(&mut state, &request.payment_intent);
        Ok(Refund {
            id: format!("re_{}", state.refund_seq),
            payment_intent: request.payment_intent,
            amount: request.amount.unwrap_or(intent.amount),
            currency: intent.currency,
            status: state.refund_status.unwrap_or(RefundStatus::Succeeded),
            failure_reason: None,
            metadata: request.metadata,
        })
    }
}

pub fn declined(message: &str) -> GatewayError {
    GatewayError::Api {
        code: Some("card_declined".to_string()),
        message: message.to_string(),
    }
}

pub fn transport_failure() -> GatewayError {
    GatewayError::Transport("connection reset by peer".to_string())
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub transaction_id: TransactionId,
    pub reason: String,
    pub recipients: Vec<String>,
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl FailureNotifier for RecordingNotifier {
    async fn send_failure_email(
        &self,
        tx: &PaymentTransaction,
        reason: &str,
        recipients: &[String],
    ) -> Result<()> {
        self.sent.lock().unwrap().push(SentNotification {
            transaction_id: tx.id,
            reason: reason.to_string(),
            recipients: recipients.to_vec(),
        });
        Ok(())
    }
}

/// An engine over an in-memory ledger and a [`FakeGateway`].
pub struct Harness {
    pub engine: PaymentEngine,
    pub ledger: InMemoryLedger,
    pub gateway: Arc<FakeGateway>,
}

impl Harness {
    pub fn new(configs: Vec<GatewayConfig>) -> Self {
        let ledger = InMemoryLedger::new();
        let gateway = Arc::new(FakeGateway::new());
        let engine = PaymentEngine::new(
            Arc::new(ledger.clone()),
            gateway.clone(),
            Arc::new(InMemoryConfigProvider::new(configs)),
            Arc::new(CompositeConverter::standard(RoundingMode::HalfUp)),
        );
        Self {
            engine,
            ledger,
            gateway,
        }
    }

    pub fn with_default_config() -> Self {
        Self::new(vec![GatewayConfig::new(PAYMENT_METHOD)])
    }
}

/// A checkout transaction with a stored customer and card.
pub fn checkout(action: ActionKind, amount: Decimal, order: &str) -> PaymentTransaction {
    let mut tx = PaymentTransaction::new(
        action,
        amount,
        "USD",
        PAYMENT_METHOD,
        EntityRef::new("order", order),
    );
    tx.options.set(OptionKey::CustomerId, "cus_1");
    tx.options.set(OptionKey::PaymentMethodId, "pm_card_visa");
    tx
}

/// A confirmed transaction of `action` with gateway reference `reference`.
pub fn confirmed(
    action: ActionKind,
    amount: Decimal,
    reference: &str,
    active: bool,
) -> PaymentTransaction {
    let mut tx = checkout(action, amount, "1");
    tx.reference = Some(reference.to_string());
    tx.options.set(OptionKey::PaymentIntentId, reference);
    tx.successful = true;
    tx.active = active;
    tx
}

/// An active hold placed `hours` ago.
pub fn hold_aged(hours: i64, reference: &str) -> PaymentTransaction {
    let mut tx = confirmed(ActionKind::Authorize, Decimal::new(10000, 2), reference, true);
    tx.created_at = Utc::now() - Duration::hours(hours);
    tx
}

pub fn intent_event(
    event_type: &str,
    intent_id: &str,
    correlated: Option<TransactionId>,
    amount: i64,
) -> GatewayEvent {
    let metadata = match correlated {
        Some(id) => json!({ "payment_transaction_id": id.to_string() }),
        None => json!({}),
    };
    let (status, last_payment_error) = match event_type {
        "payment_intent.canceled" => ("canceled", None),
        "payment_intent.payment_failed" => {
            ("requires_payment_method", Some("Your card was declined."))
        }
        _ => ("succeeded", None),
    };
    serde_json::from_value(json!({
        "id": format!("evt_{intent_id}_{event_type}"),
        "type": event_type,
        "data": { "object": {
            "id": intent_id,
            "object": "payment_intent",
            "status": status,
            "amount": amount,
            "currency": "usd",
            "last_payment_error": last_payment_error,
            "cancellation_reason": "abandoned",
            "metadata": metadata,
        }}
    }))
    .unwrap()
}

pub fn refund_event(
    refund_id: &str,
    intent_id: &str,
    correlated: Option<TransactionId>,
    amount: i64,
    status: &str,
) -> GatewayEvent {
    let metadata = match correlated {
        Some(id) => json!({ "payment_transaction_id": id.to_string() }),
        None => json!({}),
    };
    serde_json::from_value(json!({
        "id": format!("evt_{refund_id}_{status}"),
        "type": "refund.updated",
        "data": { "object": {
            "id": refund_id,
            "object": "refund",
            "payment_intent": intent_id,
            "amount": amount,
            "currency": "usd",
            "status": status,
            "metadata": metadata,
        }}
    }))
    .unwrap()
}
