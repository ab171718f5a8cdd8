mod common;

use async_trait::async_trait;
use common::{
    Harness, PAYMENT_METHOD, checkout, confirmed, intent_event, refund_event, transport_failure,
};
use payment_reconciler::application::dispatcher::WebhookDispatcher;
use payment_reconciler::application::executors::{
    ActionResult, Executor, LedgerServices, WebhookContext,
};
use payment_reconciler::application::webhook_router::{WebhookRouter, WebhookStatus};
use payment_reconciler::domain::config::{CaptureMode, GatewayConfig};
use payment_reconciler::domain::event::GatewayEvent;
use payment_reconciler::domain::gateway::RefundStatus;
use payment_reconciler::domain::money::{CompositeConverter, RoundingMode};
use payment_reconciler::domain::ports::LedgerStore;
use payment_reconciler::domain::transaction::{ActionKind, OptionKey};
use payment_reconciler::error::Result;
use payment_reconciler::infrastructure::in_memory::InMemoryConfigProvider;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_duplicate_succeeded_events_record_one_capture() {
    let h = Harness::with_default_config();
    let authorize = confirmed(ActionKind::Authorize, dec!(100.00), "pi_1", true);
    h.ledger.save(authorize.clone()).await.unwrap();

    let event = intent_event("payment_intent.succeeded", "pi_1", Some(authorize.id), 10000);
    for _ in 0..2 {
        let outcome = h.engine.handle_webhook(event.clone()).await;
        assert_eq!(outcome.status, WebhookStatus::Ok);
    }

    let children = h.ledger.children(authorize.id).await.unwrap();
    assert_eq!(children.len(), 1);
    let capture = &children[0];
    assert_eq!(capture.action, ActionKind::Capture);
    assert!(capture.successful);
    assert!(!capture.active);
    assert_eq!(capture.amount, dec!(100.00));
    assert_eq!(capture.reference.as_deref(), Some("pi_1"));
    assert!(!h.ledger.get(authorize.id).await.unwrap().unwrap().active);

    // The API path finds the webhook's capture and leaves the gateway alone.
    let result = h.engine.execute("capture", authorize.clone()).await.unwrap();
    assert!(result.successful);
    assert_eq!(result.transaction_id, capture.id);
    assert_eq!(h.gateway.calls("capture_payment_intent"), 0);
}

#[tokio::test]
async fn test_webhook_completes_in_flight_capture() {
    let h = Harness::with_default_config();
    let authorize = confirmed(ActionKind::Authorize, dec!(100.00), "pi_1", true);
    h.ledger.save(authorize.clone()).await.unwrap();
    h.gateway.fail_next("capture_payment_intent", transport_failure());
    assert!(h.engine.execute("capture", authorize.clone()).await.is_err());

    let in_flight = h.ledger.children(authorize.id).await.unwrap();
    assert_eq!(in_flight.len(), 1);

    // Partial capture reported by the gateway.
    let event = intent_event("payment_intent.succeeded", "pi_1", None, 7550);
    assert_eq!(h.engine.handle_webhook(event).await.status, WebhookStatus::Ok);

    let children = h.ledger.children(authorize.id).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, in_flight[0].id);
    assert!(children[0].successful);
    assert_eq!(children[0].amount, dec!(75.50));
}

#[tokio::test]
async fn test_payment_failed_closes_pending_authorize() {
    let h = Harness::with_default_config();
    let mut pending = checkout(ActionKind::Authorize, dec!(20), "1");
    pending.active = true;
    h.ledger.save(pending.clone()).await.unwrap();

    let event = intent_event("payment_intent.payment_failed", "pi_9", Some(pending.id), 2000);
    assert_eq!(h.engine.handle_webhook(event).await.status, WebhookStatus::Ok);

    let stored = h.ledger.get(pending.id).await.unwrap().unwrap();
    assert!(!stored.successful);
    assert!(!stored.active);
    assert_eq!(
        stored.options.get(OptionKey::FailureReason),
        Some("Your card was declined.")
    );
    assert_eq!(stored.options.get(OptionKey::PaymentIntentId), Some("pi_9"));
}

#[tokio::test]
async fn test_late_failure_never_reverts_success() {
    let h = Harness::with_default_config();
    let authorize = confirmed(ActionKind::Authorize, dec!(20), "pi_1", true);
    h.ledger.save(authorize.clone()).await.unwrap();

    let event = intent_event("payment_intent.payment_failed", "pi_1", None, 2000);
    assert_eq!(h.engine.handle_webhook(event).await.status, WebhookStatus::Ok);

    let stored = h.ledger.get(authorize.id).await.unwrap().unwrap();
    assert!(stored.successful);
    assert!(stored.active);
}

#[tokio::test]
async fn test_canceled_event_releases_hold() {
    let h = Harness::with_default_config();
    let authorize = confirmed(ActionKind::Authorize, dec!(100.00), "pi_1", true);
    h.ledger.save(authorize.clone()).await.unwrap();

    let event = intent_event("payment_intent.canceled", "pi_1", None, 10000);
    assert_eq!(h.engine.handle_webhook(event).await.status, WebhookStatus::Ok);

    let children = h.ledger.children(authorize.id).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].action, ActionKind::Cancel);
    assert!(children[0].successful);
    assert_eq!(
        children[0].options.get(OptionKey::CancellationReason),
        Some("abandoned")
    );
    assert!(!h.ledger.get(authorize.id).await.unwrap().unwrap().active);

    // An API cancel afterwards converges on the same row.
    let result = h.engine.execute("cancel", authorize).await.unwrap();
    assert!(result.successful);
    assert_eq!(result.transaction_id, children[0].id);
    assert_eq!(h.gateway.calls("cancel_payment_intent"), 0);
}

#[tokio::test]
async fn test_pending_refund_settled_by_webhook() {
    let h = Harness::with_default_config();
    let capture = confirmed(ActionKind::Capture, dec!(100.00), "pi_1", false);
    h.ledger.save(capture.clone()).await.unwrap();
    h.gateway.set_refund_status(RefundStatus::Pending);

    let result = h.engine.execute("refund", capture.clone()).await.unwrap();
    assert!(result.successful);
    let pending = h.ledger.get(result.transaction_id).await.unwrap().unwrap();
    assert!(pending.successful);
    assert!(pending.active);

    // Metadata names the refund row itself; the router resolves its parent.
    let event = refund_event("re_1", "pi_1", Some(pending.id), 10000, "succeeded");
    assert_eq!(h.engine.handle_webhook(event).await.status, WebhookStatus::Ok);

    let children = h.ledger.children(capture.id).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, pending.id);
    assert!(children[0].successful);
    assert!(!children[0].active);
}

#[tokio::test]
async fn test_refund_created_outside_the_engine() {
    let h = Harness::with_default_config();
    let capture = confirmed(ActionKind::Capture, dec!(100.00), "pi_1", false);
    h.ledger.save(capture.clone()).await.unwrap();

    let event = refund_event("re_dashboard", "pi_1", None, 2500, "succeeded");
    assert_eq!(h.engine.handle_webhook(event).await.status, WebhookStatus::Ok);

    let children = h.ledger.children(capture.id).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].action, ActionKind::Refund);
    assert_eq!(children[0].reference.as_deref(), Some("re_dashboard"));
    assert_eq!(children[0].amount, dec!(25.00));
}

#[tokio::test]
async fn test_events_without_work_are_acknowledged() {
    let h = Harness::new(vec![
        GatewayConfig::new(PAYMENT_METHOD).with_capture_mode(CaptureMode::Automatic),
    ]);

    let unknown = intent_event("payment_intent.succeeded", "pi_unknown", None, 100);
    let outcome = h.engine.handle_webhook(unknown).await;
    assert_eq!(outcome.status, WebhookStatus::Ok);
    assert_eq!(outcome.message.as_deref(), Some("no matching transaction"));

    let charge = confirmed(ActionKind::Charge, dec!(15), "pi_2", false);
    h.ledger.save(charge.clone()).await.unwrap();
    let not_applicable = intent_event("payment_intent.succeeded", "pi_2", None, 1500);
    let outcome = h.engine.handle_webhook(not_applicable).await;
    assert_eq!(outcome.status, WebhookStatus::Ok);
    assert_eq!(outcome.message.as_deref(), Some("no applicable handler"));
    assert!(h.ledger.children(charge.id).await.unwrap().is_empty());

    let unhandled: GatewayEvent = serde_json::from_value(json!({
        "id": "evt_1",
        "type": "charge.dispute.created",
        "data": { "object": { "id": "dp_1" } }
    }))
    .unwrap();
    assert_eq!(h.engine.handle_webhook(unhandled).await.status, WebhookStatus::Ok);
}

#[tokio::test]
async fn test_unconfigured_payment_method_is_ignored() {
    let h = Harness::new(Vec::new());
    let authorize = confirmed(ActionKind::Authorize, dec!(100.00), "pi_1", true);
    h.ledger.save(authorize.clone()).await.unwrap();

    let event = intent_event("payment_intent.succeeded", "pi_1", Some(authorize.id), 10000);
    let outcome = h.engine.handle_webhook(event).await;
    assert_eq!(outcome.status, WebhookStatus::Ok);
    assert!(h.ledger.children(authorize.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_payload_is_an_internal_error() {
    let h = Harness::with_default_config();
    let authorize = confirmed(ActionKind::Authorize, dec!(100.00), "pi_1", true);
    h.ledger.save(authorize.clone()).await.unwrap();

    let event: GatewayEvent = serde_json::from_value(json!({
        "id": "evt_1",
        "type": "payment_intent.succeeded",
        "data": { "object": { "id": "pi_1", "amount": "lots" } }
    }))
    .unwrap();
    let outcome = h.engine.handle_webhook(event).await;
    assert_eq!(outcome.status, WebhookStatus::InternalError);
    assert_eq!(outcome.status.code(), 500);
    assert!(h.ledger.children(authorize.id).await.unwrap().is_empty());
}

struct Refuser;

#[async_trait]
impl Executor<WebhookContext> for Refuser {
    fn is_supported(&self, _name: &str) -> bool {
        true
    }

    fn is_applicable(&self, _ctx: &WebhookContext) -> bool {
        true
    }

    async fn execute(&self, ctx: WebhookContext) -> Result<ActionResult> {
        Ok(ActionResult::failure(ctx.transaction.id, "refused"))
    }
}

#[tokio::test]
async fn test_unsuccessful_handler_is_forbidden() {
    let h = Harness::with_default_config();
    let authorize = confirmed(ActionKind::Authorize, dec!(100.00), "pi_1", true);
    h.ledger.save(authorize.clone()).await.unwrap();

    let services = LedgerServices::new(
        Arc::new(h.ledger.clone()),
        Arc::new(CompositeConverter::standard(RoundingMode::HalfUp)),
    );
    let router = WebhookRouter::new(
        services,
        Arc::new(InMemoryConfigProvider::new(vec![GatewayConfig::new(PAYMENT_METHOD)])),
        WebhookDispatcher::new(vec![Arc::new(Refuser)]),
    );

    let event = intent_event("payment_intent.succeeded", "pi_1", None, 10000);
    let outcome = router.handle(event).await;
    assert_eq!(outcome.status, WebhookStatus::Forbidden);
    assert_eq!(outcome.status.code(), 403);
    assert_eq!(outcome.message.as_deref(), Some("refused"));
}
