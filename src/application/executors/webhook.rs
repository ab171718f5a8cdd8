//! Handlers reconciling gateway notifications onto the ledger.
//!
//! Each handler is selected by event type and by the action of the transaction
//! the event was correlated to. They never call the gateway; everything they
//! need is in the event payload.

use super::refund::apply_refund;
use super::{ActionResult, Executor, LedgerServices, WebhookContext};
use crate::domain::event::EventKind;
use crate::domain::gateway::{PaymentIntent, Refund, TRANSACTION_METADATA_KEY};
use crate::domain::transaction::{
    ActionKind, MatchHints, OptionKey, PaymentTransaction, TransactionId,
};
use crate::error::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

fn payload<T: DeserializeOwned>(ctx: &WebhookContext) -> Result<T> {
    Ok(serde_json::from_value(ctx.event.data.object.clone())?)
}

/// `payment_intent.succeeded` on an authorize: the hold was captured.
pub struct IntentSucceededHandler {
    services: LedgerServices,
}

impl IntentSucceededHandler {
    pub fn new(services: LedgerServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Executor<WebhookContext> for IntentSucceededHandler {
    fn is_supported(&self, name: &str) -> bool {
        name == EventKind::IntentSucceeded.as_str()
    }

    fn is_applicable(&self, ctx: &WebhookContext) -> bool {
        ctx.transaction.action == ActionKind::Authorize
    }

    async fn execute(&self, ctx: WebhookContext) -> Result<ActionResult> {
        let intent: PaymentIntent = payload(&ctx)?;
        let mut authorize = ctx.transaction;

        let mut capture = self
            .services
            .reconciliation
            .find_or_create(ActionKind::Capture, &authorize, &MatchHints::reference(&intent.id))
            .await?;

        if capture.successful && capture.reference.is_some() {
            debug!(transaction_id = %capture.id, "capture already recorded");
        } else {
            let currency = intent.currency.to_ascii_uppercase();
            capture.amount = self
                .services
                .converter
                .from_minor_units(intent.amount, &currency)?;
            capture.currency = currency;
            capture.reference = Some(intent.id.clone());
            capture.mark_successful();
            capture.active = false;
            self.services.save(&mut capture).await?;
        }

        if authorize.reference.is_none() {
            authorize.reference = Some(intent.id.clone());
        }
        authorize.mark_successful();
        authorize.active = false;
        self.services.save(&mut authorize).await?;

        info!(
            transaction_id = %capture.id,
            parent_id = %authorize.id,
            "capture reconciled from webhook"
        );
        Ok(ActionResult::success(capture.id))
    }
}

/// `payment_intent.payment_failed` on an authorize or charge.
pub struct IntentFailedHandler {
    services: LedgerServices,
}

impl IntentFailedHandler {
    pub fn new(services: LedgerServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Executor<WebhookContext> for IntentFailedHandler {
    fn is_supported(&self, name: &str) -> bool {
        name == EventKind::IntentPaymentFailed.as_str()
    }

    fn is_applicable(&self, ctx: &WebhookContext) -> bool {
        matches!(
            ctx.transaction.action,
            ActionKind::Authorize | ActionKind::Charge
        )
    }

    async fn execute(&self, ctx: WebhookContext) -> Result<ActionResult> {
        let intent: PaymentIntent = payload(&ctx)?;
        let mut tx = ctx.transaction;
        let reason = intent
            .last_payment_error
            .as_deref()
            .unwrap_or("payment failed");

        if !tx.mark_failed(Some(reason)) {
            warn!(
                transaction_id = %tx.id,
                "failure notification for a transaction already recorded as successful"
            );
        }
        tx.options.set(OptionKey::PaymentIntentId, intent.id.clone());
        self.services.save(&mut tx).await?;

        info!(transaction_id = %tx.id, %reason, "payment failure reconciled from webhook");
        Ok(ActionResult::success(tx.id))
    }
}

/// `payment_intent.canceled` on an authorize: the hold was released, possibly
/// by the gateway itself when it expired.
pub struct IntentCanceledHandler {
    services: LedgerServices,
}

impl IntentCanceledHandler {
    pub fn new(services: LedgerServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Executor<WebhookContext> for IntentCanceledHandler {
    fn is_supported(&self, name: &str) -> bool {
        name == EventKind::IntentCanceled.as_str()
    }

    fn is_applicable(&self, ctx: &WebhookContext) -> bool {
        ctx.transaction.action == ActionKind::Authorize
    }

    async fn execute(&self, ctx: WebhookContext) -> Result<ActionResult> {
        let intent: PaymentIntent = payload(&ctx)?;
        let mut authorize = ctx.transaction;

        let mut cancel = self
            .services
            .reconciliation
            .find_or_create(ActionKind::Cancel, &authorize, &MatchHints::reference(&intent.id))
            .await?;
        if !(cancel.successful && cancel.reference.is_some()) {
            cancel.reference = Some(intent.id.clone());
            cancel
                .options
                .set_opt(OptionKey::CancellationReason, intent.cancellation_reason.clone());
            cancel.mark_successful();
            cancel.active = false;
            self.services.save(&mut cancel).await?;
        }

        authorize.active = false;
        self.services.save(&mut authorize).await?;

        info!(
            transaction_id = %cancel.id,
            parent_id = %authorize.id,
            "cancel reconciled from webhook"
        );
        Ok(ActionResult::success(cancel.id))
    }
}

/// `refund.updated` on the capture, purchase or charge that was refunded.
///
/// Refunds issued by the engine carry their row id in the metadata and land on
/// that row even while it is in flight. Anything else is matched by refund id
/// alone, so a refund made outside the engine gets a row of its own.
pub struct RefundUpdatedHandler {
    services: LedgerServices,
}

impl RefundUpdatedHandler {
    pub fn new(services: LedgerServices) -> Self {
        Self { services }
    }

    async fn named_refund(
        &self,
        refund: &Refund,
        parent: &PaymentTransaction,
    ) -> Result<Option<PaymentTransaction>> {
        let Some(id) = refund
            .metadata
            .get(TRANSACTION_METADATA_KEY)
            .and_then(|id| id.parse::<TransactionId>().ok())
        else {
            return Ok(None);
        };
        let named = self.services.ledger.get(id).await?.filter(|tx| {
            tx.action == ActionKind::Refund
                && tx.parent == Some(parent.id)
                && tx.reference.as_deref().is_none_or(|r| r == refund.id)
        });
        if named.is_none() {
            debug!(%id, refund_id = %refund.id, "refund metadata names no matching row");
        }
        Ok(named)
    }
}

#[async_trait]
impl Executor<WebhookContext> for RefundUpdatedHandler {
    fn is_supported(&self, name: &str) -> bool {
        name == EventKind::RefundUpdated.as_str()
    }

    fn is_applicable(&self, ctx: &WebhookContext) -> bool {
        matches!(
            ctx.transaction.action,
            ActionKind::Purchase | ActionKind::Charge | ActionKind::Capture
        )
    }

    async fn execute(&self, ctx: WebhookContext) -> Result<ActionResult> {
        let refund: Refund = payload(&ctx)?;
        let parent = ctx.transaction;

        let mut tx = match self.named_refund(&refund, &parent).await? {
            Some(named) => named,
            None => {
                self.services
                    .reconciliation
                    .find_or_create(
                        ActionKind::Refund,
                        &parent,
                        &MatchHints::exact_reference(&refund.id),
                    )
                    .await?
            }
        };
        let successful = apply_refund(self.services.converter.as_ref(), &mut tx, &refund)?;
        self.services.save(&mut tx).await?;

        info!(
            transaction_id = %tx.id,
            parent_id = %parent.id,
            status = ?refund.status,
            successful,
            "refund reconciled from webhook"
        );
        Ok(ActionResult::success(tx.id))
    }
}
