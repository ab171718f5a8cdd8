use super::{
    ActionContext, ActionResult, Executor, GatewayServices, IN_PROGRESS, audit_error, intent_id,
    refusal_message,
};
use crate::domain::transaction::{ActionKind, MatchHints};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};

/// Collects the funds held by an authorize.
pub struct CaptureExecutor {
    services: GatewayServices,
}

impl CaptureExecutor {
    pub fn new(services: GatewayServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Executor<ActionContext> for CaptureExecutor {
    fn is_supported(&self, name: &str) -> bool {
        name == ActionKind::Capture.as_str()
    }

    fn is_applicable(&self, _ctx: &ActionContext) -> bool {
        true
    }

    async fn execute(&self, ctx: ActionContext) -> Result<ActionResult> {
        let ledger = &self.services.ledger;
        let mut parent = ledger.load_parent(&ctx.transaction).await?;
        parent.ensure_parent_of(ActionKind::Capture)?;
        let intent = intent_id(&parent)?;

        let mut capture = ledger
            .reconciliation
            .find_or_create(ActionKind::Capture, &parent, &MatchHints::reference(&intent))
            .await?;
        if capture.successful {
            debug!(transaction_id = %capture.id, "authorize already captured");
            return Ok(ActionResult::success(capture.id));
        }
        let Some(_claim) = ledger.reconciliation.claim(&capture) else {
            return Ok(ActionResult::failure(capture.id, IN_PROGRESS));
        };
        if ledger.is_confirmed(&capture).await? {
            debug!(transaction_id = %capture.id, "capture confirmed while waiting for the claim");
            return Ok(ActionResult::success(capture.id));
        }

        let amount = ctx.amount.unwrap_or(parent.amount);
        let units = ledger.converter.to_minor_units(amount, &parent.currency)?;
        capture.amount = amount;
        capture.active = true;
        ledger.save(&mut capture).await?;

        let request = json!({ "payment_intent": intent, "amount_to_capture": units });
        let mut result = match self
            .services
            .gateway
            .capture_payment_intent(&intent, Some(units))
            .await
        {
            Ok(captured) => {
                capture
                    .options
                    .record("capture_payment_intent", request, serde_json::to_value(&captured)?);
                capture.reference = Some(captured.id);
                capture.mark_successful();
                ActionResult::success(capture.id)
            }
            Err(err) => {
                let message = refusal_message(err)?;
                warn!(
                    transaction_id = %capture.id,
                    parent_id = %parent.id,
                    "capture refused by gateway: {message}"
                );
                audit_error(&mut capture, "capture_payment_intent", request, &message);
                capture.amount = parent.amount;
                capture.mark_failed(Some(&message));
                ActionResult::failure(capture.id, message)
            }
        };

        capture.active = false;
        parent.active = false;
        ledger.save(&mut capture).await?;
        ledger.save(&mut parent).await?;
        if capture.successful && !result.successful {
            warn!(
                transaction_id = %capture.id,
                "capture was confirmed by another signal, keeping it successful"
            );
            result = ActionResult::success(capture.id);
        }

        info!(
            transaction_id = %capture.id,
            parent_id = %parent.id,
            successful = result.successful,
            "capture finished"
        );
        Ok(result)
    }
}
