use super::authorize::apply_intent;
use super::{
    ActionContext, ActionResult, Executor, GatewayServices, IN_PROGRESS, audit_error,
    refusal_message,
};
use crate::domain::transaction::{ActionKind, OptionKey};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

/// Completes an intent that was left waiting for customer action.
///
/// The confirmed transaction keeps its own action; confirm never creates a row.
pub struct ConfirmExecutor {
    services: GatewayServices,
}

impl ConfirmExecutor {
    pub fn new(services: GatewayServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Executor<ActionContext> for ConfirmExecutor {
    fn is_supported(&self, name: &str) -> bool {
        name == ActionKind::Confirm.as_str()
    }

    fn is_applicable(&self, _ctx: &ActionContext) -> bool {
        true
    }

    async fn execute(&self, ctx: ActionContext) -> Result<ActionResult> {
        let mut tx = ctx.transaction;
        let intent = tx.require_option(OptionKey::PaymentIntentId)?.to_string();
        if tx.successful {
            debug!(transaction_id = %tx.id, "intent already confirmed");
            return Ok(ActionResult::success(tx.id));
        }
        let ledger = &self.services.ledger;
        let Some(_claim) = ledger.reconciliation.claim(&tx) else {
            return Ok(ActionResult::failure(tx.id, IN_PROGRESS));
        };
        if ledger.is_confirmed(&tx).await? {
            debug!(transaction_id = %tx.id, "intent confirmed while waiting for the claim");
            return Ok(ActionResult::success(tx.id));
        }

        let request = json!({ "payment_intent": intent });
        let mut result = match self.services.gateway.confirm_payment_intent(&intent).await {
            Ok(confirmed) => {
                tx.options
                    .record("confirm_payment_intent", request, serde_json::to_value(&confirmed)?);
                apply_intent(&mut tx, &confirmed)
            }
            Err(err) => {
                let message = refusal_message(err)?;
                audit_error(&mut tx, "confirm_payment_intent", request, &message);
                tx.options.set(OptionKey::FailureReason, message.clone());
                ActionResult::failure(tx.id, message)
            }
        };
        ledger.save(&mut tx).await?;
        if tx.successful && !result.successful {
            result = ActionResult::success(tx.id);
        }

        info!(
            transaction_id = %tx.id,
            action = %tx.action,
            successful = result.successful,
            "confirm finished"
        );
        Ok(result)
    }
}
