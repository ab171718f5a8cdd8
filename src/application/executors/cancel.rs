use super::{
    ActionContext, ActionResult, Executor, GatewayServices, IN_PROGRESS, audit_error, intent_id,
    refusal_message,
};
use crate::domain::gateway::IntentStatus;
use crate::domain::transaction::{ActionKind, MatchHints, OptionKey, PaymentTransaction};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};

pub const DEFAULT_CANCELLATION_REASON: &str = "requested_by_customer";

/// Releases an authorize hold.
pub struct CancelExecutor {
    services: GatewayServices,
}

impl CancelExecutor {
    pub fn new(services: GatewayServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Executor<ActionContext> for CancelExecutor {
    fn is_supported(&self, name: &str) -> bool {
        name == ActionKind::Cancel.as_str()
    }

    fn is_applicable(&self, _ctx: &ActionContext) -> bool {
        true
    }

    async fn execute(&self, ctx: ActionContext) -> Result<ActionResult> {
        let parent = self.services.ledger.load_parent(&ctx.transaction).await?;
        let reason = ctx.reason.as_deref().unwrap_or(DEFAULT_CANCELLATION_REASON);
        cancel_authorization(&self.services, parent, reason).await
    }
}

/// Cancels the intent behind `parent` and records the cancel child.
///
/// Repeated calls converge on the same cancel row; once it is successful the
/// gateway is not called again. A refused cancel leaves the authorize as it was.
pub(crate) async fn cancel_authorization(
    services: &GatewayServices,
    mut parent: PaymentTransaction,
    reason: &str,
) -> Result<ActionResult> {
    let ledger = &services.ledger;
    parent.ensure_parent_of(ActionKind::Cancel)?;
    let intent = intent_id(&parent)?;

    let mut cancel = ledger
        .reconciliation
        .find_or_create(ActionKind::Cancel, &parent, &MatchHints::reference(&intent))
        .await?;
    if cancel.successful {
        debug!(transaction_id = %cancel.id, "authorize already canceled");
        return Ok(ActionResult::success(cancel.id));
    }
    let Some(_claim) = ledger.reconciliation.claim(&cancel) else {
        return Ok(ActionResult::failure(cancel.id, IN_PROGRESS));
    };
    if ledger.is_confirmed(&cancel).await? {
        debug!(transaction_id = %cancel.id, "cancel confirmed while waiting for the claim");
        return Ok(ActionResult::success(cancel.id));
    }

    cancel.options.set(OptionKey::CancellationReason, reason);
    cancel.active = true;
    ledger.save(&mut cancel).await?;

    let request = json!({ "payment_intent": intent, "cancellation_reason": reason });
    let mut result = match services
        .gateway
        .cancel_payment_intent(&intent, Some(reason))
        .await
    {
        Ok(canceled) if canceled.status == IntentStatus::Canceled => {
            cancel
                .options
                .record("cancel_payment_intent", request, serde_json::to_value(&canceled)?);
            cancel.reference = Some(canceled.id);
            cancel.mark_successful();
            cancel.active = false;
            parent.active = false;
            ledger.save(&mut parent).await?;
            ActionResult::success(cancel.id)
        }
        Ok(other) => {
            let message = format!("payment intent is {:?} after cancel", other.status);
            cancel
                .options
                .record("cancel_payment_intent", request, serde_json::to_value(&other)?);
            cancel.mark_failed(Some(&message));
            ActionResult::failure(cancel.id, message)
        }
        Err(err) => {
            let message = refusal_message(err)?;
            warn!(
                transaction_id = %cancel.id,
                parent_id = %parent.id,
                "cancel refused by gateway: {message}"
            );
            audit_error(&mut cancel, "cancel_payment_intent", request, &message);
            cancel.mark_failed(Some(&message));
            ActionResult::failure(cancel.id, message)
        }
    };
    ledger.save(&mut cancel).await?;
    if cancel.successful && !result.successful {
        warn!(
            transaction_id = %cancel.id,
            "cancel was confirmed by another signal, keeping it successful"
        );
        result = ActionResult::success(cancel.id);
    }

    info!(
        transaction_id = %cancel.id,
        parent_id = %parent.id,
        successful = result.successful,
        "cancel finished"
    );
    Ok(result)
}
