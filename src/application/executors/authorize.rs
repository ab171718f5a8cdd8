use super::{
    ActionContext, ActionResult, Executor, GatewayServices, IN_PROGRESS, audit_error,
    correlation_metadata, refusal_message,
};
use crate::domain::gateway::{CaptureMethod, IntentStatus, PaymentIntent, PaymentIntentRequest};
use crate::domain::transaction::{ActionKind, OptionKey, PaymentTransaction};
use crate::error::{ReconcileError, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Places a manual-capture hold for the checkout's transaction.
pub struct AuthorizeExecutor {
    services: GatewayServices,
}

impl AuthorizeExecutor {
    pub fn new(services: GatewayServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Executor<ActionContext> for AuthorizeExecutor {
    fn is_supported(&self, name: &str) -> bool {
        name == ActionKind::Authorize.as_str()
    }

    fn is_applicable(&self, _ctx: &ActionContext) -> bool {
        true
    }

    async fn execute(&self, ctx: ActionContext) -> Result<ActionResult> {
        let mut tx = ctx.transaction;
        tx.action = ActionKind::Authorize;
        create_intent(&self.services, &mut tx, CaptureMethod::Manual, false).await
    }
}

/// Creates and confirms a payment intent for `tx`, recording the outcome on it.
///
/// The row is persisted as active before the call so observers see it tied up
/// with the gateway. Declines are recorded and returned as an unsuccessful
/// result; transport errors leave the row in flight and propagate.
pub(crate) async fn create_intent(
    services: &GatewayServices,
    tx: &mut PaymentTransaction,
    capture_method: CaptureMethod,
    off_session: bool,
) -> Result<ActionResult> {
    if tx.successful {
        debug!(transaction_id = %tx.id, "intent already confirmed, nothing to do");
        return Ok(ActionResult::success(tx.id));
    }

    let amount = services
        .ledger
        .converter
        .to_minor_units(tx.amount, &tx.currency)?;
    let payment_method = tx.require_option(OptionKey::PaymentMethodId)?.to_string();
    let customer = tx.options.get(OptionKey::CustomerId).map(str::to_string);
    if off_session && customer.is_none() {
        return Err(ReconcileError::MissingOption {
            id: tx.id,
            key: OptionKey::CustomerId,
        });
    }

    let Some(_claim) = services.ledger.reconciliation.claim(tx) else {
        return Ok(ActionResult::failure(tx.id, IN_PROGRESS));
    };
    if services.ledger.is_confirmed(tx).await? {
        debug!(transaction_id = %tx.id, "intent confirmed while waiting for the claim");
        return Ok(ActionResult::success(tx.id));
    }

    tx.active = true;
    services.ledger.save(tx).await?;

    let request = PaymentIntentRequest {
        amount,
        currency: tx.currency.to_ascii_lowercase(),
        capture_method,
        customer,
        payment_method: Some(payment_method),
        confirm: true,
        off_session,
        metadata: correlation_metadata(tx),
    };
    let request_json = serde_json::to_value(&request)?;

    let mut result = match services.gateway.create_payment_intent(request).await {
        Ok(intent) => {
            tx.options
                .record("create_payment_intent", request_json, serde_json::to_value(&intent)?);
            apply_intent(tx, &intent)
        }
        Err(err) => {
            let message = refusal_message(err)?;
            audit_error(tx, "create_payment_intent", request_json, &message);
            tx.mark_failed(Some(&message));
            ActionResult::failure(tx.id, message)
        }
    };

    services.ledger.save(tx).await?;
    if tx.successful && !result.successful {
        warn!(
            transaction_id = %tx.id,
            "intent was confirmed by another signal, keeping it successful"
        );
        result = ActionResult::success(tx.id);
    }
    info!(
        transaction_id = %tx.id,
        action = %tx.action,
        successful = result.successful,
        "payment intent created"
    );
    Ok(result)
}

/// Maps an intent's status onto the ledger row.
pub(crate) fn apply_intent(tx: &mut PaymentTransaction, intent: &PaymentIntent) -> ActionResult {
    tx.options.set(OptionKey::PaymentIntentId, intent.id.clone());
    tx.options.set_opt(OptionKey::CustomerId, intent.customer.clone());
    tx.options
        .set_opt(OptionKey::PaymentMethodId, intent.payment_method.clone());

    match intent.status {
        IntentStatus::RequiresCapture => {
            tx.reference = Some(intent.id.clone());
            tx.mark_successful();
            tx.active = true;
            ActionResult::success(tx.id)
        }
        IntentStatus::Succeeded => {
            tx.reference = Some(intent.id.clone());
            tx.mark_successful();
            tx.active = false;
            ActionResult::success(tx.id)
        }
        IntentStatus::RequiresAction | IntentStatus::RequiresConfirmation => {
            tx.options
                .set_opt(OptionKey::ClientSecret, intent.client_secret.clone());
            tx.active = true;
            ActionResult::requires_action(tx.id, intent.client_secret.clone())
        }
        IntentStatus::Processing => {
            tx.active = true;
            ActionResult::failure(tx.id, "payment is still processing")
        }
        IntentStatus::Canceled | IntentStatus::RequiresPaymentMethod => {
            let reason = intent
                .last_payment_error
                .clone()
                .unwrap_or_else(|| format!("payment intent ended in status {:?}", intent.status));
            tx.mark_failed(Some(&reason));
            ActionResult::failure(tx.id, reason)
        }
    }
}
