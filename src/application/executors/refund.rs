use super::{
    ActionContext, ActionResult, Executor, GatewayServices, IN_PROGRESS, audit_error,
    correlation_metadata, intent_id, refusal_message,
};
use crate::domain::gateway::{Refund, RefundRequest};
use crate::domain::money::AmountConverter;
use crate::domain::transaction::{
    ActionKind, MatchHints, OptionKey, PaymentTransaction, refunded_total,
};
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

/// Returns money from a capture, purchase or charge.
///
/// The running total of successful refunds is only used to short-circuit a
/// parent that is already fully refunded. The gateway decides whether a refund
/// exceeds what is left.
pub struct RefundExecutor {
    services: GatewayServices,
}

impl RefundExecutor {
    pub fn new(services: GatewayServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Executor<ActionContext> for RefundExecutor {
    fn is_supported(&self, name: &str) -> bool {
        name == ActionKind::Refund.as_str()
    }

    fn is_applicable(&self, _ctx: &ActionContext) -> bool {
        true
    }

    async fn execute(&self, ctx: ActionContext) -> Result<ActionResult> {
        let ledger = &self.services.ledger;
        let parent = ledger.load_parent(&ctx.transaction).await?;
        parent.ensure_parent_of(ActionKind::Refund)?;
        let intent = intent_id(&parent)?;

        let siblings = ledger.ledger.children(parent.id).await?;
        let remaining = parent.amount - refunded_total(&siblings);
        if remaining <= Decimal::ZERO {
            warn!(
                parent_id = %parent.id,
                amount = %parent.amount,
                "parent is already fully refunded"
            );
            return Ok(ActionResult::failure(parent.id, "transaction is already fully refunded"));
        }
        let amount = ctx.amount.unwrap_or(remaining);
        if amount > remaining {
            warn!(
                parent_id = %parent.id,
                %amount,
                %remaining,
                "refund exceeds the locally tracked remainder, deferring to the gateway"
            );
        }

        let mut refund = ledger
            .reconciliation
            .find_or_create(ActionKind::Refund, &parent, &MatchHints::in_flight())
            .await?;
        let Some(_claim) = ledger.reconciliation.claim(&refund) else {
            return Ok(ActionResult::failure(refund.id, IN_PROGRESS));
        };
        if ledger.is_confirmed(&refund).await? {
            debug!(transaction_id = %refund.id, "pending refund was confirmed meanwhile");
            return Ok(ActionResult::success(refund.id));
        }
        refund.amount = amount;
        refund.options.set_opt(OptionKey::RefundReason, ctx.reason.clone());
        refund.active = true;
        ledger.save(&mut refund).await?;

        let request = RefundRequest {
            payment_intent: intent,
            amount: Some(ledger.converter.to_minor_units(amount, &parent.currency)?),
            reason: ctx.reason,
            metadata: correlation_metadata(&refund),
        };
        let request_json = serde_json::to_value(&request)?;

        let mut result = match self.services.gateway.create_refund(request).await {
            Ok(created) => {
                refund
                    .options
                    .record("create_refund", request_json, serde_json::to_value(&created)?);
                if apply_refund(ledger.converter.as_ref(), &mut refund, &created)? {
                    ActionResult::success(refund.id)
                } else {
                    let message = created
                        .failure_reason
                        .unwrap_or_else(|| format!("refund {:?}", created.status));
                    ActionResult::failure(refund.id, message)
                }
            }
            Err(err) => {
                let message = refusal_message(err)?;
                audit_error(&mut refund, "create_refund", request_json, &message);
                refund.mark_failed(Some(&message));
                ActionResult::failure(refund.id, message)
            }
        };
        ledger.save(&mut refund).await?;
        if refund.successful && !result.successful {
            warn!(
                transaction_id = %refund.id,
                "refund was confirmed by another signal, keeping it successful"
            );
            result = ActionResult::success(refund.id);
        }

        info!(
            transaction_id = %refund.id,
            parent_id = %parent.id,
            amount = %refund.amount,
            successful = result.successful,
            "refund finished"
        );
        Ok(result)
    }
}

/// Copies a gateway refund object onto its ledger row and returns whether the
/// row is now successful.
///
/// A refund the ledger already holds as successful is never reverted; the
/// conflicting status is logged instead.
pub(crate) fn apply_refund(
    converter: &dyn AmountConverter,
    tx: &mut PaymentTransaction,
    refund: &Refund,
) -> Result<bool> {
    let currency = refund.currency.to_ascii_uppercase();
    tx.reference = Some(refund.id.clone());
    tx.amount = converter.from_minor_units(refund.amount, &currency)?;
    tx.currency = currency;

    let (successful, active) = refund.status.ledger_flags();
    if successful {
        tx.mark_successful();
        tx.active = active;
    } else if tx.successful {
        warn!(
            transaction_id = %tx.id,
            refund_id = %refund.id,
            status = ?refund.status,
            "gateway reports a failed refund that was already recorded as successful"
        );
        tx.options
            .set_opt(OptionKey::FailureReason, refund.failure_reason.as_deref());
        tx.active = false;
    } else {
        tx.mark_failed(refund.failure_reason.as_deref());
    }
    Ok(tx.successful)
}
