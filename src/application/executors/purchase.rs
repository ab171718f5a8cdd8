use super::authorize::create_intent;
use super::{ActionContext, ActionResult, EntityShare, Executor, GatewayServices};
use crate::domain::config::{CaptureMode, GatewayConfig};
use crate::domain::gateway::CaptureMethod;
use crate::domain::transaction::{ActionKind, MatchHints, PaymentTransaction};
use crate::error::{ReconcileError, Result};
use async_trait::async_trait;
use tracing::{info, warn};

/// Ledger action recorded for a purchase under the configured capture mode:
/// a manual-capture purchase is only a hold.
fn purchase_action(config: &GatewayConfig) -> ActionKind {
    match config.capture_mode {
        CaptureMode::Manual => ActionKind::Authorize,
        CaptureMode::Automatic => ActionKind::Purchase,
    }
}

/// Pays for a single entity in one gateway round trip.
pub struct PurchaseExecutor {
    services: GatewayServices,
}

impl PurchaseExecutor {
    pub fn new(services: GatewayServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Executor<ActionContext> for PurchaseExecutor {
    fn is_supported(&self, name: &str) -> bool {
        name == ActionKind::Purchase.as_str()
    }

    fn is_applicable(&self, ctx: &ActionContext) -> bool {
        ctx.split.is_empty()
    }

    async fn execute(&self, ctx: ActionContext) -> Result<ActionResult> {
        let mut tx = ctx.transaction;
        tx.action = purchase_action(&ctx.config);
        let capture_method = CaptureMethod::from(ctx.config.capture_mode);
        create_intent(&self.services, &mut tx, capture_method, false).await
    }
}

/// Pays for an order split across several owning entities.
///
/// The requested transaction becomes the container; each share gets its own
/// child reconciled by entity, so a retried request only re-attempts the
/// shares that have not succeeded yet. Must be registered before
/// [`PurchaseExecutor`].
pub struct MultiPurchaseExecutor {
    services: GatewayServices,
}

impl MultiPurchaseExecutor {
    pub fn new(services: GatewayServices) -> Self {
        Self { services }
    }

    async fn purchase_share(
        &self,
        main: &PaymentTransaction,
        share: &EntityShare,
        action: ActionKind,
        capture_method: CaptureMethod,
    ) -> Result<ActionResult> {
        let mut sub = self
            .services
            .ledger
            .reconciliation
            .find_or_create(action, main, &MatchHints::entity(share.entity.clone()))
            .await?;
        if !sub.successful {
            sub.amount = share.amount;
        }
        create_intent(&self.services, &mut sub, capture_method, false).await
    }
}

#[derive(Debug, Default)]
struct PurchaseTally {
    total: usize,
    succeeded: usize,
    errors: Vec<String>,
}

impl PurchaseTally {
    fn record(&mut self, entity: &EntityShare, result: &ActionResult) {
        self.total += 1;
        if result.successful {
            self.succeeded += 1;
        } else {
            let reason = result.error.as_deref().unwrap_or("requires action");
            self.errors.push(format!("{}: {reason}", entity.entity));
        }
    }

    fn record_error(&mut self, entity: &EntityShare, err: &ReconcileError) {
        self.total += 1;
        self.errors.push(format!("{}: {err}", entity.entity));
    }

    fn failed(&self) -> usize {
        self.total - self.succeeded
    }
}

#[async_trait]
impl Executor<ActionContext> for MultiPurchaseExecutor {
    fn is_supported(&self, name: &str) -> bool {
        name == ActionKind::Purchase.as_str()
    }

    fn is_applicable(&self, ctx: &ActionContext) -> bool {
        !ctx.split.is_empty()
    }

    async fn execute(&self, ctx: ActionContext) -> Result<ActionResult> {
        let ledger = &self.services.ledger;
        let mut main = ctx.transaction;
        main.action = ActionKind::Purchase;
        main.active = true;
        ledger.save(&mut main).await?;

        let sub_action = purchase_action(&ctx.config);
        let capture_method = CaptureMethod::from(ctx.config.capture_mode);
        let mut tally = PurchaseTally::default();

        for share in &ctx.split {
            match self
                .purchase_share(&main, share, sub_action, capture_method)
                .await
            {
                Ok(result) => tally.record(share, &result),
                Err(err)
                    if err.is_configuration()
                        || matches!(err, ReconcileError::InvalidAmount { .. }) =>
                {
                    warn!(
                        transaction_id = %main.id,
                        entity = %share.entity,
                        error = %err,
                        "entity purchase failed"
                    );
                    tally.record_error(share, &err);
                }
                Err(err) => return Err(err),
            }
        }

        if tally.failed() == 0 {
            main.mark_successful();
        }
        main.active = tally.succeeded > 0;
        ledger.save(&mut main).await?;

        info!(
            transaction_id = %main.id,
            total = tally.total,
            succeeded = tally.succeeded,
            "multi-entity purchase finished"
        );

        let mut result = if tally.failed() == 0 {
            ActionResult::success(main.id)
        } else {
            ActionResult::failure(
                main.id,
                format!(
                    "{} of {} purchases failed: {}",
                    tally.failed(),
                    tally.total,
                    tally.errors.join("; ")
                ),
            )
        };
        result.has_successful = Some(tally.succeeded > 0);
        Ok(result)
    }
}
