use super::authorize::create_intent;
use super::{ActionContext, ActionResult, Executor, GatewayServices};
use crate::domain::gateway::CaptureMethod;
use crate::domain::transaction::ActionKind;
use crate::error::Result;
use async_trait::async_trait;

/// Charges a stored card off-session with immediate capture.
///
/// Requires both the customer and the payment method in the transaction options.
pub struct ChargeExecutor {
    services: GatewayServices,
}

impl ChargeExecutor {
    pub fn new(services: GatewayServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Executor<ActionContext> for ChargeExecutor {
    fn is_supported(&self, name: &str) -> bool {
        name == ActionKind::Charge.as_str()
    }

    fn is_applicable(&self, _ctx: &ActionContext) -> bool {
        true
    }

    async fn execute(&self, ctx: ActionContext) -> Result<ActionResult> {
        let mut tx = ctx.transaction;
        tx.action = ActionKind::Charge;
        create_intent(&self.services, &mut tx, CaptureMethod::Automatic, true).await
    }
}
