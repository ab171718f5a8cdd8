use crate::application::dispatcher::ActionDispatcher;
use crate::application::executors::authorize::AuthorizeExecutor;
use crate::application::executors::cancel::CancelExecutor;
use crate::application::executors::capture::CaptureExecutor;
use crate::application::executors::charge::ChargeExecutor;
use crate::application::executors::confirm::ConfirmExecutor;
use crate::application::executors::purchase::{MultiPurchaseExecutor, PurchaseExecutor};
use crate::application::executors::refund::RefundExecutor;
use crate::application::executors::{
    ActionContext, ActionExecutor, ActionRequest, ActionResult, GatewayServices, LedgerServices,
};
use crate::application::reauthorization::{ReauthorizationJob, ReauthorizationPolicy};
use crate::application::webhook_router::{WebhookOutcome, WebhookRouter};
use crate::domain::event::GatewayEvent;
use crate::domain::gateway::PaymentGateway;
use crate::domain::money::AmountConverter;
use crate::domain::ports::{
    FailureNotifierRef, GatewayConfigProviderRef, JobQueueRef, JobTrackerRef, LedgerStoreRef,
};
use crate::domain::transaction::PaymentTransaction;
use crate::error::{ReconcileError, Result};
use std::sync::Arc;
use tracing::debug;

/// The main entry point of the reconciliation engine.
///
/// `PaymentEngine` wires the ledger, the gateway and the gateway configurations
/// into the action dispatcher and the webhook router. Both paths share one
/// ledger and one reconciliation service, so API calls and webhooks converge on
/// the same rows.
pub struct PaymentEngine {
    services: GatewayServices,
    configs: GatewayConfigProviderRef,
    dispatcher: ActionDispatcher,
    router: WebhookRouter,
}

impl PaymentEngine {
    /// Creates a new `PaymentEngine` with the default executor order.
    ///
    /// # Arguments
    ///
    /// * `ledger` - The store for the transaction ledger.
    /// * `gateway` - The card gateway client.
    /// * `configs` - Per-payment-method gateway configuration.
    /// * `converter` - Decimal to minor-unit conversion.
    pub fn new(
        ledger: LedgerStoreRef,
        gateway: Arc<dyn PaymentGateway>,
        configs: GatewayConfigProviderRef,
        converter: Arc<dyn AmountConverter>,
    ) -> Self {
        let ledger_services = LedgerServices::new(ledger, converter);
        let services = GatewayServices::new(ledger_services.clone(), gateway);
        let dispatcher = ActionDispatcher::new(default_executors(&services));
        let router = WebhookRouter::standard(ledger_services, configs.clone());
        Self {
            services,
            configs,
            dispatcher,
            router,
        }
    }

    /// Runs `action_name` for `transaction` with no extra parameters.
    pub async fn execute(
        &self,
        action_name: &str,
        transaction: PaymentTransaction,
    ) -> Result<ActionResult> {
        self.execute_with(ActionRequest::new(action_name, transaction))
            .await
    }

    /// Runs a fully specified action request.
    ///
    /// Configuration errors (unknown action, missing parent, no configuration
    /// for the payment method) and gateway transport errors are returned as
    /// `Err`. Gateway refusals come back as an unsuccessful [`ActionResult`].
    pub async fn execute_with(&self, request: ActionRequest) -> Result<ActionResult> {
        let payment_method = request.transaction.payment_method.clone();
        let config = self
            .configs
            .get(&payment_method)
            .await?
            .ok_or(ReconcileError::MissingConfiguration(payment_method))?;

        let action = request.action.clone();
        debug!(
            %action,
            transaction_id = %request.transaction.id,
            "dispatching action"
        );
        self.dispatcher
            .dispatch(&action, ActionContext::new(request, config))
            .await
    }

    pub async fn handle_webhook(&self, event: GatewayEvent) -> WebhookOutcome {
        self.router.handle(event).await
    }

    /// The batch job renewing holds through this engine's gateway and ledger.
    pub fn reauthorization(
        &self,
        tracker: JobTrackerRef,
        queue: JobQueueRef,
        notifier: FailureNotifierRef,
        policy: ReauthorizationPolicy,
    ) -> ReauthorizationJob {
        ReauthorizationJob::new(
            self.services.clone(),
            self.configs.clone(),
            tracker,
            queue,
            notifier,
            policy,
        )
    }

    pub fn ledger(&self) -> &LedgerStoreRef {
        &self.services.ledger.ledger
    }
}

/// Executors in resolution order. The multi-entity purchase must precede the
/// single one.
pub fn default_executors(services: &GatewayServices) -> Vec<Arc<ActionExecutor>> {
    vec![
        Arc::new(AuthorizeExecutor::new(services.clone())),
        Arc::new(CaptureExecutor::new(services.clone())),
        Arc::new(CancelExecutor::new(services.clone())),
        Arc::new(RefundExecutor::new(services.clone())),
        Arc::new(MultiPurchaseExecutor::new(services.clone())),
        Arc::new(PurchaseExecutor::new(services.clone())),
        Arc::new(ConfirmExecutor::new(services.clone())),
        Arc::new(ChargeExecutor::new(services.clone())),
    ]
}
