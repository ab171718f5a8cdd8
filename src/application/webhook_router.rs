use crate::application::dispatcher::WebhookDispatcher;
use crate::application::executors::webhook::{
    IntentCanceledHandler, IntentFailedHandler, IntentSucceededHandler, RefundUpdatedHandler,
};
use crate::application::executors::{LedgerServices, WebhookContext};
use crate::domain::event::{EventKind, GatewayEvent};
use crate::domain::ports::GatewayConfigProviderRef;
use crate::domain::transaction::PaymentTransaction;
use crate::error::{ReconcileError, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookStatus {
    Ok,
    Forbidden,
    InternalError,
}

impl WebhookStatus {
    pub fn code(self) -> u16 {
        match self {
            WebhookStatus::Ok => 200,
            WebhookStatus::Forbidden => 403,
            WebhookStatus::InternalError => 500,
        }
    }
}

impl fmt::Display for WebhookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// What the webhook endpoint answers the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookOutcome {
    pub status: WebhookStatus,
    pub message: Option<String>,
}

impl WebhookOutcome {
    fn ok() -> Self {
        Self {
            status: WebhookStatus::Ok,
            message: None,
        }
    }

    fn ignored(reason: impl Into<String>) -> Self {
        Self {
            status: WebhookStatus::Ok,
            message: Some(reason.into()),
        }
    }

    fn forbidden(reason: Option<String>) -> Self {
        Self {
            status: WebhookStatus::Forbidden,
            message: reason,
        }
    }

    fn internal_error(reason: String) -> Self {
        Self {
            status: WebhookStatus::InternalError,
            message: Some(reason),
        }
    }
}

/// Maps trusted gateway events onto ledger rows and runs the matching handler.
///
/// Never fails: every error becomes a 500 outcome with an error log, so the
/// gateway retries delivery.
pub struct WebhookRouter {
    services: LedgerServices,
    configs: GatewayConfigProviderRef,
    dispatcher: WebhookDispatcher,
}

impl WebhookRouter {
    pub fn new(
        services: LedgerServices,
        configs: GatewayConfigProviderRef,
        dispatcher: WebhookDispatcher,
    ) -> Self {
        Self {
            services,
            configs,
            dispatcher,
        }
    }

    /// Router with the four built-in handlers.
    pub fn standard(services: LedgerServices, configs: GatewayConfigProviderRef) -> Self {
        let dispatcher = WebhookDispatcher::new(vec![
            Arc::new(IntentSucceededHandler::new(services.clone())),
            Arc::new(IntentFailedHandler::new(services.clone())),
            Arc::new(IntentCanceledHandler::new(services.clone())),
            Arc::new(RefundUpdatedHandler::new(services.clone())),
        ]);
        Self::new(services, configs, dispatcher)
    }

    pub async fn handle(&self, event: GatewayEvent) -> WebhookOutcome {
        let event_id = event.id.clone();
        let event_type = event.event_type.clone();
        match self.route(event).await {
            Ok(outcome) => {
                debug!(%event_id, %event_type, status = %outcome.status, "webhook handled");
                outcome
            }
            Err(err) => {
                error!(%event_id, %event_type, error = %err, "webhook processing failed");
                WebhookOutcome::internal_error(err.to_string())
            }
        }
    }

    async fn route(&self, event: GatewayEvent) -> Result<WebhookOutcome> {
        let Some(kind) = event.kind() else {
            return Ok(WebhookOutcome::ignored(format!(
                "unhandled event type {}",
                event.event_type
            )));
        };

        let Some(transaction) = self.resolve_transaction(&event, kind).await? else {
            debug!(event_id = %event.id, %kind, "no transaction for event");
            return Ok(WebhookOutcome::ignored("no matching transaction"));
        };

        let Some(config) = self.configs.get(&transaction.payment_method).await? else {
            warn!(
                event_id = %event.id,
                transaction_id = %transaction.id,
                payment_method = %transaction.payment_method,
                "no gateway configuration for transaction, ignoring event"
            );
            return Ok(WebhookOutcome::ignored("payment method is not configured"));
        };

        let transaction_id = transaction.id;
        let ctx = WebhookContext {
            event,
            kind,
            transaction,
            config,
        };
        match self.dispatcher.dispatch(kind.as_str(), ctx).await {
            Ok(result) if result.successful => Ok(WebhookOutcome::ok()),
            Ok(result) => Ok(WebhookOutcome::forbidden(result.error)),
            Err(ReconcileError::UnsupportedAction(_)) => {
                info!(%transaction_id, %kind, "no handler applies to transaction, ignoring event");
                Ok(WebhookOutcome::ignored("no applicable handler"))
            }
            Err(err) => Err(err),
        }
    }

    /// The row named in the object's metadata, or the first row whose reference
    /// is the event's intent id.
    ///
    /// Metadata written on a child (a refund carries its own id) resolves to the
    /// parent the handler expects.
    async fn resolve_transaction(
        &self,
        event: &GatewayEvent,
        kind: EventKind,
    ) -> Result<Option<PaymentTransaction>> {
        let ledger = &self.services.ledger;
        let expected = kind.correlated_actions();

        if let Some(id) = event.correlated_transaction()
            && let Some(tx) = ledger.get(id).await?
        {
            if expected.contains(&tx.action) {
                return Ok(Some(tx));
            }
            if let Some(parent_id) = tx.parent
                && let Some(parent) = ledger.get(parent_id).await?
                && expected.contains(&parent.action)
            {
                return Ok(Some(parent));
            }
        }

        match event.intent_id() {
            Some(intent) => ledger.find_by_reference(intent, expected).await,
            None => Ok(None),
        }
    }
}
