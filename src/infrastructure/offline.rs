use crate::domain::gateway::{
    GatewayError, PaymentGateway, PaymentIntent, PaymentIntentRequest, Refund, RefundRequest,
};
use async_trait::async_trait;

/// A gateway that is never reachable.
///
/// Lets the CLI build the engine for work that only touches the ledger (replaying
/// webhooks, planning re-authorization chunks). Any call fails as a transport
/// error, so nothing is recorded as a decline.
#[derive(Debug, Default, Clone)]
pub struct OfflineGateway;

fn unavailable<T>() -> Result<T, GatewayError> {
    Err(GatewayError::Transport(
        "no gateway is available in offline mode".to_string(),
    ))
}

#[async_trait]
impl PaymentGateway for OfflineGateway {
    async fn create_payment_intent(
        &self,
        _request: PaymentIntentRequest,
    ) -> Result<PaymentIntent, GatewayError> {
        unavailable()
    }

    async fn capture_payment_intent(
        &self,
        _intent_id: &str,
        _amount_to_capture: Option<i64>,
    ) -> Result<PaymentIntent, GatewayError> {
        unavailable()
    }

    async fn cancel_payment_intent(
        &self,
        _intent_id: &str,
        _reason: Option<&str>,
    ) -> Result<PaymentIntent, GatewayError> {
        unavailable()
    }

    async fn confirm_payment_intent(
        &self,
        _intent_id: &str,
    ) -> Result<PaymentIntent, GatewayError> {
        unavailable()
    }

    async fn create_refund(&self, _request: RefundRequest) -> Result<Refund, GatewayError> {
        unavailable()
    }
}
