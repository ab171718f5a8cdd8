use crate::domain::ports::FailureNotifier;
use crate::domain::transaction::PaymentTransaction;
use crate::error::Result;
use async_trait::async_trait;
use tracing::warn;

/// Writes failure notifications to the log instead of sending mail.
///
/// Used by the CLI and anywhere a mail transport has not been wired in.
#[derive(Debug, Default, Clone)]
pub struct LoggingNotifier;

#[async_trait]
impl FailureNotifier for LoggingNotifier {
    async fn send_failure_email(
        &self,
        tx: &PaymentTransaction,
        reason: &str,
        recipients: &[String],
    ) -> Result<()> {
        warn!(
            transaction_id = %tx.id,
            entity = %tx.entity,
            recipients = %recipients.join(","),
            "payment failure notification: {reason}"
        );
        Ok(())
    }
}
