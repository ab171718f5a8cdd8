use super::config::GatewayConfig;
use super::job::{JobId, JobState, ReauthorizationMessage};
use super::transaction::{ActionKind, MatchHints, PaymentTransaction, TransactionId};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Persistence of the transaction ledger.
///
/// `insert_or_get` is the storage-level arbiter of uniqueness: of two callers
/// racing to insert a matching child, exactly one row is kept and both get it back.
/// Implementations should override `update` so the read and the write happen
/// under one lock.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get(&self, id: TransactionId) -> Result<Option<PaymentTransaction>>;

    /// Inserts or replaces the row with the same id.
    async fn save(&self, tx: PaymentTransaction) -> Result<()>;

    /// Stores `tx` but never un-confirms a row: when the stored row is already
    /// successful, its `successful` flag and reference are kept. Returns the row
    /// as written.
    async fn update(&self, mut tx: PaymentTransaction) -> Result<PaymentTransaction> {
        if let Some(stored) = self.get(tx.id).await? {
            tx.keep_confirmation(&stored);
        }
        self.save(tx.clone()).await?;
        Ok(tx)
    }

    /// Stores `tx` unless a child of `tx.parent` with `tx.action` already matches
    /// `hints`, in which case that child is returned and `tx` is discarded.
    async fn insert_or_get(
        &self,
        tx: PaymentTransaction,
        hints: &MatchHints,
    ) -> Result<PaymentTransaction>;

    async fn all(&self) -> Result<Vec<PaymentTransaction>>;

    async fn children(&self, parent: TransactionId) -> Result<Vec<PaymentTransaction>> {
        let mut children: Vec<_> = self
            .all()
            .await?
            .into_iter()
            .filter(|tx| tx.parent == Some(parent))
            .collect();
        children.sort_by_key(|tx| tx.created_at);
        Ok(children)
    }

    /// First transaction carrying `reference`, trying `actions` in order.
    async fn find_by_reference(
        &self,
        reference: &str,
        actions: &[ActionKind],
    ) -> Result<Option<PaymentTransaction>> {
        let all = self.all().await?;
        Ok(actions.iter().find_map(|action| {
            all.iter()
                .find(|tx| tx.action == *action && tx.reference.as_deref() == Some(reference))
                .cloned()
        }))
    }

    /// Active, successful authorize holds created inside `(created_after, created_before)`.
    async fn authorizations_created_between(
        &self,
        created_after: DateTime<Utc>,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<PaymentTransaction>> {
        let mut holds: Vec<_> = self
            .all()
            .await?
            .into_iter()
            .filter(|tx| {
                tx.action == ActionKind::Authorize
                    && tx.active
                    && tx.successful
                    && tx.created_at > created_after
                    && tx.created_at < created_before
            })
            .collect();
        holds.sort_by_key(|tx| tx.created_at);
        Ok(holds)
    }
}

#[async_trait]
pub trait GatewayConfigProvider: Send + Sync {
    async fn get(&self, payment_method: &str) -> Result<Option<GatewayConfig>>;
    async fn all(&self) -> Result<Vec<GatewayConfig>>;
}

/// Unit-of-work tracking for background jobs.
#[async_trait]
pub trait JobTracker: Send + Sync {
    async fn create(&self, name: &str) -> Result<JobId>;
    async fn state(&self, id: JobId) -> Result<Option<JobState>>;
    /// Fails when the job is unknown or `next` is not reachable from the current state.
    async fn transition(&self, id: JobId, next: JobState) -> Result<()>;
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, message: ReauthorizationMessage) -> Result<()>;
}

#[async_trait]
pub trait FailureNotifier: Send + Sync {
    async fn send_failure_email(
        &self,
        tx: &PaymentTransaction,
        reason: &str,
        recipients: &[String],
    ) -> Result<()>;
}

pub type LedgerStoreRef = Arc<dyn LedgerStore>;
pub type GatewayConfigProviderRef = Arc<dyn GatewayConfigProvider>;
pub type JobTrackerRef = Arc<dyn JobTracker>;
pub type JobQueueRef = Arc<dyn JobQueue>;
pub type FailureNotifierRef = Arc<dyn FailureNotifier>;
