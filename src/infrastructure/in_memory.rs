use crate::domain::config::GatewayConfig;
use crate::domain::job::{JobId, JobState, ReauthorizationMessage};
use crate::domain::ports::{GatewayConfigProvider, JobQueue, JobTracker, LedgerStore};
use crate::domain::transaction::{MatchHints, PaymentTransaction, TransactionId};
use crate::error::{ReconcileError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// A thread-safe in-memory ledger.
///
/// Uses `Arc<RwLock<HashMap<TransactionId, PaymentTransaction>>>` so clones share
/// the same rows. `insert_or_get` holds the write lock across the lookup and the
/// insert, which is what makes it a uniqueness arbiter.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    transactions: Arc<RwLock<HashMap<TransactionId, PaymentTransaction>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transactions(transactions: impl IntoIterator<Item = PaymentTransaction>) -> Self {
        let map = transactions.into_iter().map(|tx| (tx.id, tx)).collect();
        Self {
            transactions: Arc::new(RwLock::new(map)),
        }
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn get(&self, id: TransactionId) -> Result<Option<PaymentTransaction>> {
        let transactions = self.transactions.read().await;
        Ok(transactions.get(&id).cloned())
    }

    async fn save(&self, tx: PaymentTransaction) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        transactions.insert(tx.id, tx);
        Ok(())
    }

    async fn update(&self, mut tx: PaymentTransaction) -> Result<PaymentTransaction> {
        let mut transactions = self.transactions.write().await;
        if let Some(stored) = transactions.get(&tx.id) {
            tx.keep_confirmation(stored);
        }
        transactions.insert(tx.id, tx.clone());
        Ok(tx)
    }

    async fn insert_or_get(
        &self,
        tx: PaymentTransaction,
        hints: &MatchHints,
    ) -> Result<PaymentTransaction> {
        let mut transactions = self.transactions.write().await;
        if let Some(parent) = tx.parent {
            let winner = transactions
                .values()
                .filter(|existing| hints.matches(parent, tx.action, existing))
                .min_by_key(|existing| existing.created_at);
            if let Some(winner) = winner {
                return Ok(winner.clone());
            }
        }
        transactions.insert(tx.id, tx.clone());
        Ok(tx)
    }

    async fn all(&self) -> Result<Vec<PaymentTransaction>> {
        let transactions = self.transactions.read().await;
        let mut all: Vec<_> = transactions.values().cloned().collect();
        all.sort_by_key(|tx| tx.created_at);
        Ok(all)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryConfigProvider {
    configs: Arc<HashMap<String, GatewayConfig>>,
}

impl InMemoryConfigProvider {
    pub fn new(configs: impl IntoIterator<Item = GatewayConfig>) -> Self {
        let configs = configs
            .into_iter()
            .map(|c| (c.payment_method.clone(), c))
            .collect();
        Self {
            configs: Arc::new(configs),
        }
    }
}

#[async_trait]
impl GatewayConfigProvider for InMemoryConfigProvider {
    async fn get(&self, payment_method: &str) -> Result<Option<GatewayConfig>> {
        Ok(self.configs.get(payment_method).cloned())
    }

    async fn all(&self) -> Result<Vec<GatewayConfig>> {
        Ok(self.configs.values().cloned().collect())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryJobTracker {
    jobs: Arc<RwLock<HashMap<JobId, (String, JobState)>>>,
}

impl InMemoryJobTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobTracker for InMemoryJobTracker {
    async fn create(&self, name: &str) -> Result<JobId> {
        let id = JobId::new();
        let mut jobs = self.jobs.write().await;
        jobs.insert(id, (name.to_string(), JobState::New));
        Ok(id)
    }

    async fn state(&self, id: JobId) -> Result<Option<JobState>> {
        let jobs = self.jobs.read().await;
        Ok(jobs.get(&id).map(|(_, state)| *state))
    }

    async fn transition(&self, id: JobId, next: JobState) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let (name, state) = jobs
            .get_mut(&id)
            .ok_or_else(|| ReconcileError::Job(format!("unknown job {id}")))?;
        if !state.can_transition_to(next) {
            return Err(ReconcileError::Job(format!(
                "job {name} ({id}) cannot move from {state:?} to {next:?}"
            )));
        }
        *state = next;
        Ok(())
    }
}

/// Collects enqueued messages so a worker (or a test) can drain them.
#[derive(Default, Clone)]
pub struct InMemoryJobQueue {
    messages: Arc<Mutex<Vec<ReauthorizationMessage>>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn drain(&self) -> Vec<ReauthorizationMessage> {
        let mut messages = self.messages.lock().await;
        std::mem::take(&mut *messages)
    }

    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.lock().await.is_empty()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, message: ReauthorizationMessage) -> Result<()> {
        self.messages.lock().await.push(message);
        Ok(())
    }
}
