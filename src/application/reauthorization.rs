//! Background renewal of authorize holds before the gateway lets them expire.
//!
//! `Init` finds eligible holds and splits them into chunk jobs; each `Chunk`
//! re-authorizes its holds one by one. A failing transaction never fails its
//! chunk: the failure is turned into a notification and the chunk still
//! completes, so "the batch ran" is tracked separately from "every renewal
//! worked".

use crate::application::executors::GatewayServices;
use crate::application::executors::authorize::create_intent;
use crate::application::executors::cancel::cancel_authorization;
use crate::domain::config::GatewayConfig;
use crate::domain::gateway::CaptureMethod;
use crate::domain::job::{JobId, JobState, ReauthorizationMessage};
use crate::domain::ports::{
    FailureNotifierRef, GatewayConfigProviderRef, JobQueueRef, JobTrackerRef,
};
use crate::domain::transaction::{
    ActionKind, MatchHints, OptionKey, PaymentTransaction, TransactionId,
};
use crate::error::{ReconcileError, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

pub const REAUTHORIZATION_JOB: &str = "reauthorization_chunk";
pub const DUPLICATE_CANCELLATION_REASON: &str = "duplicate";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReauthorizationPolicy {
    pub chunk_size: usize,
    /// Holds younger than this are left alone.
    pub min_age: Duration,
    /// Holds older than this are assumed expired already.
    pub max_age: Duration,
}

impl Default for ReauthorizationPolicy {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            min_age: Duration::days(6),
            max_age: Duration::days(7),
        }
    }
}

impl ReauthorizationPolicy {
    /// Creation-time bounds `(after, before)` of the holds due for renewal at `now`.
    pub fn window(&self, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let before = |name: &'static str, age: Duration| {
            now.checked_sub_signed(age).ok_or_else(|| ReconcileError::InvalidSetting {
                name,
                reason: format!("{} hours reaches past the calendar", age.num_hours()),
            })
        };
        Ok((before("max_age", self.max_age)?, before("min_age", self.min_age)?))
    }
}

/// Per-chunk counts, returned for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkReport {
    pub reauthorized: usize,
    pub failed: usize,
    pub skipped: usize,
}

enum Outcome {
    Reauthorized,
    Failed,
    Skipped,
}

pub struct ReauthorizationJob {
    services: GatewayServices,
    configs: GatewayConfigProviderRef,
    tracker: JobTrackerRef,
    queue: JobQueueRef,
    notifier: FailureNotifierRef,
    policy: ReauthorizationPolicy,
}

impl ReauthorizationJob {
    pub fn new(
        services: GatewayServices,
        configs: GatewayConfigProviderRef,
        tracker: JobTrackerRef,
        queue: JobQueueRef,
        notifier: FailureNotifierRef,
        policy: ReauthorizationPolicy,
    ) -> Self {
        Self {
            services,
            configs,
            tracker,
            queue,
            notifier,
            policy,
        }
    }

    pub fn policy(&self) -> ReauthorizationPolicy {
        self.policy
    }

    /// Entry point for queue consumers.
    pub async fn handle(&self, message: ReauthorizationMessage) -> Result<()> {
        match message {
            ReauthorizationMessage::Init => self.init().await.map(|_| ()),
            ReauthorizationMessage::Chunk {
                job_id,
                payment_transaction_ids,
            } => self
                .run_chunk(job_id, &payment_transaction_ids)
                .await
                .map(|_| ()),
        }
    }

    /// Discovers eligible holds and enqueues one tracked chunk job per partition.
    pub async fn init(&self) -> Result<Vec<JobId>> {
        let (created_after, created_before) = self.policy.window(Utc::now())?;
        let candidates = self
            .services
            .ledger
            .ledger
            .authorizations_created_between(created_after, created_before)
            .await?;

        let enabled: HashSet<String> = self
            .configs
            .all()
            .await?
            .into_iter()
            .filter(|config| config.reauthorization_enabled)
            .map(|config| config.payment_method)
            .collect();
        let ids: Vec<TransactionId> = candidates
            .into_iter()
            .filter(|tx| enabled.contains(&tx.payment_method))
            .map(|tx| tx.id)
            .collect();

        let mut jobs = Vec::new();
        for chunk in ids.chunks(self.policy.chunk_size.max(1)) {
            let job_id = self.tracker.create(REAUTHORIZATION_JOB).await?;
            self.queue
                .enqueue(ReauthorizationMessage::Chunk {
                    job_id,
                    payment_transaction_ids: chunk.to_vec(),
                })
                .await?;
            jobs.push(job_id);
        }

        info!(
            eligible = ids.len(),
            chunks = jobs.len(),
            "re-authorization chunks enqueued"
        );
        Ok(jobs)
    }

    /// Re-authorizes every transaction in the chunk and completes the job.
    ///
    /// Redelivery of a finished chunk is a no-op.
    pub async fn run_chunk(&self, job_id: JobId, ids: &[TransactionId]) -> Result<ChunkReport> {
        let state = self
            .tracker
            .state(job_id)
            .await?
            .ok_or_else(|| ReconcileError::Job(format!("unknown job {job_id}")))?;
        if state.is_terminal() {
            debug!(%job_id, ?state, "chunk already completed, skipping redelivery");
            return Ok(ChunkReport::default());
        }
        if state == JobState::New {
            self.tracker.transition(job_id, JobState::Running).await?;
        }

        let mut report = ChunkReport::default();
        for id in ids {
            match self.reauthorize_by_id(*id).await {
                Ok(Outcome::Reauthorized) => report.reauthorized += 1,
                Ok(Outcome::Skipped) => report.skipped += 1,
                Ok(Outcome::Failed) => report.failed += 1,
                Err(err) => {
                    error!(%job_id, transaction_id = %id, error = %err, "re-authorization failed");
                    report.failed += 1;
                    self.notify_by_id(*id, &err.to_string()).await;
                }
            }
        }

        self.tracker.transition(job_id, JobState::Success).await?;
        info!(
            %job_id,
            reauthorized = report.reauthorized,
            failed = report.failed,
            skipped = report.skipped,
            "re-authorization chunk completed"
        );
        Ok(report)
    }

    async fn reauthorize_by_id(&self, id: TransactionId) -> Result<Outcome> {
        match self.services.ledger.ledger.get(id).await? {
            Some(tx) => self.reauthorize(tx).await,
            None => {
                warn!(transaction_id = %id, "transaction vanished before re-authorization");
                Ok(Outcome::Skipped)
            }
        }
    }

    async fn reauthorize(&self, old: PaymentTransaction) -> Result<Outcome> {
        if old.action != ActionKind::Authorize || !old.active || !old.successful {
            debug!(transaction_id = %old.id, "hold is no longer active, skipping");
            return Ok(Outcome::Skipped);
        }
        let Some(config) = self.configs.get(&old.payment_method).await? else {
            warn!(
                transaction_id = %old.id,
                payment_method = %old.payment_method,
                "payment method is no longer configured, skipping"
            );
            return Ok(Outcome::Skipped);
        };
        if !config.reauthorization_enabled {
            return Ok(Outcome::Skipped);
        }

        let missing: Vec<String> = [OptionKey::CustomerId, OptionKey::PaymentMethodId]
            .into_iter()
            .filter(|key| !old.options.contains(*key))
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            let reason = format!(
                "Hold cannot be renewed without a stored {}",
                missing.join(" and ")
            );
            self.notify(&old, &config, &reason).await;
            return Ok(Outcome::Failed);
        }

        let mut renewed = self
            .services
            .ledger
            .reconciliation
            .find_or_create(ActionKind::Authorize, &old, &MatchHints::any())
            .await?;
        renewed.options.set(OptionKey::ReauthorizedFrom, old.id.to_string());

        let result =
            create_intent(&self.services, &mut renewed, CaptureMethod::Manual, true).await?;
        if !result.successful {
            let reason = result
                .error
                .unwrap_or_else(|| "the gateway requires customer action".to_string());
            self.notify(&old, &config, &reason).await;
            return Ok(Outcome::Failed);
        }

        let canceled =
            cancel_authorization(&self.services, old.clone(), DUPLICATE_CANCELLATION_REASON)
                .await?;
        if !canceled.successful {
            let reason = format!(
                "Hold was renewed but the previous one could not be canceled: {}",
                canceled.error.unwrap_or_default()
            );
            self.notify(&old, &config, &reason).await;
            return Ok(Outcome::Failed);
        }

        info!(
            transaction_id = %renewed.id,
            previous_id = %old.id,
            "hold re-authorized"
        );
        Ok(Outcome::Reauthorized)
    }

    async fn notify_by_id(&self, id: TransactionId, reason: &str) {
        let tx = match self.services.ledger.ledger.get(id).await {
            Ok(Some(tx)) => tx,
            Ok(None) => return,
            Err(err) => {
                error!(transaction_id = %id, error = %err, "cannot load transaction to notify");
                return;
            }
        };
        match self.configs.get(&tx.payment_method).await {
            Ok(Some(config)) => self.notify(&tx, &config, reason).await,
            Ok(None) => {
                warn!(transaction_id = %id, "no recipients configured for failure notification")
            }
            Err(err) => {
                error!(transaction_id = %id, error = %err, "cannot load configuration to notify")
            }
        }
    }

    async fn notify(&self, tx: &PaymentTransaction, config: &GatewayConfig, reason: &str) {
        if let Err(err) = self
            .notifier
            .send_failure_email(tx, reason, &config.notification_recipients)
            .await
        {
            error!(transaction_id = %tx.id, error = %err, "failure notification could not be sent");
        }
    }
}
