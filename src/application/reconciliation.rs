use crate::domain::ports::LedgerStoreRef;
use crate::domain::transaction::{ActionKind, MatchHints, PaymentTransaction, TransactionId};
use crate::error::Result;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Rows currently held by a gateway call in this process.
///
/// An in-flight row with no live claim was left behind by a call that failed
/// in transport, and a retry may pick it up.
#[derive(Clone, Default)]
struct Claims {
    held: Arc<Mutex<HashSet<TransactionId>>>,
}

impl Claims {
    fn take(&self, id: TransactionId) -> Option<Claim> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.insert(id).then(|| Claim {
            id,
            held: self.held.clone(),
        })
    }
}

/// Exclusive right to call the gateway for one ledger row; released on drop.
#[must_use = "the claim is released as soon as it is dropped"]
pub struct Claim {
    id: TransactionId,
    held: Arc<Mutex<HashSet<TransactionId>>>,
}

impl Drop for Claim {
    fn drop(&mut self) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.remove(&self.id);
    }
}

/// The single place where child transactions come into existence.
///
/// API executors and webhook handlers both go through [`find_or_create`], so a
/// duplicated webhook, or a webhook racing the API call that caused it, lands on
/// the same ledger row.
///
/// [`find_or_create`]: ReconciliationService::find_or_create
#[derive(Clone)]
pub struct ReconciliationService {
    ledger: LedgerStoreRef,
    claims: Claims,
}

impl ReconciliationService {
    pub fn new(ledger: LedgerStoreRef) -> Self {
        Self {
            ledger,
            claims: Claims::default(),
        }
    }

    /// Claims `tx` for a gateway call. `None` while another call holds it.
    pub fn claim(&self, tx: &PaymentTransaction) -> Option<Claim> {
        let claim = self.claims.take(tx.id);
        if claim.is_none() {
            debug!(transaction_id = %tx.id, "transaction is held by another gateway call");
        }
        claim
    }

    /// Returns the child of `parent` for `action` matching `hints`, creating it if
    /// none exists.
    ///
    /// New rows are persisted immediately as active, unsuccessful and without a
    /// reference, i.e. as an in-flight lock that later callers converge on. The
    /// storage layer decides the winner if two callers create concurrently.
    pub async fn find_or_create(
        &self,
        action: ActionKind,
        parent: &PaymentTransaction,
        hints: &MatchHints,
    ) -> Result<PaymentTransaction> {
        let existing = self
            .ledger
            .children(parent.id)
            .await?
            .into_iter()
            .find(|child| hints.matches(parent.id, action, child));

        if let Some(found) = existing {
            self.check_state(&found);
            return Ok(found);
        }

        let mut candidate = PaymentTransaction::child_of(parent, action);
        if let Some(entity) = &hints.entity {
            candidate.entity = entity.clone();
        }
        let candidate_id = candidate.id;
        let stored = self.ledger.insert_or_get(candidate, hints).await?;

        if stored.id == candidate_id {
            debug!(
                transaction_id = %stored.id,
                parent_id = %parent.id,
                %action,
                "created transaction"
            );
        } else {
            debug!(
                transaction_id = %stored.id,
                parent_id = %parent.id,
                %action,
                "lost creation race, reusing existing transaction"
            );
            self.check_state(&stored);
        }
        Ok(stored)
    }

    fn check_state(&self, tx: &PaymentTransaction) {
        if !tx.active {
            warn!(
                transaction_id = %tx.id,
                action = %tx.action,
                successful = tx.successful,
                "reconciled transaction is no longer active"
            );
        }
    }
}
