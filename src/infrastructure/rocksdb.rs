use crate::domain::ports::LedgerStore;
use crate::domain::transaction::{MatchHints, PaymentTransaction, TransactionId};
use crate::error::{ReconcileError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, DB, Options};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family holding ledger rows keyed by transaction id.
pub const CF_TRANSACTIONS: &str = "transactions";

/// A persistent ledger backed by RocksDB.
///
/// Rows are stored as JSON under their 16-byte id. `Clone` shares the underlying
/// `Arc<DB>` and the insert lock, so every clone arbitrates `insert_or_get`
/// through the same mutex.
#[derive(Clone)]
pub struct RocksDbLedger {
    db: Arc<DB>,
    insert_lock: Arc<Mutex<()>>,
}

impl RocksDbLedger {
    /// Opens or creates a RocksDB instance at `path`, creating the column family if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_transactions = ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Options::default());
        let db = DB::open_cf_descriptors(&opts, path, vec![cf_transactions])?;

        Ok(Self {
            db: Arc::new(db),
            insert_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(CF_TRANSACTIONS)
            .ok_or_else(|| ReconcileError::Storage("transactions column family not found".into()))
    }

    fn put(&self, tx: &PaymentTransaction) -> Result<()> {
        let value = serde_json::to_vec(tx)?;
        self.db.put_cf(self.cf()?, tx.id.0.as_bytes(), value)?;
        Ok(())
    }

    fn scan(&self) -> Result<Vec<PaymentTransaction>> {
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(self.cf()?, rocksdb::IteratorMode::Start) {
            let (_key, value) = item?;
            rows.push(serde_json::from_slice::<PaymentTransaction>(&value)?);
        }
        rows.sort_by_key(|tx| tx.created_at);
        Ok(rows)
    }
}

#[async_trait]
impl LedgerStore for RocksDbLedger {
    async fn get(&self, id: TransactionId) -> Result<Option<PaymentTransaction>> {
        match self.db.get_cf(self.cf()?, id.0.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, tx: PaymentTransaction) -> Result<()> {
        self.put(&tx)
    }

    async fn update(&self, mut tx: PaymentTransaction) -> Result<PaymentTransaction> {
        let _guard = self.insert_lock.lock().await;
        if let Some(stored) = self.get(tx.id).await? {
            tx.keep_confirmation(&stored);
        }
        self.put(&tx)?;
        Ok(tx)
    }

    async fn insert_or_get(
        &self,
        tx: PaymentTransaction,
        hints: &MatchHints,
    ) -> Result<PaymentTransaction> {
        let _guard = self.insert_lock.lock().await;
        if let Some(parent) = tx.parent
            && let Some(winner) = self
                .scan()?
                .into_iter()
                .find(|existing| hints.matches(parent, tx.action, existing))
        {
            return Ok(winner);
        }
        self.put(&tx)?;
        Ok(tx)
    }

    async fn all(&self) -> Result<Vec<PaymentTransaction>> {
        self.scan()
    }
}
