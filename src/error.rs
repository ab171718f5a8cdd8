use crate::domain::gateway::GatewayError;
use crate::domain::transaction::{ActionKind, OptionKey, TransactionId};
use rust_decimal::Decimal;
use thiserror::Error;

/// Every failure the engine can surface to its callers.
///
/// Variants are grouped by how callers are expected to react: configuration
/// errors are fatal and never retried, gateway API errors are recorded on the
/// ledger, transport and storage errors propagate to the retry mechanism of
/// whoever invoked the engine.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Transaction {0} requires a parent transaction but none was found")]
    MissingParent(TransactionId),
    #[error("Transaction {id} has action {actual}, expected one of {expected:?}")]
    InvalidParent {
        id: TransactionId,
        actual: ActionKind,
        expected: &'static [ActionKind],
    },
    #[error("Unsupported action: {0}")]
    UnsupportedAction(String),
    #[error("No amount converter is configured for currency {0}")]
    NoConverter(String),
    #[error("Transaction {id} is missing required option {key}")]
    MissingOption { id: TransactionId, key: OptionKey },
    #[error("No gateway configuration found for payment method {0}")]
    MissingConfiguration(String),
    #[error("Invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
    #[error("Invalid amount {amount} for currency {currency}: {reason}")]
    InvalidAmount {
        amount: Decimal,
        currency: String,
        reason: &'static str,
    },
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Job error: {0}")]
    Job(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),
}

impl ReconcileError {
    /// Errors caused by how the engine was wired or called. Retrying cannot fix them.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ReconcileError::MissingParent(_)
                | ReconcileError::InvalidParent { .. }
                | ReconcileError::UnsupportedAction(_)
                | ReconcileError::NoConverter(_)
                | ReconcileError::MissingOption { .. }
                | ReconcileError::MissingConfiguration(_)
                | ReconcileError::InvalidSetting { .. }
        )
    }

    /// The gateway could not be reached; the operation may be retried.
    pub fn is_transport(&self) -> bool {
        matches!(self, ReconcileError::Gateway(GatewayError::Transport(_)))
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
