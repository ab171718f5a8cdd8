use crate::domain::config::GatewayConfig;
use crate::domain::transaction::PaymentTransaction;
use crate::error::Result;
use std::io::Read;

/// Reads a ledger snapshot: a JSON array of transactions.
pub fn read_ledger<R: Read>(source: R) -> Result<Vec<PaymentTransaction>> {
    Ok(serde_json::from_reader(source)?)
}

/// Reads gateway configurations: a JSON array, one entry per payment method.
pub fn read_configs<R: Read>(source: R) -> Result<Vec<GatewayConfig>> {
    Ok(serde_json::from_reader(source)?)
}
