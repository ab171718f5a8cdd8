use crate::domain::transaction::{ActionKind, PaymentTransaction};
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct LedgerRow {
    id: String,
    parent: Option<String>,
    action: ActionKind,
    reference: Option<String>,
    amount: Decimal,
    currency: String,
    successful: bool,
    active: bool,
}

impl From<PaymentTransaction> for LedgerRow {
    fn from(tx: PaymentTransaction) -> Self {
        Self {
            id: tx.id.to_string(),
            parent: tx.parent.map(|id| id.to_string()),
            action: tx.action,
            reference: tx.reference,
            amount: tx.amount,
            currency: tx.currency,
            successful: tx.successful,
            active: tx.active,
        }
    }
}

/// Writes ledger rows as CSV with a header, oldest first.
pub struct LedgerWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> LedgerWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_ledger(&mut self, mut ledger: Vec<PaymentTransaction>) -> Result<()> {
        ledger.sort_by_key(|tx| tx.created_at);
        for tx in ledger {
            self.writer.serialize(LedgerRow::from(tx))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
