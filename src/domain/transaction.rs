use crate::error::{ReconcileError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TransactionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Authorize,
    Capture,
    Cancel,
    Refund,
    Purchase,
    Charge,
    Confirm,
}

impl ActionKind {
    pub const ALL: [ActionKind; 7] = [
        ActionKind::Authorize,
        ActionKind::Capture,
        ActionKind::Cancel,
        ActionKind::Refund,
        ActionKind::Purchase,
        ActionKind::Charge,
        ActionKind::Confirm,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Authorize => "authorize",
            ActionKind::Capture => "capture",
            ActionKind::Cancel => "cancel",
            ActionKind::Refund => "refund",
            ActionKind::Purchase => "purchase",
            ActionKind::Charge => "charge",
            ActionKind::Confirm => "confirm",
        }
    }

    /// Actions the parent of a transaction with this action may have.
    /// `None` means the action does not require a parent.
    pub fn required_parent(self) -> Option<&'static [ActionKind]> {
        match self {
            ActionKind::Capture | ActionKind::Cancel => Some(&[ActionKind::Authorize]),
            ActionKind::Refund => Some(&[
                ActionKind::Capture,
                ActionKind::Purchase,
                ActionKind::Charge,
            ]),
            _ => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self> {
        ActionKind::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| ReconcileError::UnsupportedAction(s.to_string()))
    }
}

/// Recognised keys of the options bag. Anything else is not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionKey {
    CustomerId,
    PaymentMethodId,
    PaymentIntentId,
    ClientSecret,
    CancellationReason,
    RefundReason,
    FailureReason,
    ReauthorizedFrom,
}

impl fmt::Display for OptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OptionKey::CustomerId => "customer_id",
            OptionKey::PaymentMethodId => "payment_method_id",
            OptionKey::PaymentIntentId => "payment_intent_id",
            OptionKey::ClientSecret => "client_secret",
            OptionKey::CancellationReason => "cancellation_reason",
            OptionKey::RefundReason => "refund_reason",
            OptionKey::FailureReason => "failure_reason",
            OptionKey::ReauthorizedFrom => "reauthorized_from",
        };
        f.write_str(name)
    }
}

/// Raw payloads exchanged with the gateway, kept for later inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub operation: String,
    pub at: DateTime<Utc>,
    pub request: serde_json::Value,
    pub response: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionOptions {
    #[serde(default)]
    values: BTreeMap<OptionKey, String>,
    #[serde(default)]
    audit: Vec<AuditEntry>,
}

impl TransactionOptions {
    pub fn get(&self, key: OptionKey) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    pub fn set(&mut self, key: OptionKey, value: impl Into<String>) {
        self.values.insert(key, value.into());
    }

    /// Sets the key only when a value is present; never clears an existing one.
    pub fn set_opt(&mut self, key: OptionKey, value: Option<impl Into<String>>) {
        if let Some(value) = value {
            self.set(key, value);
        }
    }

    pub fn remove(&mut self, key: OptionKey) -> Option<String> {
        self.values.remove(&key)
    }

    pub fn contains(&self, key: OptionKey) -> bool {
        self.values.contains_key(&key)
    }

    pub fn record(
        &mut self,
        operation: impl Into<String>,
        request: serde_json::Value,
        response: serde_json::Value,
    ) {
        self.audit.push(AuditEntry {
            operation: operation.into(),
            at: Utc::now(),
            request,
            response,
        });
    }

    pub fn audit(&self) -> &[AuditEntry] {
        &self.audit
    }

    /// Copies the correlation keys that identify the customer and the stored card.
    pub fn inherit_payment_source(&mut self, other: &TransactionOptions) {
        for key in [OptionKey::CustomerId, OptionKey::PaymentMethodId] {
            if let Some(value) = other.get(key) {
                self.set(key, value);
            }
        }
    }
}

/// The order (or sub-order) a transaction pays for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: String,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// One row of the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: TransactionId,
    pub action: ActionKind,
    /// Gateway identifier, absent while the operation is in flight.
    pub reference: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub successful: bool,
    pub active: bool,
    pub parent: Option<TransactionId>,
    /// Identifier of the gateway configuration that owns this transaction.
    pub payment_method: String,
    pub entity: EntityRef,
    #[serde(default)]
    pub options: TransactionOptions,
    pub created_at: DateTime<Utc>,
}

impl PaymentTransaction {
    pub fn new(
        action: ActionKind,
        amount: Decimal,
        currency: impl Into<String>,
        payment_method: impl Into<String>,
        entity: EntityRef,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            action,
            reference: None,
            amount,
            currency: currency.into(),
            successful: false,
            active: true,
            parent: None,
            payment_method: payment_method.into(),
            entity,
            options: TransactionOptions::default(),
            created_at: Utc::now(),
        }
    }

    /// A fresh child of `parent` inheriting its entity linkage, money and payment source.
    pub fn child_of(parent: &PaymentTransaction, action: ActionKind) -> Self {
        let mut child = Self::new(
            action,
            parent.amount,
            parent.currency.clone(),
            parent.payment_method.clone(),
            parent.entity.clone(),
        );
        child.parent = Some(parent.id);
        child.options.inherit_payment_source(&parent.options);
        child
    }

    /// Active, unconfirmed and without a gateway reference: an operation is pending.
    pub fn is_in_flight(&self) -> bool {
        self.active && !self.successful && self.reference.is_none()
    }

    /// `successful` only ever moves from false to true.
    pub fn mark_successful(&mut self) {
        self.successful = true;
    }

    /// Records a failure. Returns false, leaving the flag untouched, when the
    /// transaction was already confirmed by an earlier signal.
    pub fn mark_failed(&mut self, reason: Option<&str>) -> bool {
        self.options.set_opt(OptionKey::FailureReason, reason);
        if self.successful {
            return false;
        }
        self.active = false;
        true
    }

    /// Carries a confirmation already held by `stored` over to this copy of the
    /// same row: `successful` stays true and the stored reference wins. A copy
    /// that never saw the confirmation also takes the confirmed money.
    pub fn keep_confirmation(&mut self, stored: &PaymentTransaction) {
        if !stored.successful {
            return;
        }
        if !self.successful {
            self.amount = stored.amount;
            self.currency = stored.currency.clone();
        }
        self.successful = true;
        if stored.reference.is_some() {
            self.reference = stored.reference.clone();
        }
    }

    pub fn require_option(&self, key: OptionKey) -> Result<&str> {
        self.options
            .get(key)
            .ok_or(ReconcileError::MissingOption { id: self.id, key })
    }

    /// Validates that this transaction can be the parent of `action`.
    pub fn ensure_parent_of(&self, action: ActionKind) -> Result<()> {
        match action.required_parent() {
            Some(expected) if !expected.contains(&self.action) => {
                Err(ReconcileError::InvalidParent {
                    id: self.id,
                    actual: self.action,
                    expected,
                })
            }
            _ => Ok(()),
        }
    }
}

/// Criteria identifying "the same" child of a parent across repeated signals.
///
/// A reference hint also matches an in-flight child, so a repeated API call
/// lands on the row an earlier call is holding. An exact reference hint does
/// not: it is for signals that carry a gateway id of their own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchHints {
    pub reference: Option<String>,
    pub entity: Option<EntityRef>,
    pub any: bool,
    pub exact: bool,
}

impl MatchHints {
    pub fn reference(reference: impl Into<String>) -> Self {
        Self {
            reference: Some(reference.into()),
            ..Self::default()
        }
    }

    pub fn exact_reference(reference: impl Into<String>) -> Self {
        Self {
            reference: Some(reference.into()),
            exact: true,
            ..Self::default()
        }
    }

    pub fn entity(entity: EntityRef) -> Self {
        Self {
            entity: Some(entity),
            ..Self::default()
        }
    }

    pub fn in_flight() -> Self {
        Self::default()
    }

    pub fn any() -> Self {
        Self {
            any: true,
            ..Self::default()
        }
    }

    pub fn matches(
        &self,
        parent: TransactionId,
        action: ActionKind,
        tx: &PaymentTransaction,
    ) -> bool {
        if tx.parent != Some(parent) || tx.action != action {
            return false;
        }
        if let Some(entity) = &self.entity
            && &tx.entity != entity
        {
            return false;
        }
        if self.any {
            return true;
        }
        match &self.reference {
            Some(reference) => {
                tx.reference.as_deref() == Some(reference) || (!self.exact && tx.is_in_flight())
            }
            None if self.entity.is_some() => true,
            None => tx.is_in_flight(),
        }
    }
}

/// Sum of confirmed refunds among `children`, used only as an advisory running total.
pub fn refunded_total<'a>(children: impl IntoIterator<Item = &'a PaymentTransaction>) -> Decimal {
    children
        .into_iter()
        .filter(|tx| tx.action == ActionKind::Refund && tx.successful)
        .map(|tx| tx.amount)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn authorize() -> PaymentTransaction {
        let mut tx = PaymentTransaction::new(
            ActionKind::Authorize,
            dec!(100.00),
            "USD",
            "stripe_1",
            EntityRef::new("order", "42"),
        );
        tx.reference = Some("pi_1".to_string());
        tx.successful = true;
        tx.options.set(OptionKey::CustomerId, "cus_1");
        tx
    }

    #[test]
    fn test_child_inherits_linkage() {
        let parent = authorize();
        let child = PaymentTransaction::child_of(&parent, ActionKind::Capture);
        assert_eq!(child.parent, Some(parent.id));
        assert_eq!(child.entity, parent.entity);
        assert_eq!(child.amount, dec!(100.00));
        assert!(child.active);
        assert!(!child.successful);
        assert!(child.is_in_flight());
        assert_eq!(child.options.get(OptionKey::CustomerId), Some("cus_1"));
    }

    #[test]
    fn test_success_is_monotonic() {
        let mut tx = authorize();
        assert!(!tx.mark_failed(Some("late failure")));
        assert!(tx.successful);
        assert_eq!(tx.options.get(OptionKey::FailureReason), Some("late failure"));
    }

    #[test]
    fn test_parent_validation() {
        let parent = authorize();
        assert!(parent.ensure_parent_of(ActionKind::Capture).is_ok());
        assert!(parent.ensure_parent_of(ActionKind::Cancel).is_ok());
        assert!(matches!(
            parent.ensure_parent_of(ActionKind::Refund),
            Err(ReconcileError::InvalidParent { .. })
        ));
    }

    #[test]
    fn test_match_hints() {
        let parent = authorize();
        let mut child = PaymentTransaction::child_of(&parent, ActionKind::Capture);

        // In flight: matched by reference hints and by the in-flight hint.
        assert!(MatchHints::reference("pi_1").matches(parent.id, ActionKind::Capture, &child));
        assert!(MatchHints::in_flight().matches(parent.id, ActionKind::Capture, &child));
        assert!(!MatchHints::in_flight().matches(parent.id, ActionKind::Cancel, &child));

        child.reference = Some("pi_1".to_string());
        child.successful = true;
        child.active = false;
        assert!(MatchHints::reference("pi_1").matches(parent.id, ActionKind::Capture, &child));
        assert!(!MatchHints::reference("pi_2").matches(parent.id, ActionKind::Capture, &child));
        assert!(!MatchHints::in_flight().matches(parent.id, ActionKind::Capture, &child));
        assert!(MatchHints::any().matches(parent.id, ActionKind::Capture, &child));
        assert!(!MatchHints::entity(EntityRef::new("order", "7")).matches(
            parent.id,
            ActionKind::Capture,
            &child
        ));
    }

    #[test]
    fn test_exact_reference_skips_in_flight_rows() {
        let parent = authorize();
        let mut child = PaymentTransaction::child_of(&parent, ActionKind::Refund);
        let hints = MatchHints::exact_reference("re_1");
        assert!(!hints.matches(parent.id, ActionKind::Refund, &child));

        child.reference = Some("re_1".to_string());
        assert!(hints.matches(parent.id, ActionKind::Refund, &child));
    }

    #[test]
    fn test_keep_confirmation() {
        let parent = authorize();
        let mut stored = PaymentTransaction::child_of(&parent, ActionKind::Capture);
        let mut stale = stored.clone();

        stale.mark_failed(Some("already captured"));
        stored.amount = dec!(60.00);
        stale.keep_confirmation(&stored);
        assert!(!stale.successful);

        stored.reference = Some("pi_1".to_string());
        stored.mark_successful();
        stale.keep_confirmation(&stored);
        assert!(stale.successful);
        assert_eq!(stale.reference.as_deref(), Some("pi_1"));
        assert_eq!(stale.amount, dec!(60.00));
        assert!(!stale.active);
    }

    #[test]
    fn test_refunded_total_counts_successful_refunds_only() {
        let parent = authorize();
        let mut a = PaymentTransaction::child_of(&parent, ActionKind::Refund);
        a.amount = dec!(30);
        a.successful = true;
        let mut b = PaymentTransaction::child_of(&parent, ActionKind::Refund);
        b.amount = dec!(50);
        assert_eq!(refunded_total([&a, &b]), dec!(30));
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("refund".parse::<ActionKind>().unwrap(), ActionKind::Refund);
        assert!(matches!(
            "void".parse::<ActionKind>(),
            Err(ReconcileError::UnsupportedAction(_))
        ));
    }
}
