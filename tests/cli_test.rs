use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use chrono::{Duration, Utc};
use payment_reconciler::domain::transaction::{
    ActionKind, EntityRef, OptionKey, PaymentTransaction,
};
use predicates::prelude::*;
use rust_decimal_macros::dec;
use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

fn hold(reference: &str, age_hours: i64) -> PaymentTransaction {
    let mut tx = PaymentTransaction::new(
        ActionKind::Authorize,
        dec!(100.00),
        "USD",
        "stripe_1",
        EntityRef::new("order", "1"),
    );
    tx.reference = Some(reference.to_string());
    tx.successful = true;
    tx.options.set(OptionKey::PaymentIntentId, reference);
    tx.options.set(OptionKey::CustomerId, "cus_1");
    tx.options.set(OptionKey::PaymentMethodId, "pm_card_visa");
    tx.created_at = Utc::now() - Duration::hours(age_hours);
    tx
}

fn snapshot(ledger: &[PaymentTransaction]) -> NamedTempFile {
    let file = NamedTempFile::new().unwrap();
    serde_json::to_writer(file.as_file(), ledger).unwrap();
    file
}

#[test]
fn test_replay_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let authorize = hold("pi_1", 1);
    let ledger = snapshot(std::slice::from_ref(&authorize));

    let mut events = NamedTempFile::new()?;
    writeln!(
        events,
        r#"{{"id":"evt_1","type":"payment_intent.succeeded","data":{{"object":{{"id":"pi_1","object":"payment_intent","status":"succeeded","amount":10000,"currency":"usd"}}}}}}"#
    )?;
    writeln!(events)?;
    writeln!(events, "{{not json")?;
    writeln!(
        events,
        r#"{{"id":"evt_2","type":"payment_intent.succeeded","data":{{"object":{{"id":"pi_1","object":"payment_intent","status":"succeeded","amount":10000,"currency":"usd"}}}}}}"#
    )?;

    let mut cmd = Command::new(cargo_bin!("payment-reconciler"));
    cmd.arg("replay")
        .arg(events.path())
        .arg("--ledger")
        .arg(ledger.path());

    let output = cmd.assert().success().get_output().stdout.clone();
    let stdout = String::from_utf8(output)?;
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines[0],
        "id,parent,action,reference,amount,currency,successful,active"
    );
    assert_eq!(
        lines[1],
        format!("{},,authorize,pi_1,100.00,USD,true,false", authorize.id)
    );
    // Both deliveries of the same event land on one capture row.
    assert_eq!(lines.len(), 3);
    assert!(lines[2].ends_with(&format!(",{},capture,pi_1,100.00,USD,true,false", authorize.id)));

    Ok(())
}

#[test]
fn test_replay_reports_malformed_lines() {
    let mut events = NamedTempFile::new().unwrap();
    writeln!(events, "{{not json").unwrap();

    let mut cmd = Command::new(cargo_bin!("payment-reconciler"));
    cmd.arg("replay").arg(events.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "id,parent,action,reference,amount,currency,successful,active",
        ))
        .stderr(predicate::str::contains("skipping malformed event"));
}

#[test]
fn test_replay_missing_events_file_fails() {
    let mut cmd = Command::new(cargo_bin!("payment-reconciler"));
    cmd.arg("replay").arg("does/not/exist.jsonl");

    cmd.assert().failure();
}

#[test]
fn test_plan_reauthorization_prints_chunks() -> Result<(), Box<dyn std::error::Error>> {
    let due = hold("pi_due", 150);
    let fresh = hold("pi_fresh", 2);
    let ledger = snapshot(&[due.clone(), fresh.clone()]);

    let mut cmd = Command::new(cargo_bin!("payment-reconciler"));
    cmd.arg("--chunk-size")
        .arg("5")
        .arg("plan-reauthorization")
        .arg("--ledger")
        .arg(ledger.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(r#""kind":"chunk""#))
        .stdout(predicate::str::contains(due.id.to_string()))
        .stdout(predicate::str::contains(fresh.id.to_string()).not());

    Ok(())
}

#[test]
fn test_out_of_range_reauthorization_age_is_rejected() {
    let ledger = snapshot(&[hold("pi_due", 150)]);

    let mut cmd = Command::new(cargo_bin!("payment-reconciler"));
    cmd.env("RECONCILER_REAUTH_MIN_AGE_HOURS", i64::MAX.to_string())
        .arg("plan-reauthorization")
        .arg("--ledger")
        .arg(ledger.path());

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("reauth_min_age_hours"));
}
