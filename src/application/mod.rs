//! Application layer orchestrating the reconciliation engine.
//!
//! Two producers feed the same ledger: the action dispatcher (checkout and API
//! calls) and the webhook router (gateway notifications). Both create rows only
//! through [`reconciliation::ReconciliationService`]. The re-authorization job
//! runs on top of the same executors.

pub mod dispatcher;
pub mod engine;
pub mod executors;
pub mod reauthorization;
pub mod reconciliation;
pub mod webhook_router;
