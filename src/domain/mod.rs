//! Ledger model, gateway wire types and the ports the application layer depends on.

pub mod config;
pub mod event;
pub mod gateway;
pub mod job;
pub mod money;
pub mod ports;
pub mod transaction;
