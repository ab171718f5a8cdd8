pub mod event_reader;
pub mod snapshot;
