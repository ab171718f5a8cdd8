//! File formats the CLI speaks.

pub mod csv;
pub mod json;
