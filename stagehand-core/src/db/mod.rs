//! Local injection ledger
//!
//! SQLite storage for inject runs and their per-record results, so a later
//! `verify` can check a run against the device without re-injecting.

pub mod repo;
pub mod schema;

pub use repo::{Database, RunRecord};
