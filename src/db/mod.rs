//! Database module for netpulse.
//!
//! Provides SQLite storage with an embedded migration. One row per unique
//! collection timestamp; endpoint-result collections are stored as JSON text
//! columns so the configured target set can change without a schema
//! migration.

mod models;
mod store;

pub use models::*;
pub use store::*;
