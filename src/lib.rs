//! netpulse - network performance measurement ingestion and query service.
//!
//! Accepts batched JSON measurement uploads from client collector agents,
//! validates them, enforces timestamp-keyed idempotency, persists them
//! atomically to SQLite, and serves them back for time-series dashboards.

pub mod collector;
pub mod config;
pub mod db;
pub mod ingest;
pub mod query;
pub mod web;
