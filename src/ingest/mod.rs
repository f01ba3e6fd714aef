//! Ingestion pipeline: validate, duplicate-check, atomically persist.
//!
//! The pipeline is request-scoped and stateless; isolation between
//! concurrent uploads comes from the storage layer's transaction and unique
//! index, not from in-process locks.

pub mod dedupe;
pub mod validate;

pub use validate::BatchError;

use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;

use crate::config::ServerConfig;
use crate::db::{DbError, Store};

/// Ingestion failure taxonomy.
///
/// `Duplicate` and `CommitRace` both mean "already delivered" to the
/// collector; `CommitRace` covers the window where two concurrent uploads of
/// the same timestamp both pass the pre-commit check and one loses at the
/// unique index.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error("{count} duplicate timestamps in batch")]
    Duplicate { count: usize },
    #[error("duplicate timestamp detected at commit")]
    CommitRace,
    #[error(transparent)]
    Storage(#[from] DbError),
}

/// Outcome of a successfully ingested batch.
#[derive(Debug, Clone, Copy)]
pub struct IngestReceipt {
    pub inserted: usize,
}

/// Drives one upload through validation, the idempotency guard, and the
/// atomic commit.
#[derive(Clone)]
pub struct IngestPipeline {
    store: Store,
    max_batch_size: usize,
    storage_timeout: Duration,
}

impl IngestPipeline {
    pub fn new(store: Store, cfg: &ServerConfig) -> Self {
        Self {
            store,
            max_batch_size: cfg.max_batch_size,
            storage_timeout: cfg.storage_timeout,
        }
    }

    /// Ingest one decoded upload body.
    ///
    /// Either every entry in the batch is persisted or none is.
    pub async fn ingest(
        &self,
        raw: &Value,
        request_id: &str,
    ) -> Result<IngestReceipt, IngestError> {
        let entries = validate::parse_batch(raw, self.max_batch_size, Utc::now())?;

        let duplicates =
            dedupe::find_duplicates(&self.store, &entries, self.storage_timeout).await?;
        if !duplicates.is_empty() {
            tracing::info!(
                request_id = %request_id,
                count = duplicates.len(),
                "rejecting batch: duplicate timestamps"
            );
            return Err(IngestError::Duplicate {
                count: duplicates.len(),
            });
        }

        let store = self.store.clone();
        let batch = entries;
        let inserted = tokio::time::timeout(
            self.storage_timeout,
            tokio::task::spawn_blocking(move || store.insert_batch(&batch)),
        )
        .await
        .map_err(|_| IngestError::Storage(DbError::Timeout))?
        .map_err(|e| IngestError::Storage(DbError::Unavailable(e.to_string())))?
        .map_err(|e| match e {
            DbError::Constraint => IngestError::CommitRace,
            other => IngestError::Storage(other),
        })?;

        tracing::info!(request_id = %request_id, inserted, "batch persisted");
        Ok(IngestReceipt { inserted })
    }
}
