//! Idempotency guard: duplicate-timestamp detection ahead of commit.
//!
//! The collector delivers at-least-once, so an already-persisted timestamp
//! is the expected collision mode, not an anomaly. Lookups are independent
//! reads and fan out concurrently; the whole check runs under the storage
//! timeout.

use std::collections::HashSet;
use std::time::Duration;

use crate::db::{DbError, MetricBatchEntry, Store};

/// Return the storage keys of batch entries that are already persisted or
/// that collide within the batch itself.
pub async fn find_duplicates(
    store: &Store,
    entries: &[MetricBatchEntry],
    timeout: Duration,
) -> Result<Vec<String>, DbError> {
    let mut duplicates = Vec::new();
    let mut seen = HashSet::new();
    let mut unique_keys = Vec::new();

    for entry in entries {
        let key = entry.storage_key();
        if seen.insert(key.clone()) {
            unique_keys.push(key);
        } else {
            duplicates.push(key);
        }
    }

    let handles: Vec<_> = unique_keys
        .into_iter()
        .map(|key| {
            let store = store.clone();
            tokio::task::spawn_blocking(move || {
                store.timestamp_exists(&key).map(|exists| (key, exists))
            })
        })
        .collect();

    let joined = tokio::time::timeout(timeout, async {
        let mut hits = Vec::new();
        for handle in handles {
            let (key, exists) = handle
                .await
                .map_err(|e| DbError::Unavailable(e.to_string()))??;
            if exists {
                hits.push(key);
            }
        }
        Ok::<_, DbError>(hits)
    })
    .await
    .map_err(|_| DbError::Timeout)??;

    duplicates.extend(joined);
    duplicates.sort();
    Ok(duplicates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn entry(ts: &str) -> MetricBatchEntry {
        serde_json::from_str(&format!(
            r#"{{"timestamp": "{}", "networkQuality": {{}}, "speedtest": {{}}}}"#,
            ts
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_no_duplicates_on_fresh_batch() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();

        let batch = vec![entry("2025-01-01T00:00:00Z"), entry("2025-01-02T00:00:00Z")];
        let dupes = find_duplicates(&store, &batch, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(dupes.is_empty());
    }

    #[tokio::test]
    async fn test_persisted_timestamp_detected() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        store.insert_batch(&[entry("2025-01-01T00:00:00Z")]).unwrap();

        let batch = vec![entry("2025-01-01T00:00:00Z"), entry("2025-01-02T00:00:00Z")];
        let dupes = find_duplicates(&store, &batch, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(dupes, vec!["2025-01-01T00:00:00.000Z".to_string()]);
    }

    #[tokio::test]
    async fn test_intra_batch_collision_detected() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();

        let batch = vec![entry("2025-01-01T00:00:00Z"), entry("2025-01-01T00:00:00Z")];
        let dupes = find_duplicates(&store, &batch, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(dupes.len(), 1);
    }

    #[tokio::test]
    async fn test_offset_and_utc_forms_collide() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        store.insert_batch(&[entry("2025-01-01T00:00:00Z")]).unwrap();

        // Same instant, different client formatting.
        let batch = vec![entry("2025-01-01T01:00:00+01:00")];
        let dupes = find_duplicates(&store, &batch, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(dupes.len(), 1);
    }
}
