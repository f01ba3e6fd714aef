//! Client-side collector agent: upload with bounded retry and durable
//! buffering.
//!
//! The server delivers at-least-once semantics through its duplicate
//! rejection, so the agent treats a 409 exactly like a 200: the batch is
//! already persisted and must not be re-buffered. Only transient failures
//! (5xx, network errors, timeouts) are retried and, on exhaustion, spooled
//! to disk for the next cycle.

pub mod buffer;

pub use buffer::{BufferError, SpoolBuffer};

use async_trait::async_trait;
use std::time::Duration;

use crate::db::MetricBatchEntry;

/// Default retry schedule: 3 attempts, 2s base delay, doubling.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Server verdict for one submission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// 200: the batch was persisted.
    Delivered(usize),
    /// 409: every timestamp already exists server-side.
    AlreadyDelivered,
    /// 4xx: the batch is malformed and will never be accepted.
    Rejected(String),
    /// 5xx or network failure: worth retrying.
    Transient(String),
}

/// Transport seam between the agent and the upload endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn submit(&self, batch: &[MetricBatchEntry]) -> Outcome;
}

/// HTTP transport against a netpulse `/upload` endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn submit(&self, batch: &[MetricBatchEntry]) -> Outcome {
        let response = match self.client.post(&self.endpoint).json(batch).send().await {
            Ok(r) => r,
            Err(e) => return Outcome::Transient(e.to_string()),
        };

        let status = response.status();
        match status.as_u16() {
            200 => Outcome::Delivered(batch.len()),
            409 => Outcome::AlreadyDelivered,
            400..=499 => {
                let body = response.text().await.unwrap_or_default();
                Outcome::Rejected(format!("{}: {}", status, body))
            }
            _ => Outcome::Transient(format!("server returned {}", status)),
        }
    }
}

/// Final disposition of a batch after one delivery cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryReport {
    Delivered,
    AlreadyDelivered,
    /// Permanently rejected; the batch is dropped.
    Discarded(String),
    /// Retries exhausted; the batch is spooled for the next cycle.
    Buffered(String),
}

/// Upload agent with bounded exponential backoff and a durable spool.
pub struct Agent<T: Transport> {
    transport: T,
    spool: SpoolBuffer,
    max_attempts: u32,
    base_delay: Duration,
}

/// Delay before retry `attempt` (1-based): base, 2*base, 4*base, ...
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow(attempt.saturating_sub(1))
}

impl<T: Transport> Agent<T> {
    pub fn new(transport: T, spool: SpoolBuffer) -> Self {
        Self {
            transport,
            spool,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }

    pub fn with_retry(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.base_delay = base_delay;
        self
    }

    /// Deliver a freshly collected batch. Spooled batches from earlier
    /// cycles are replayed first so the store fills in collection order.
    pub async fn deliver(&self, batch: &[MetricBatchEntry]) -> Result<DeliveryReport, BufferError> {
        self.flush_spool().await?;

        let report = self.attempt_with_retry(batch).await;
        if let DeliveryReport::Buffered(reason) = &report {
            let path = self.spool.store(batch)?;
            tracing::warn!(
                reason = %reason,
                path = %path.display(),
                "upload retries exhausted, batch spooled"
            );
        }
        Ok(report)
    }

    /// Replay spooled batches oldest-first. Stops at the first transient
    /// failure since the server is likely still unreachable.
    pub async fn flush_spool(&self) -> Result<usize, BufferError> {
        let mut delivered = 0;
        for (path, batch) in self.spool.drain()? {
            match self.attempt_with_retry(&batch).await {
                DeliveryReport::Delivered | DeliveryReport::AlreadyDelivered => {
                    self.spool.remove(&path)?;
                    delivered += 1;
                }
                DeliveryReport::Discarded(reason) => {
                    tracing::warn!(reason = %reason, path = %path.display(), "dropping rejected spooled batch");
                    self.spool.remove(&path)?;
                }
                DeliveryReport::Buffered(_) => break,
            }
        }
        Ok(delivered)
    }

    async fn attempt_with_retry(&self, batch: &[MetricBatchEntry]) -> DeliveryReport {
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            match self.transport.submit(batch).await {
                Outcome::Delivered(_) => return DeliveryReport::Delivered,
                Outcome::AlreadyDelivered => return DeliveryReport::AlreadyDelivered,
                Outcome::Rejected(reason) => return DeliveryReport::Discarded(reason),
                Outcome::Transient(reason) => {
                    tracing::warn!(attempt, reason = %reason, "upload attempt failed");
                    last_error = reason;
                    if attempt < self.max_attempts {
                        tokio::time::sleep(backoff_delay(self.base_delay, attempt)).await;
                    }
                }
            }
        }

        DeliveryReport::Buffered(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn entry(ts: &str) -> MetricBatchEntry {
        serde_json::from_str(&format!(
            r#"{{"timestamp": "{}", "networkQuality": {{}}, "speedtest": {{}}}}"#,
            ts
        ))
        .unwrap()
    }

    /// Replays a scripted sequence of outcomes, repeating the last one.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Outcome>>,
        last: Outcome,
        attempts: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Outcome>, last: Outcome) -> Self {
            Self {
                script: Mutex::new(script.into()),
                last,
                attempts: AtomicUsize::new(0),
            }
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn submit(&self, _batch: &[MetricBatchEntry]) -> Outcome {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.last.clone())
        }
    }

    fn agent(transport: ScriptedTransport, dir: &std::path::Path) -> Agent<ScriptedTransport> {
        Agent::new(transport, SpoolBuffer::new(dir).unwrap())
            .with_retry(DEFAULT_MAX_ATTEMPTS, Duration::ZERO)
    }

    #[test]
    fn test_backoff_schedule_doubles() {
        let base = Duration::from_secs(2);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_transient_then_success_retries() {
        let dir = tempdir().unwrap();
        let transport = ScriptedTransport::new(
            vec![Outcome::Transient("503".into())],
            Outcome::Delivered(1),
        );
        let agent = agent(transport, dir.path());

        let report = agent.deliver(&[entry("2025-01-01T00:00:00Z")]).await.unwrap();
        assert_eq!(report, DeliveryReport::Delivered);
        assert_eq!(agent.transport.attempts(), 2);
        assert_eq!(agent.spool.len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_is_success_not_rebuffered() {
        let dir = tempdir().unwrap();
        let transport = ScriptedTransport::new(vec![], Outcome::AlreadyDelivered);
        let agent = agent(transport, dir.path());

        let report = agent.deliver(&[entry("2025-01-01T00:00:00Z")]).await.unwrap();
        assert_eq!(report, DeliveryReport::AlreadyDelivered);
        assert_eq!(agent.transport.attempts(), 1);
        assert_eq!(agent.spool.len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejection_discards_without_retry() {
        let dir = tempdir().unwrap();
        let transport = ScriptedTransport::new(vec![], Outcome::Rejected("400".into()));
        let agent = agent(transport, dir.path());

        let report = agent.deliver(&[entry("2025-01-01T00:00:00Z")]).await.unwrap();
        assert!(matches!(report, DeliveryReport::Discarded(_)));
        assert_eq!(agent.transport.attempts(), 1);
        assert_eq!(agent.spool.len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_spool_the_batch() {
        let dir = tempdir().unwrap();
        let transport = ScriptedTransport::new(vec![], Outcome::Transient("down".into()));
        let agent = agent(transport, dir.path());

        let report = agent.deliver(&[entry("2025-01-01T00:00:00Z")]).await.unwrap();
        assert!(matches!(report, DeliveryReport::Buffered(_)));
        assert_eq!(agent.transport.attempts(), DEFAULT_MAX_ATTEMPTS as usize);
        assert_eq!(agent.spool.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_spool_flushed_before_new_delivery() {
        let dir = tempdir().unwrap();
        let spool = SpoolBuffer::new(dir.path()).unwrap();
        spool.store(&[entry("2025-01-01T00:00:00Z")]).unwrap();

        let transport = ScriptedTransport::new(vec![], Outcome::Delivered(1));
        let agent = Agent::new(transport, SpoolBuffer::new(dir.path()).unwrap())
            .with_retry(DEFAULT_MAX_ATTEMPTS, Duration::ZERO);

        let report = agent.deliver(&[entry("2025-01-02T00:00:00Z")]).await.unwrap();
        assert_eq!(report, DeliveryReport::Delivered);
        // One attempt for the spooled batch, one for the fresh one.
        assert_eq!(agent.transport.attempts(), 2);
        assert_eq!(agent.spool.len().unwrap(), 0);
    }
}
