//! Wire and storage model types.
//!
//! Field renames match the collector's camelCase wire format; nested
//! measurement fields are nullable because any individual tool run may fail
//! while the rest of the collection cycle succeeds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version tagged onto every persisted row.
pub const SCHEMA_VERSION: i32 = 1;

/// One collection run's result set, keyed by `timestamp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricBatchEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "networkQuality")]
    pub network_quality: NetworkQuality,
    pub speedtest: Speedtest,
    #[serde(rename = "pingResults", default)]
    pub ping_results: Vec<PingResult>,
    #[serde(rename = "curlResults", default)]
    pub curl_results: Vec<CurlResult>,
    #[serde(rename = "dnsResults", default)]
    pub dns_results: Vec<DnsResult>,
    #[serde(rename = "mtrResults", default)]
    pub mtr_results: Vec<MtrResult>,
}

/// `networkQuality` summary metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkQuality {
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
    pub responsiveness_rpm: Option<f64>,
}

/// Speedtest CLI summary metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Speedtest {
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
    pub responsiveness_rpm: Option<f64>,
    pub ping_ms: Option<f64>,
    pub server_location: Option<String>,
    pub server_country: Option<String>,
}

/// Ping round-trip statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RttStats {
    pub min: Option<f64>,
    pub avg: Option<f64>,
    pub max: Option<f64>,
    pub stddev: Option<f64>,
}

/// Per-target ping result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResult {
    pub id: String,
    pub name: String,
    pub host: Option<String>,
    #[serde(rename = "packetLossPercent")]
    pub packet_loss_percent: Option<f64>,
    #[serde(rename = "rttStats")]
    pub rtt_stats: Option<RttStats>,
}

/// Per-target curl timing result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurlResult {
    pub id: String,
    pub name: String,
    pub host: Option<String>,
    #[serde(rename = "dnsLookupSeconds")]
    pub dns_lookup_seconds: Option<f64>,
    #[serde(rename = "ttfbSeconds")]
    pub ttfb_seconds: Option<f64>,
    #[serde(rename = "httpCode")]
    pub http_code: Option<String>,
}

/// Per-resolver DNS query timing result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsResult {
    pub id: String,
    pub name: String,
    pub domain: Option<String>,
    pub resolver: Option<String>,
    #[serde(rename = "queryTimeMs")]
    pub query_time_ms: Option<f64>,
}

/// One hop of an MTR path trace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MtrHop {
    pub count: Option<i64>,
    pub host: Option<String>,
    #[serde(rename = "lossPercent")]
    pub loss_percent: Option<f64>,
    pub sent: Option<i64>,
    #[serde(rename = "lastMs")]
    pub last_ms: Option<f64>,
    #[serde(rename = "avgMs")]
    pub avg_ms: Option<f64>,
    #[serde(rename = "bestMs")]
    pub best_ms: Option<f64>,
    #[serde(rename = "worstMs")]
    pub worst_ms: Option<f64>,
    pub stddev: Option<f64>,
}

/// Per-target MTR result. An empty `hops` sequence signals a failed or
/// skipped trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MtrResult {
    pub id: String,
    pub name: String,
    pub host: Option<String>,
    #[serde(default)]
    pub hops: Vec<MtrHop>,
}

/// A persisted row read back from the store, as served by `/api/logs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    pub timestamp: String,
    pub schema_version: i32,
    #[serde(rename = "networkQuality")]
    pub network_quality: NetworkQuality,
    pub speedtest: Speedtest,
    #[serde(rename = "pingResults")]
    pub ping_results: Vec<PingResult>,
    #[serde(rename = "curlResults")]
    pub curl_results: Vec<CurlResult>,
    #[serde(rename = "dnsResults")]
    pub dns_results: Vec<DnsResult>,
    #[serde(rename = "mtrResults")]
    pub mtr_results: Vec<MtrResult>,
}

impl MetricBatchEntry {
    /// Canonical storage form of the idempotency key: RFC 3339 UTC with
    /// millisecond precision, so lexicographic order matches chronological
    /// order regardless of how the client formatted the instant.
    pub fn storage_key(&self) -> String {
        self.timestamp
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }
}
