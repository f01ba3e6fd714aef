//! Batch validation engine.
//!
//! A pure function over the decoded JSON payload: it either produces a fully
//! typed batch or a structured rejection. No telemetry, no storage access.
//! The policy is all-or-nothing per batch: a single invalid entry rejects
//! the whole upload, which keeps the collector's retry logic free of
//! partial-success ambiguity.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::db::{CurlResult, DnsResult, MetricBatchEntry, MtrResult, PingResult};

/// Oldest accepted entry age.
const MAX_AGE_DAYS: i64 = 365;
/// Tolerated client clock skew into the future.
const MAX_SKEW_HOURS: i64 = 1;

/// Structured rejection reasons for an upload batch.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("request body must be a JSON array")]
    NotArray,
    #[error("batch is empty")]
    Empty,
    #[error("batch of {len} entries exceeds maximum of {max}")]
    TooLarge { len: usize, max: usize },
    #[error("{invalid} invalid entries in batch")]
    InvalidEntries { invalid: usize, details: Vec<String> },
}

/// Validate a decoded JSON payload into a typed batch.
///
/// `now` is passed in so the freshness window is testable; callers use
/// `Utc::now()`.
pub fn parse_batch(
    raw: &Value,
    max_batch_size: usize,
    now: DateTime<Utc>,
) -> Result<Vec<MetricBatchEntry>, BatchError> {
    let items = raw.as_array().ok_or(BatchError::NotArray)?;

    if items.is_empty() {
        return Err(BatchError::Empty);
    }
    if items.len() > max_batch_size {
        return Err(BatchError::TooLarge {
            len: items.len(),
            max: max_batch_size,
        });
    }

    let mut entries = Vec::with_capacity(items.len());
    let mut details = Vec::new();
    let mut invalid = 0;

    for (i, item) in items.iter().enumerate() {
        match validate_entry(item, now) {
            Ok(entry) => entries.push(entry),
            Err(errors) => {
                invalid += 1;
                for e in errors {
                    details.push(format!("entry {}: {}", i, e));
                }
            }
        }
    }

    if invalid > 0 {
        return Err(BatchError::InvalidEntries { invalid, details });
    }

    Ok(entries)
}

/// Validate a single entry: structure first (typed decode), then semantics
/// (freshness window and physical ranges).
fn validate_entry(item: &Value, now: DateTime<Utc>) -> Result<MetricBatchEntry, Vec<String>> {
    let entry: MetricBatchEntry =
        serde_json::from_value(item.clone()).map_err(|e| vec![e.to_string()])?;

    let mut errors = Vec::new();

    let oldest = now - Duration::days(MAX_AGE_DAYS);
    let newest = now + Duration::hours(MAX_SKEW_HOURS);
    if entry.timestamp < oldest || entry.timestamp > newest {
        errors.push(format!(
            "timestamp {} outside accepted window [{}, {}]",
            entry.timestamp.to_rfc3339(),
            oldest.to_rfc3339(),
            newest.to_rfc3339()
        ));
    }

    check_non_negative(&mut errors, "networkQuality.download_mbps", entry.network_quality.download_mbps);
    check_non_negative(&mut errors, "networkQuality.upload_mbps", entry.network_quality.upload_mbps);
    check_non_negative(&mut errors, "networkQuality.responsiveness_rpm", entry.network_quality.responsiveness_rpm);

    check_non_negative(&mut errors, "speedtest.download_mbps", entry.speedtest.download_mbps);
    check_non_negative(&mut errors, "speedtest.upload_mbps", entry.speedtest.upload_mbps);
    check_non_negative(&mut errors, "speedtest.responsiveness_rpm", entry.speedtest.responsiveness_rpm);
    check_non_negative(&mut errors, "speedtest.ping_ms", entry.speedtest.ping_ms);

    for (i, r) in entry.ping_results.iter().enumerate() {
        validate_ping(&mut errors, i, r);
    }
    for (i, r) in entry.curl_results.iter().enumerate() {
        validate_curl(&mut errors, i, r);
    }
    for (i, r) in entry.dns_results.iter().enumerate() {
        validate_dns(&mut errors, i, r);
    }
    for (i, r) in entry.mtr_results.iter().enumerate() {
        validate_mtr(&mut errors, i, r);
    }

    if errors.is_empty() {
        Ok(entry)
    } else {
        Err(errors)
    }
}

fn validate_ping(errors: &mut Vec<String>, i: usize, r: &PingResult) {
    check_identity(errors, "pingResults", i, &r.id, &r.name);
    check_percent(errors, &format!("pingResults[{}].packetLossPercent", i), r.packet_loss_percent);
    if let Some(stats) = &r.rtt_stats {
        check_non_negative(errors, &format!("pingResults[{}].rttStats.min", i), stats.min);
        check_non_negative(errors, &format!("pingResults[{}].rttStats.avg", i), stats.avg);
        check_non_negative(errors, &format!("pingResults[{}].rttStats.max", i), stats.max);
        check_non_negative(errors, &format!("pingResults[{}].rttStats.stddev", i), stats.stddev);
    }
}

fn validate_curl(errors: &mut Vec<String>, i: usize, r: &CurlResult) {
    check_identity(errors, "curlResults", i, &r.id, &r.name);
    check_non_negative(errors, &format!("curlResults[{}].dnsLookupSeconds", i), r.dns_lookup_seconds);
    check_non_negative(errors, &format!("curlResults[{}].ttfbSeconds", i), r.ttfb_seconds);
}

fn validate_dns(errors: &mut Vec<String>, i: usize, r: &DnsResult) {
    check_identity(errors, "dnsResults", i, &r.id, &r.name);
    check_non_negative(errors, &format!("dnsResults[{}].queryTimeMs", i), r.query_time_ms);
}

fn validate_mtr(errors: &mut Vec<String>, i: usize, r: &MtrResult) {
    check_identity(errors, "mtrResults", i, &r.id, &r.name);
    for (h, hop) in r.hops.iter().enumerate() {
        let at = format!("mtrResults[{}].hops[{}]", i, h);
        check_percent(errors, &format!("{}.lossPercent", at), hop.loss_percent);
        check_non_negative_i64(errors, &format!("{}.count", at), hop.count);
        check_non_negative_i64(errors, &format!("{}.sent", at), hop.sent);
        check_non_negative(errors, &format!("{}.lastMs", at), hop.last_ms);
        check_non_negative(errors, &format!("{}.avgMs", at), hop.avg_ms);
        check_non_negative(errors, &format!("{}.bestMs", at), hop.best_ms);
        check_non_negative(errors, &format!("{}.worstMs", at), hop.worst_ms);
        check_non_negative(errors, &format!("{}.stddev", at), hop.stddev);
    }
}

fn check_identity(errors: &mut Vec<String>, field: &str, i: usize, id: &str, name: &str) {
    if id.trim().is_empty() {
        errors.push(format!("{}[{}].id must be a non-empty string", field, i));
    }
    if name.trim().is_empty() {
        errors.push(format!("{}[{}].name must be a non-empty string", field, i));
    }
}

fn check_non_negative(errors: &mut Vec<String>, field: &str, value: Option<f64>) {
    if let Some(v) = value {
        if !v.is_finite() || v < 0.0 {
            errors.push(format!("{} must be a non-negative number, got {}", field, v));
        }
    }
}

fn check_non_negative_i64(errors: &mut Vec<String>, field: &str, value: Option<i64>) {
    if let Some(v) = value {
        if v < 0 {
            errors.push(format!("{} must be non-negative, got {}", field, v));
        }
    }
}

fn check_percent(errors: &mut Vec<String>, field: &str, value: Option<f64>) {
    if let Some(v) = value {
        if !v.is_finite() || !(0.0..=100.0).contains(&v) {
            errors.push(format!("{} must be within [0, 100], got {}", field, v));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn valid_entry() -> Value {
        json!({
            "timestamp": now().to_rfc3339(),
            "networkQuality": {"download_mbps": 100.0, "upload_mbps": 20.0, "responsiveness_rpm": 1000.0},
            "speedtest": {},
            "pingResults": [],
            "curlResults": [],
            "dnsResults": [],
            "mtrResults": []
        })
    }

    #[test]
    fn test_valid_batch() {
        let batch = json!([valid_entry()]);
        let entries = parse_batch(&batch, 100, now()).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_non_array_root() {
        assert!(matches!(
            parse_batch(&json!({"a": 1}), 100, now()),
            Err(BatchError::NotArray)
        ));
    }

    #[test]
    fn test_empty_batch() {
        assert!(matches!(
            parse_batch(&json!([]), 100, now()),
            Err(BatchError::Empty)
        ));
    }

    #[test]
    fn test_oversized_batch() {
        let batch = Value::Array(vec![valid_entry(); 101]);
        assert!(matches!(
            parse_batch(&batch, 100, now()),
            Err(BatchError::TooLarge { len: 101, max: 100 })
        ));
    }

    #[test]
    fn test_missing_network_quality_rejected() {
        let mut entry = valid_entry();
        entry.as_object_mut().unwrap().remove("networkQuality");
        let err = parse_batch(&json!([entry]), 100, now()).unwrap_err();
        assert!(matches!(err, BatchError::InvalidEntries { invalid: 1, .. }));
    }

    #[test]
    fn test_unparseable_timestamp_rejected() {
        let mut entry = valid_entry();
        entry["timestamp"] = json!("not-a-time");
        let err = parse_batch(&json!([entry]), 100, now()).unwrap_err();
        assert!(matches!(err, BatchError::InvalidEntries { invalid: 1, .. }));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let mut entry = valid_entry();
        entry["timestamp"] = json!((now() - Duration::days(400)).to_rfc3339());
        assert!(parse_batch(&json!([entry]), 100, now()).is_err());
    }

    #[test]
    fn test_future_timestamp_rejected() {
        let mut entry = valid_entry();
        entry["timestamp"] = json!((now() + Duration::hours(2)).to_rfc3339());
        assert!(parse_batch(&json!([entry]), 100, now()).is_err());
    }

    #[test]
    fn test_slight_future_timestamp_accepted() {
        let mut entry = valid_entry();
        entry["timestamp"] = json!((now() + Duration::minutes(30)).to_rfc3339());
        assert!(parse_batch(&json!([entry]), 100, now()).is_ok());
    }

    #[test]
    fn test_negative_bandwidth_rejected() {
        let mut entry = valid_entry();
        entry["networkQuality"]["download_mbps"] = json!(-5.0);
        let err = parse_batch(&json!([entry]), 100, now()).unwrap_err();
        match err {
            BatchError::InvalidEntries { invalid, details } => {
                assert_eq!(invalid, 1);
                assert!(details[0].contains("download_mbps"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_packet_loss_over_100_rejected() {
        let mut entry = valid_entry();
        entry["pingResults"] = json!([{
            "id": "p1", "name": "Gateway", "host": "192.168.1.1",
            "packetLossPercent": 150.0, "rttStats": null
        }]);
        assert!(parse_batch(&json!([entry]), 100, now()).is_err());
    }

    #[test]
    fn test_empty_endpoint_id_rejected() {
        let mut entry = valid_entry();
        entry["dnsResults"] = json!([{
            "id": "", "name": "Cloudflare", "domain": "example.com",
            "resolver": "1.1.1.1", "queryTimeMs": 12.0
        }]);
        let err = parse_batch(&json!([entry]), 100, now()).unwrap_err();
        match err {
            BatchError::InvalidEntries { details, .. } => {
                assert!(details[0].contains("dnsResults[0].id"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_negative_hop_latency_rejected() {
        let mut entry = valid_entry();
        entry["mtrResults"] = json!([{
            "id": "m1", "name": "Backbone", "host": "example.net",
            "hops": [{"count": 1, "host": "10.0.0.1", "lossPercent": 0.0,
                      "sent": 10, "lastMs": -1.0, "avgMs": 2.0,
                      "bestMs": 1.0, "worstMs": 3.0, "stddev": 0.2}]
        }]);
        assert!(parse_batch(&json!([entry]), 100, now()).is_err());
    }

    #[test]
    fn test_empty_mtr_hops_accepted() {
        let mut entry = valid_entry();
        entry["mtrResults"] = json!([{
            "id": "m1", "name": "Backbone", "host": "example.net", "hops": []
        }]);
        assert!(parse_batch(&json!([entry]), 100, now()).is_ok());
    }

    #[test]
    fn test_one_bad_entry_rejects_whole_batch() {
        let good = valid_entry();
        let mut bad = valid_entry();
        bad["speedtest"]["ping_ms"] = json!(-1.0);
        let err = parse_batch(&json!([good, bad]), 100, now()).unwrap_err();
        match err {
            BatchError::InvalidEntries { invalid, details } => {
                assert_eq!(invalid, 1);
                assert!(details[0].starts_with("entry 1:"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_all_null_measurements_accepted() {
        let entry = json!({
            "timestamp": now().to_rfc3339(),
            "networkQuality": {"download_mbps": null, "upload_mbps": null, "responsiveness_rpm": null},
            "speedtest": {"download_mbps": null, "ping_ms": null},
            "pingResults": [{"id": "p1", "name": "Gateway", "host": null,
                             "packetLossPercent": null, "rttStats": null}]
        });
        assert!(parse_batch(&json!([entry]), 100, now()).is_ok());
    }
}
