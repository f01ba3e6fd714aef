//! HTTP request handlers.
//!
//! Every response carries the request correlation id (client-supplied
//! `X-Request-Id` or generated here) in both the body and a response header.
//! The id is threaded explicitly through component calls, never stored
//! globally.

use super::AppState;
use crate::db::{DbError, SCHEMA_VERSION};
use crate::ingest::{BatchError, IngestError};
use crate::query::CacheStatus;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Instant;

const REQUEST_ID_HEADER: &str = "x-request-id";
const CACHE_HEADER: &str = "x-cache";

// ============================================================================
// Response shapes
// ============================================================================

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub inserted: usize,
    pub duration_ms: i64,
    pub request_id: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
    pub request_id: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub schema_version: i32,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub database: String,
}

/// Pull the correlation id from the request, or mint one.
fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .unwrap_or_else(|| format!("{:016x}", rand::random::<u64>()))
}

fn error_response(
    status: StatusCode,
    error: String,
    details: Option<Vec<String>>,
    request_id: String,
) -> Response {
    let body = ErrorBody {
        error,
        details,
        request_id: request_id.clone(),
        timestamp: Utc::now().to_rfc3339(),
    };
    (status, [(REQUEST_ID_HEADER, request_id)], Json(body)).into_response()
}

// ============================================================================
// Ingress: POST /upload
// ============================================================================

pub async fn handle_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = request_id(&headers);
    let started = Instant::now();

    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false);
    if !is_json {
        return error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "content type must be application/json".to_string(),
            None,
            request_id,
        );
    }

    let raw: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("invalid JSON body: {}", e),
                None,
                request_id,
            );
        }
    };

    match state.pipeline.ingest(&raw, &request_id).await {
        Ok(receipt) => {
            let response = UploadResponse {
                success: true,
                inserted: receipt.inserted,
                duration_ms: started.elapsed().as_millis() as i64,
                request_id: request_id.clone(),
                timestamp: Utc::now().to_rfc3339(),
            };
            (
                StatusCode::OK,
                [(REQUEST_ID_HEADER, request_id)],
                Json(response),
            )
                .into_response()
        }
        Err(e) => ingest_error_response(e, request_id),
    }
}

fn ingest_error_response(err: IngestError, request_id: String) -> Response {
    match err {
        IngestError::Batch(batch_err) => {
            let details = match &batch_err {
                BatchError::InvalidEntries { details, .. } => Some(details.clone()),
                _ => None,
            };
            error_response(StatusCode::BAD_REQUEST, batch_err.to_string(), details, request_id)
        }
        IngestError::Duplicate { .. } | IngestError::CommitRace => {
            error_response(StatusCode::CONFLICT, err.to_string(), None, request_id)
        }
        IngestError::Storage(db_err) => {
            tracing::error!(request_id = %request_id, error = %db_err, "storage failure during ingest");
            let message = if db_err.is_transient() {
                "storage temporarily unavailable, retry later".to_string()
            } else {
                "internal storage error".to_string()
            };
            error_response(StatusCode::INTERNAL_SERVER_ERROR, message, None, request_id)
        }
    }
}

// ============================================================================
// Egress: GET /api/logs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<String>,
}

pub async fn handle_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
    headers: HeaderMap,
) -> Response {
    let request_id = request_id(&headers);

    // Parsed by hand so a non-numeric value is a 400 while out-of-range
    // numbers are clamped.
    let requested = match query.limit.as_deref() {
        None => None,
        Some(raw) => match raw.parse::<i64>() {
            Ok(n) => Some(n),
            Err(_) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("limit must be an integer, got {:?}", raw),
                    None,
                    request_id,
                );
            }
        },
    };

    let limit = state.query.clamp_limit(requested);
    match state.query.recent(limit).await {
        Ok((rows, cache_status)) => {
            let cache = match cache_status {
                CacheStatus::Hit => "HIT",
                CacheStatus::Miss => "MISS",
            };
            (
                StatusCode::OK,
                [(CACHE_HEADER, cache.to_string()), (REQUEST_ID_HEADER, request_id)],
                Json(&*rows),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "log query failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal storage error".to_string(),
                None,
                request_id,
            )
        }
    }
}

// ============================================================================
// Liveness: GET /health
// ============================================================================

pub async fn handle_health(State(state): State<AppState>) -> Response {
    let store = state.store.clone();
    let db_healthy = tokio::time::timeout(
        state.config.storage_timeout,
        tokio::task::spawn_blocking(move || store.health_check()),
    )
    .await
    .map_err(|_| DbError::Timeout)
    .and_then(|join| join.map_err(|e| DbError::Unavailable(e.to_string())))
    .map(|inner| inner.is_ok())
    .unwrap_or(false);

    let status = if db_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = HealthResponse {
        status: if db_healthy { "ok" } else { "unhealthy" }.to_string(),
        timestamp: Utc::now().to_rfc3339(),
        schema_version: SCHEMA_VERSION,
        checks: HealthChecks {
            database: if db_healthy { "healthy" } else { "unhealthy" }.to_string(),
        },
    };

    (status, Json(body)).into_response()
}
