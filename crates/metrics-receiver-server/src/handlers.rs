// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP request handlers.

use crate::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use flate2::read::GzDecoder;
use metrics_receiver::IngestError;
use serde::Serialize;
use std::io::Read;
use std::sync::Arc;
use tracing::{error, info};

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: u16,
}

impl ApiError {
    fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: status.as_u16(),
        }
    }

    fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// POST /api/influx/v1/write
pub async fn write(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let payload = decode_body(&headers, &body, state.max_body_bytes)?;

    match state.receiver.ingest(&payload, Utc::now()).await {
        Ok(report) => {
            info!(
                "Processed write request; lines: {}, non-critical errors: {}",
                report.points,
                report.non_critical.len()
            );
            Ok(StatusCode::NO_CONTENT)
        }
        Err(IngestError::Parse(e)) => {
            error!("Failed to parse line protocol request: {}", e);
            Err(ApiError::bad_request(format!(
                "An error occurred while parsing the line protocol request: {}",
                e
            )))
        }
        // Already logged by the receiver
        Err(IngestError::Output(failure)) => Err(ApiError::bad_request(failure.to_string())),
    }
}

/// Decompress (when gzip-encoded) and decode the request body.
fn decode_body(headers: &HeaderMap, body: &[u8], limit: usize) -> Result<String, ApiError> {
    let gzip = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("gzip"));

    let raw = if gzip {
        let mut out = Vec::new();
        GzDecoder::new(body)
            .take(limit as u64 + 1)
            .read_to_end(&mut out)
            .map_err(|e| {
                error!("Failed to decompress request body: {}", e);
                ApiError::bad_request("An error occurred while trying to read the request body")
            })?;
        if out.len() > limit {
            return Err(ApiError::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("Decompressed body exceeds {} bytes", limit),
            ));
        }
        out
    } else {
        body.to_vec()
    };

    String::from_utf8(raw).map_err(|_| ApiError::bad_request("Request body is not valid UTF-8"))
}

/// GET /api/influx/v1/query
pub async fn query() -> Response {
    (StatusCode::FORBIDDEN, "Not supported").into_response()
}

/// GET /api/health/check
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    if state.enrichment_enabled && !state.receiver.cache().is_valid() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Invalid enrichment cache").into_response();
    }
    StatusCode::OK.into_response()
}

/// GET /api/enrichment/cacheinfo
pub async fn cache_info(State(state): State<Arc<AppState>>) -> Response {
    (StatusCode::OK, Json(state.receiver.cache().status())).into_response()
}

/// GET /api/v1/info - Service info
pub async fn info(State(state): State<Arc<AppState>>) -> Response {
    let info = serde_json::json!({
        "name": "metrics-receiver",
        "version": env!("CARGO_PKG_VERSION"),
        "outputs": state.receiver.output_names(),
        "enrichment": state.enrichment_enabled,
        "endpoints": [
            "/api/influx/v1/write",
            "/api/influx/v1/query",
            "/api/health/check",
            "/api/enrichment/cacheinfo",
            "/api/v1/info"
        ]
    });

    (StatusCode::OK, Json(info)).into_response()
}
