// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Route definitions.

use crate::handlers;
use crate::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// API routes
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/influx/v1/write", post(handlers::write))
        .route("/api/influx/v1/query", get(handlers::query))
        .route("/api/health/check", get(handlers::health))
        .route("/api/enrichment/cacheinfo", get(handlers::cache_info))
        .route("/api/v1/info", get(handlers::info))
}
