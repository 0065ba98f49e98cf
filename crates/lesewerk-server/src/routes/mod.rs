// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// HTTP routes.

pub mod health;
pub mod jobs;
pub mod ocr;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let upload_limit = state.services().config().server.max_upload_bytes;
    Router::new()
        .route("/health", get(health::health))
        .route(
            "/v1/ocr",
            post(ocr::submit).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/v1/jobs/:id", get(jobs::get_job))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
