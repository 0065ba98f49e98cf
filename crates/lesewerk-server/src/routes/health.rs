// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// `GET /health` — liveness plus recognition pool counters.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use lesewerk_pipeline::{PoolStats, PoolStatus};

use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    engine: String,
    uptime_secs: u64,
    ledger: bool,
    pool: PoolStats,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let coordinator = state.services().coordinator();
    let pool = coordinator.pool().stats();
    let status = match pool.status {
        PoolStatus::Running => "ok",
        PoolStatus::Draining | PoolStatus::Stopped => "draining",
    };
    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        engine: coordinator.pool().engine_name().to_string(),
        uptime_secs: state.uptime_secs(),
        ledger: coordinator.has_ledger(),
        pool,
    })
}
