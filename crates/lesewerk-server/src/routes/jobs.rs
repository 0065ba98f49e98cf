// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// `GET /v1/jobs/:id` — ledger record for one job.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;

use lesewerk_core::JobId;
use lesewerk_pipeline::JobRecord;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobRecord>, ApiError> {
    let job_id = JobId::parse(&id).ok_or_else(|| ApiError::Request {
        status: StatusCode::BAD_REQUEST,
        message: format!("{id:?} is not a job id"),
    })?;
    state
        .services()
        .coordinator()
        .job_record(job_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no job {job_id}")))
}
