// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// `POST /v1/ocr` — submit one document and wait for its result.
//
// Multipart bodies carry one source file per file part; the part's content
// type is its declared media type, and an optional `media_type` text part
// overrides it for every file. Any other body is a single file declared by
// the request's `Content-Type`.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::header;
use tracing::{debug, info};

use lesewerk_core::{Document, DocumentResult, SourceFile};
use lesewerk_pipeline::CancelToken;

use crate::error::ApiError;
use crate::state::AppState;

/// Name of the text part that overrides declared media types.
const MEDIA_TYPE_FIELD: &str = "media_type";

pub async fn submit(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<DocumentResult>, ApiError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let files = match content_type.as_deref() {
        Some(ct) if ct.to_ascii_lowercase().starts_with("multipart/form-data") => {
            let multipart = Multipart::from_request(request, &state).await.map_err(|r| {
                ApiError::Request {
                    status: r.status(),
                    message: r.body_text(),
                }
            })?;
            read_multipart(multipart).await?
        }
        _ => {
            let body = Bytes::from_request(request, &state).await.map_err(|r| {
                ApiError::Request {
                    status: r.status(),
                    message: r.body_text(),
                }
            })?;
            if body.is_empty() {
                Vec::new()
            } else {
                let mut file = SourceFile::new(body.to_vec());
                if let Some(ct) = content_type {
                    file = file.with_declared_type(ct);
                }
                vec![file]
            }
        }
    };

    let document = Document::new(files);
    info!(
        job_id = %document.id,
        files = document.files.len(),
        bytes = document.total_bytes(),
        "Document received"
    );

    // Dropping this handler (client gone) cancels the job.
    let cancel = CancelToken::new();
    let guard = cancel.drop_guard();
    let outcome = state
        .services()
        .coordinator()
        .process(document, cancel)
        .await;
    guard.disarm();

    Ok(Json(outcome?))
}

async fn read_multipart(mut multipart: Multipart) -> Result<Vec<SourceFile>, ApiError> {
    let mut files = Vec::new();
    let mut override_type: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| ApiError::Request {
        status: e.status(),
        message: e.body_text(),
    })? {
        let name = field.name().unwrap_or("").to_string();
        if name == MEDIA_TYPE_FIELD {
            let value = field.text().await.map_err(|e| ApiError::Request {
                status: e.status(),
                message: e.body_text(),
            })?;
            let value = value.trim();
            if !value.is_empty() {
                override_type = Some(value.to_string());
            }
            continue;
        }

        let file_name = field.file_name().map(str::to_string);
        let declared = field.content_type().map(str::to_string);
        if file_name.is_none() && declared.is_none() {
            debug!(field = %name, "Ignoring non-file form field");
            continue;
        }

        let bytes = field.bytes().await.map_err(|e| ApiError::Request {
            status: e.status(),
            message: e.body_text(),
        })?;
        let mut file = SourceFile::new(bytes.to_vec());
        if let Some(file_name) = file_name {
            file = file.with_name(file_name);
        }
        if let Some(declared) = declared {
            file = file.with_declared_type(declared);
        }
        files.push(file);
    }

    if let Some(media_type) = override_type {
        for file in &mut files {
            file.declared_type = Some(media_type.clone());
        }
    }
    Ok(files)
}
