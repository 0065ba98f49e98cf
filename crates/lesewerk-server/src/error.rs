// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// HTTP mapping for errors that end a request without a document result.
//
// The body keeps the document-result shape (`status`, `pages`,
// `diagnostics`) so clients can parse every answer the same way.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use lesewerk_core::LesewerkError;
use lesewerk_core::human_errors::humanize_error;
use lesewerk_core::{Diagnostic, PageReport};

#[derive(Debug)]
pub enum ApiError {
    Pipeline(LesewerkError),
    /// The request itself was malformed (multipart framing, body read).
    Request { status: StatusCode, message: String },
    NotFound(String),
}

impl From<LesewerkError> for ApiError {
    fn from(err: LesewerkError) -> Self {
        Self::Pipeline(err)
    }
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<String>,
    retriable: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: &'static str,
    error: ErrorDetail,
    pages: Vec<PageReport>,
    diagnostics: Vec<Diagnostic>,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Pipeline(err) => match err {
                LesewerkError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                LesewerkError::InputTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
                LesewerkError::DecodeError(_) => StatusCode::UNPROCESSABLE_ENTITY,
                LesewerkError::EmptyDocument => StatusCode::BAD_REQUEST,
                LesewerkError::PoolSaturated(_) | LesewerkError::PoolClosed => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                LesewerkError::Cancelled => {
                    StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Request { status, .. } => *status,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn detail(&self) -> ErrorDetail {
        match self {
            Self::Pipeline(err) => {
                let human = humanize_error(err);
                ErrorDetail {
                    kind: err.kind(),
                    message: human.message,
                    suggestion: Some(human.suggestion),
                    retriable: human.retriable,
                }
            }
            Self::Request { message, .. } => ErrorDetail {
                kind: "BadRequest",
                message: message.clone(),
                suggestion: None,
                retriable: false,
            },
            Self::NotFound(message) => ErrorDetail {
                kind: "NotFound",
                message: message.clone(),
                suggestion: None,
                retriable: false,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = ?self, "Request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = ?self, "Request refused");
        }
        let body = Json(ErrorBody {
            status: "failed",
            error: self.detail(),
            pages: Vec::new(),
            diagnostics: Vec::new(),
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_errors_map_to_client_statuses() {
        let cases = [
            (LesewerkError::UnsupportedFormat("x".into()), 415),
            (LesewerkError::InputTooLarge("x".into()), 413),
            (LesewerkError::DecodeError("x".into()), 422),
            (LesewerkError::EmptyDocument, 400),
            (LesewerkError::PoolClosed, 503),
            (LesewerkError::Ledger("x".into()), 500),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status_code().as_u16(), expected);
        }
    }
}
