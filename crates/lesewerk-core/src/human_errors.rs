// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Caller-facing error messages.
//
// Every technical error is mapped to a plain sentence plus a concrete
// suggestion for whoever submitted the document. Severity tells the client
// whether resubmitting can help.

use serde::Serialize;

use crate::error::LesewerkError;

/// Severity of an error from the submitter's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Load or timing problem; the same request may succeed later.
    Transient,
    /// The submitter must change the input before retrying.
    ActionRequired,
    /// Retrying will not help.
    Permanent,
}

/// A readable error with an actionable suggestion.
#[derive(Debug, Clone, Serialize)]
pub struct HumanError {
    pub message: String,
    pub suggestion: String,
    /// Whether an unchanged resubmission might succeed.
    pub retriable: bool,
    pub severity: Severity,
}

impl HumanError {
    fn new(
        message: &str,
        suggestion: impl Into<String>,
        retriable: bool,
        severity: Severity,
    ) -> Self {
        Self {
            message: message.into(),
            suggestion: suggestion.into(),
            retriable,
            severity,
        }
    }
}

/// Convert a `LesewerkError` into something a client can show to a person.
pub fn humanize_error(err: &LesewerkError) -> HumanError {
    match err {
        // -- Input problems --
        LesewerkError::UnsupportedFormat(detail) => HumanError::new(
            "This type of file can't be read.",
            format!("Send the pages as PDF, PNG, JPEG, TIFF, BMP, GIF or WebP. ({detail})"),
            false,
            Severity::ActionRequired,
        ),

        LesewerkError::DecodeError(detail) => HumanError::new(
            "The file looks damaged and couldn't be opened.",
            format!("Open the file on a computer to check it, or export it again. ({detail})"),
            false,
            Severity::ActionRequired,
        ),

        LesewerkError::InputTooLarge(detail) => HumanError::new(
            "The file is too big to process.",
            format!(
                "Scan at a lower resolution or split the document into smaller parts. ({detail})"
            ),
            false,
            Severity::ActionRequired,
        ),

        LesewerkError::EmptyDocument => HumanError::new(
            "No file was received.",
            "Attach at least one image or PDF and send it again.",
            false,
            Severity::ActionRequired,
        ),

        // -- Recognition problems --
        LesewerkError::RecognitionTimeout(ms) => HumanError::new(
            "Reading the text took too long.",
            format!("Try again, or send fewer pages at once. (limit {ms} ms)"),
            true,
            Severity::Transient,
        ),

        LesewerkError::EngineError(_) => HumanError::new(
            "Text recognition failed on this document.",
            "Try a clearer scan with good lighting and the text in focus.",
            true,
            Severity::Transient,
        ),

        LesewerkError::PoolSaturated(_) => HumanError::new(
            "The service is busy right now.",
            "Wait a moment and send the document again.",
            true,
            Severity::Transient,
        ),

        LesewerkError::PoolClosed => HumanError::new(
            "The service is shutting down.",
            "Send the document again in a minute.",
            true,
            Severity::Transient,
        ),

        LesewerkError::Cancelled => HumanError::new(
            "The request was cancelled before it finished.",
            "Send the document again if you still need the text.",
            true,
            Severity::Transient,
        ),

        // -- Service problems --
        LesewerkError::Config(_) => HumanError::new(
            "The service is misconfigured.",
            "Please report this to the operator.",
            false,
            Severity::Permanent,
        ),

        LesewerkError::Ledger(_) => HumanError::new(
            "The job record couldn't be stored.",
            "Try again. If this keeps happening, please report it.",
            true,
            Severity::Transient,
        ),

        LesewerkError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::NotFound {
                HumanError::new(
                    "A file the service needs couldn't be found.",
                    "Please report this to the operator.",
                    false,
                    Severity::Permanent,
                )
            } else {
                HumanError::new(
                    "There was a problem reading or writing a file.",
                    "Try again. If this keeps happening, the server's storage may be full.",
                    true,
                    Severity::Transient,
                )
            }
        }

        LesewerkError::Serialization(_) => HumanError::new(
            "The service had an internal data problem.",
            "Try again. If this keeps happening, please report it.",
            true,
            Severity::Transient,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturation_is_transient() {
        let human = humanize_error(&LesewerkError::PoolSaturated(8));
        assert_eq!(human.severity, Severity::Transient);
        assert!(human.retriable);
    }

    #[test]
    fn bad_input_requires_action() {
        for err in [
            LesewerkError::UnsupportedFormat("application/msword".into()),
            LesewerkError::DecodeError("truncated".into()),
            LesewerkError::InputTooLarge("60 MB".into()),
            LesewerkError::EmptyDocument,
        ] {
            let human = humanize_error(&err);
            assert_eq!(human.severity, Severity::ActionRequired, "{err}");
            assert!(!human.retriable);
        }
    }

    #[test]
    fn detail_is_carried_into_suggestion() {
        let human = humanize_error(&LesewerkError::UnsupportedFormat("text/plain".into()));
        assert!(human.suggestion.contains("text/plain"));
    }

    #[test]
    fn config_is_permanent() {
        let human = humanize_error(&LesewerkError::Config("bad".into()));
        assert_eq!(human.severity, Severity::Permanent);
    }
}
