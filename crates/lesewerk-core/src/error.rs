// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Lesewerk.

use thiserror::Error;

/// Top-level error type for all Lesewerk operations.
///
/// The first group is document-scoped: any of these aborts a job before a
/// single page is scheduled. The second group is page-scoped and is normally
/// absorbed into a page's `RecognitionResult` instead of being returned.
#[derive(Debug, Error)]
pub enum LesewerkError {
    // -- Document-scoped (detected before recognition) --
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("could not decode input: {0}")]
    DecodeError(String),

    #[error("input too large: {0}")]
    InputTooLarge(String),

    #[error("document contains no files")]
    EmptyDocument,

    // -- Page-scoped (absorbed into per-page results) --
    #[error("recognition timed out after {0} ms")]
    RecognitionTimeout(u64),

    #[error("OCR engine error: {0}")]
    EngineError(String),

    #[error("recognition pool saturated ({0} pages in flight)")]
    PoolSaturated(usize),

    #[error("recognition pool is shut down")]
    PoolClosed,

    #[error("job cancelled by caller")]
    Cancelled,

    // -- Service plumbing --
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("job ledger error: {0}")]
    Ledger(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LesewerkError {
    /// Stable machine-readable name, used in JSON bodies and diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnsupportedFormat(_) => "UnsupportedFormat",
            Self::DecodeError(_) => "DecodeError",
            Self::InputTooLarge(_) => "InputTooLarge",
            Self::EmptyDocument => "EmptyDocument",
            Self::RecognitionTimeout(_) => "RecognitionTimeout",
            Self::EngineError(_) => "EngineError",
            Self::PoolSaturated(_) => "PoolSaturated",
            Self::PoolClosed => "PoolClosed",
            Self::Cancelled => "Cancelled",
            Self::Config(_) => "Config",
            Self::Ledger(_) => "Ledger",
            Self::Io(_) => "Io",
            Self::Serialization(_) => "Serialization",
        }
    }

    /// Whether this error rejects a whole document before any page work.
    pub fn is_document_scoped(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFormat(_)
                | Self::DecodeError(_)
                | Self::InputTooLarge(_)
                | Self::EmptyDocument
        )
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LesewerkError>;
