// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The OCR capability: a synchronous, stateless call from pixels to text.

use crate::error::{LesewerkError, Result};
use crate::types::{EngineOutput, PageImage};

/// Anything that can turn a page raster into text blocks.
///
/// Implementations are called from blocking worker threads, may take a long
/// time, may fail, and may report confidences outside [0, 1]; the
/// recognition pool copes with all of that. They must not keep per-call
/// state between invocations.
pub trait Recognizer: Send + Sync {
    /// Short engine identifier for logs and health output.
    fn name(&self) -> &str;

    /// Recognize the text on one page.
    fn recognize(&self, image: &PageImage) -> Result<EngineOutput>;
}

/// Placeholder used when no engine could be loaded. Every page fails with
/// `EngineError`, so documents come back `failed` instead of the service
/// refusing to start.
#[derive(Debug, Clone)]
pub struct UnavailableRecognizer {
    reason: String,
}

impl UnavailableRecognizer {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Recognizer for UnavailableRecognizer {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn recognize(&self, _image: &PageImage) -> Result<EngineOutput> {
        Err(LesewerkError::EngineError(self.reason.clone()))
    }
}
