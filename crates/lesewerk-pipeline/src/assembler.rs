// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Result Assembler — turns per-page recognition results into one
// `DocumentResult` in page order, with status and diagnostics.

use std::collections::BTreeMap;
use std::time::Duration;

use lesewerk_core::{
    Diagnostic, DiagnosticKind, DocumentResult, DocumentStatus, JobId, PageFailure, PageReport,
    RecognitionResult,
};
use tracing::warn;

/// Builds document results against a confidence floor.
#[derive(Debug, Clone, Copy)]
pub struct ResultAssembler {
    confidence_floor: f32,
}

impl ResultAssembler {
    pub fn new(confidence_floor: f32) -> Self {
        Self {
            confidence_floor: confidence_floor.clamp(0.0, 1.0),
        }
    }

    /// Assemble exactly `page_count` entries, indexed `0..page_count`.
    ///
    /// Results arrive in any order. A duplicate index keeps the first
    /// result seen, an index outside the document is dropped, and an index
    /// with no result becomes a `Missing` failure.
    pub fn assemble(
        &self,
        job_id: JobId,
        page_count: usize,
        results: Vec<RecognitionResult>,
        elapsed: Duration,
    ) -> DocumentResult {
        let mut by_index: BTreeMap<usize, RecognitionResult> = BTreeMap::new();
        for result in results {
            let index = result.page_index;
            if index >= page_count {
                warn!(%job_id, page = index, page_count, "Dropping result for unknown page");
                continue;
            }
            if by_index.contains_key(&index) {
                warn!(%job_id, page = index, "Dropping duplicate page result");
                continue;
            }
            by_index.insert(index, result);
        }

        let mut pages = Vec::with_capacity(page_count);
        let mut diagnostics = Vec::new();
        let mut text = String::new();

        for index in 0..page_count {
            let result = by_index.remove(&index).unwrap_or_else(|| {
                RecognitionResult::failed(
                    index,
                    PageFailure::Missing,
                    Some("no recognition result was produced for this page".into()),
                    Duration::ZERO,
                )
            });

            if let Some(failure) = result.failure {
                diagnostics.push(Diagnostic {
                    page_index: index,
                    kind: failure.into(),
                    message: result
                        .failure_detail
                        .clone()
                        .unwrap_or_else(|| failure_message(failure).to_string()),
                });
            } else if result.confidence < self.confidence_floor {
                diagnostics.push(Diagnostic {
                    page_index: index,
                    kind: DiagnosticKind::LowConfidence,
                    message: format!(
                        "confidence {:.2} is below the floor of {:.2}",
                        result.confidence, self.confidence_floor
                    ),
                });
            }

            let page_text = result.text();
            if index > 0 {
                text.push('\n');
            }
            text.push_str(&page_marker(index));
            text.push('\n');
            text.push_str(&page_text);

            pages.push(PageReport {
                index,
                text: page_text,
                confidence: result.confidence,
                warnings: result.warnings,
                failure: result.failure,
                elapsed_ms: result.elapsed.as_millis() as u64,
                blocks: result.blocks,
            });
        }

        let status = self.status(&pages);
        let (overall_confidence, min_confidence) = confidence_summary(&pages);

        DocumentResult {
            job_id,
            status,
            text,
            pages,
            overall_confidence,
            min_confidence,
            diagnostics,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    fn status(&self, pages: &[PageReport]) -> DocumentStatus {
        let succeeded = pages.iter().filter(|p| p.failure.is_none()).count();
        if succeeded == 0 {
            return DocumentStatus::Failed;
        }
        let all_good = succeeded == pages.len()
            && pages.iter().all(|p| p.confidence >= self.confidence_floor);
        if all_good {
            DocumentStatus::Ok
        } else {
            DocumentStatus::Partial
        }
    }
}

/// Boundary line written before each page's text (1-based for readers).
pub fn page_marker(index: usize) -> String {
    format!("--- page {} ---", index + 1)
}

/// Mean and minimum over every page entry; failed pages count as 0.
fn confidence_summary(pages: &[PageReport]) -> (f32, f32) {
    if pages.is_empty() {
        return (0.0, 0.0);
    }
    let sum: f32 = pages.iter().map(|p| p.confidence).sum();
    let min = pages
        .iter()
        .map(|p| p.confidence)
        .fold(f32::INFINITY, f32::min);
    ((sum / pages.len() as f32).clamp(0.0, 1.0), min.clamp(0.0, 1.0))
}

fn failure_message(failure: PageFailure) -> &'static str {
    match failure {
        PageFailure::RecognitionTimeout => "recognition exceeded its time limit",
        PageFailure::EngineError => "the OCR engine failed on this page",
        PageFailure::PoolSaturated => "the recognition queue was full",
        PageFailure::Cancelled => "the job was cancelled before this page ran",
        PageFailure::Missing => "no recognition result was produced for this page",
    }
}
