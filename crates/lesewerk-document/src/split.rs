// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page Splitter — flattens normalised payloads into one contiguous, globally
// numbered page sequence.

use lesewerk_core::Page;
use lesewerk_core::config::InputLimits;
use lesewerk_core::error::{LesewerkError, Result};
use lesewerk_core::types::Document;
use tracing::{debug, instrument};

use crate::normalize::{NormalizedInput, Normalizer};

/// Number pages across all inputs in submission order.
///
/// File `n`'s pages follow every page of files `0..n`, each file keeping its
/// native page order. Indices start at 0 with no gaps. Never fails.
pub fn split(inputs: Vec<NormalizedInput>) -> Vec<Page> {
    let mut pages = Vec::with_capacity(inputs.iter().map(|i| i.pages.len()).sum());
    for (source_file, input) in inputs.into_iter().enumerate() {
        for page in input.pages {
            pages.push(Page {
                index: pages.len(),
                source_file,
                source_page: page.source_page,
                image: page.image,
                warnings: page.warnings,
                text_layer: page.text_layer,
            });
        }
    }
    pages
}

/// Normalise every file of `document` and split the result into pages.
///
/// Fails on the first document-scoped error; no pages are produced in that
/// case. Encoded bytes are dropped file by file as they are decoded.
#[instrument(skip_all, fields(job_id = %document.id, files = document.files.len()))]
pub fn paginate(document: Document, normalizer: &Normalizer) -> Result<Vec<Page>> {
    let limits: &InputLimits = normalizer.limits();
    if document.files.is_empty() {
        return Err(LesewerkError::EmptyDocument);
    }
    if document.files.len() > limits.max_files_per_document {
        return Err(LesewerkError::InputTooLarge(format!(
            "{} files submitted, limit is {}",
            document.files.len(),
            limits.max_files_per_document
        )));
    }

    let mut inputs = Vec::with_capacity(document.files.len());
    let mut total_pages = 0usize;
    for file in document.files {
        let input = normalizer.normalize_file(file)?;
        total_pages += input.pages.len();
        if total_pages > limits.max_pages_per_document {
            return Err(LesewerkError::InputTooLarge(format!(
                "document has more than {} pages",
                limits.max_pages_per_document
            )));
        }
        inputs.push(input);
    }

    let pages = split(inputs);
    debug!(pages = pages.len(), "Document split into pages");
    Ok(pages)
}
