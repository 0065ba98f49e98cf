// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// lesewerk-document — Everything between uploaded bytes and a page raster.
//
// Provides bounded image decoding, PDF page image extraction, the Image
// Normalizer and Page Splitter, recognition pre-processing, and (behind the
// `ocr` feature) the `ocrs` engine binding.

pub mod image;
pub mod normalize;
pub mod pdf;
pub mod scan;
pub mod split;

pub use normalize::{Declared, NormalizedInput, NormalizedPage, Normalizer};
pub use pdf::reader::PdfReader;
pub use scan::enhance::Preprocessor;
pub use split::{paginate, split};

#[cfg(feature = "ocr")]
pub use scan::ocr::{OcrConfig, OcrsRecognizer};
