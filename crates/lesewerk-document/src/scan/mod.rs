// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Recognition side of a page: clean-up before OCR, and the OCR engine itself.

pub mod enhance;

#[cfg(feature = "ocr")]
pub mod ocr;

pub use enhance::Preprocessor;

#[cfg(feature = "ocr")]
pub use ocr::OcrsRecognizer;
