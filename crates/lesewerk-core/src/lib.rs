// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Lesewerk — Core types and error definitions shared across all crates.

pub mod config;
pub mod error;
pub mod human_errors;
pub mod recognizer;
pub mod types;

pub use config::ServiceConfig;
pub use error::LesewerkError;
pub use recognizer::{Recognizer, UnavailableRecognizer};
pub use types::*;
