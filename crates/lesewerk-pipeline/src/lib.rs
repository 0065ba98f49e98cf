// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// lesewerk-pipeline — Scheduling and aggregation of page recognition.
//
// The recognition pool is the single admission-control point for OCR work.
// The coordinator owns one document from upload to assembled result; the
// ledger records job metadata for status queries.

pub mod assembler;
pub mod cancel;
pub mod coordinator;
pub mod ledger;
pub mod pool;

pub use assembler::ResultAssembler;
pub use cancel::{CancelOnDrop, CancelToken};
pub use coordinator::JobCoordinator;
pub use ledger::{JobLedger, JobRecord, JobState};
pub use pool::{PendingRecognition, PoolStats, PoolStatus, RecognitionPool};
