// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job Coordinator — owns one document from upload to assembled result.
//
// Normalises and splits the document, submits every page to the shared
// recognition pool, and collects index-tagged results until all pages are
// in, the document deadline passes, or the caller cancels.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use lesewerk_core::config::JobConfig;
use lesewerk_core::error::{LesewerkError, Result};
use lesewerk_core::{Document, DocumentResult, JobId, PageFailure, RecognitionResult};
use lesewerk_document::{Normalizer, paginate};

use crate::assembler::ResultAssembler;
use crate::cancel::CancelToken;
use crate::ledger::{self, JobLedger, JobRecord, JobState};
use crate::pool::RecognitionPool;

/// Why collection stopped before every page answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupted {
    Deadline,
    Cancelled,
}

/// Drives documents through the pipeline. Cheap to clone; clones share the
/// pool, the normaliser, and the ledger.
#[derive(Clone)]
pub struct JobCoordinator {
    normalizer: Arc<Normalizer>,
    pool: RecognitionPool,
    assembler: ResultAssembler,
    document_timeout: Duration,
    ledger: Option<Arc<Mutex<JobLedger>>>,
    /// Finished jobs older than this are pruned from the ledger.
    retention: Option<Duration>,
}

impl JobCoordinator {
    pub fn new(normalizer: Normalizer, pool: RecognitionPool, config: &JobConfig) -> Self {
        Self {
            normalizer: Arc::new(normalizer),
            pool,
            assembler: ResultAssembler::new(config.confidence_floor),
            document_timeout: config.document_timeout(),
            ledger: None,
            retention: None,
        }
    }

    /// Record every job in `ledger`.
    pub fn with_ledger(mut self, ledger: JobLedger) -> Self {
        self.ledger = Some(Arc::new(Mutex::new(ledger)));
        self
    }

    /// Prune finished jobs older than `retention` whenever a job finishes.
    pub fn with_retention(mut self, retention: Option<Duration>) -> Self {
        self.retention = retention;
        self
    }

    pub fn pool(&self) -> &RecognitionPool {
        &self.pool
    }

    pub fn has_ledger(&self) -> bool {
        self.ledger.is_some()
    }

    /// Recognise every page of `document`.
    ///
    /// Document-scoped problems (format, size, no files) are returned as
    /// errors before any page is scheduled. Everything that goes wrong with a
    /// single page ends up in that page's entry of the result instead.
    #[instrument(skip_all, fields(job_id = %document.id, files = document.files.len()))]
    pub async fn process(&self, document: Document, cancel: CancelToken) -> Result<DocumentResult> {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.document_timeout;
        let job_id = document.id;

        let file_count = document.files.len();
        let fingerprint = ledger::fingerprint(&document);
        self.record("record received", move |l| {
            l.record_received(job_id, file_count, &fingerprint)
        })
        .await;

        let normalizer = Arc::clone(&self.normalizer);
        let paginated = tokio::task::spawn_blocking(move || paginate(document, &normalizer))
            .await
            .unwrap_or_else(|err| {
                Err(LesewerkError::DecodeError(format!("normaliser crashed: {err}")))
            });
        let pages = match paginated {
            Ok(pages) => pages,
            Err(err) => {
                warn!(kind = err.kind(), error = %err, "Document rejected");
                self.record_finished(job_id, JobState::Rejected, None, Some(err.to_string()))
                    .await;
                return Err(err);
            }
        };

        if cancel.is_cancelled() {
            info!("Job cancelled before recognition");
            self.record_finished(job_id, JobState::Cancelled, None, None).await;
            return Err(LesewerkError::Cancelled);
        }

        let page_count = pages.len();
        self.record("mark processing", move |l| l.mark_processing(job_id, page_count))
            .await;
        info!(pages = page_count, "Document split; submitting pages");

        let mut results: Vec<RecognitionResult> = Vec::with_capacity(page_count);
        let mut pending = JoinSet::new();
        let mut outstanding = BTreeSet::new();
        let mut refused: Option<String> = None;

        for page in pages {
            let index = page.index;
            if let Some(reason) = &refused {
                results.push(RecognitionResult::failed(
                    index,
                    PageFailure::PoolSaturated,
                    Some(reason.clone()),
                    Duration::ZERO,
                ));
                continue;
            }
            match self.pool.submit(job_id, page, &cancel) {
                Ok(recognition) => {
                    outstanding.insert(index);
                    pending.spawn(recognition);
                }
                Err(err) => {
                    let reason = match err {
                        LesewerkError::PoolClosed => "pool is shutting down".to_string(),
                        other => other.to_string(),
                    };
                    warn!(page = index, reason = %reason, "Page refused by recognition pool");
                    results.push(RecognitionResult::failed(
                        index,
                        PageFailure::PoolSaturated,
                        Some(reason.clone()),
                        Duration::ZERO,
                    ));
                    // Later pages are refused too, so the outcome does not
                    // depend on how fast workers free up slots.
                    refused = Some(reason);
                }
            }
        }

        let deadline_sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(deadline_sleep);
        let mut interrupted = None;

        while !pending.is_empty() {
            tokio::select! {
                biased;
                joined = pending.join_next() => match joined {
                    Some(Ok(result)) => {
                        outstanding.remove(&result.page_index);
                        results.push(result);
                    }
                    Some(Err(err)) => warn!(error = %err, "Page collector failed"),
                    None => break,
                },
                _ = &mut deadline_sleep => {
                    interrupted = Some(Interrupted::Deadline);
                    break;
                }
                _ = cancel.cancelled() => {
                    interrupted = Some(Interrupted::Cancelled);
                    break;
                }
            }
        }

        if let Some(reason) = interrupted {
            // Dropping the receivers tells workers not to start these pages.
            pending.abort_all();
            let (failure, detail) = match reason {
                Interrupted::Deadline => (
                    PageFailure::RecognitionTimeout,
                    Some(format!(
                        "document deadline of {} ms reached",
                        self.document_timeout.as_millis()
                    )),
                ),
                Interrupted::Cancelled => (PageFailure::Cancelled, None),
            };
            warn!(
                ?reason,
                outstanding = outstanding.len(),
                "Stopped waiting for pages"
            );
            for index in outstanding {
                results.push(RecognitionResult::failed(
                    index,
                    failure,
                    detail.clone(),
                    Duration::ZERO,
                ));
            }
        }

        let result = self
            .assembler
            .assemble(job_id, page_count, results, started.elapsed());
        info!(
            status = result.status.as_str(),
            overall_confidence = result.overall_confidence,
            failed_pages = result.failed_pages().len(),
            elapsed_ms = result.elapsed_ms,
            "Document assembled"
        );

        let state = if interrupted == Some(Interrupted::Cancelled) {
            JobState::Cancelled
        } else {
            JobState::from(result.status)
        };
        self.record_finished(job_id, state, Some(result.overall_confidence), None)
            .await;

        Ok(result)
    }

    /// Ledger entry for `id`; `None` when unknown or when no ledger is kept.
    pub async fn job_record(&self, id: JobId) -> Result<Option<JobRecord>> {
        let Some(ledger) = self.ledger.clone() else {
            return Ok(None);
        };
        tokio::task::spawn_blocking(move || {
            ledger.lock().unwrap_or_else(|p| p.into_inner()).get(id)
        })
        .await
        .map_err(|err| LesewerkError::Ledger(format!("lookup task failed: {err}")))?
    }

    /// Write the final state, then drop jobs past the retention window.
    async fn record_finished(
        &self,
        job_id: JobId,
        state: JobState,
        confidence: Option<f32>,
        message: Option<String>,
    ) {
        let retention = self.retention;
        self.record("mark finished", move |l| {
            l.mark_finished(job_id, state, confidence, message.as_deref())?;
            let cutoff = retention
                .and_then(|r| chrono::TimeDelta::from_std(r).ok())
                .and_then(|r| Utc::now().checked_sub_signed(r));
            if let Some(cutoff) = cutoff {
                l.prune_finished_before(cutoff)?;
            }
            Ok(())
        })
        .await;
    }

    /// Ledger writes never fail a job; problems are logged.
    async fn record<F>(&self, operation: &'static str, write: F)
    where
        F: FnOnce(&JobLedger) -> Result<()> + Send + 'static,
    {
        let Some(ledger) = self.ledger.clone() else {
            return;
        };
        let outcome = tokio::task::spawn_blocking(move || {
            let ledger = ledger.lock().unwrap_or_else(|p| p.into_inner());
            write(&ledger)
        })
        .await;
        match outcome {
            Ok(Ok(())) => debug!(operation, "Ledger updated"),
            Ok(Err(err)) => warn!(operation, error = %err, "Ledger update failed"),
            Err(err) => warn!(operation, error = %err, "Ledger task failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use image::{DynamicImage, GrayImage, ImageFormat, Luma};
    use lesewerk_core::config::{InputLimits, PoolConfig};
    use lesewerk_core::{DiagnosticKind, DocumentStatus, SourceFile};

    use crate::pool::tests::{ScriptedEngine, marker};

    /// A small uniform PNG whose grey level selects the scripted behaviour.
    fn page_png(level: u8) -> Vec<u8> {
        let img = GrayImage::from_pixel(8, 8, Luma([level]));
        let mut out = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .expect("encode test page");
        out
    }

    fn document(levels: &[u8]) -> Document {
        Document::new(
            levels
                .iter()
                .map(|&l| SourceFile::new(page_png(l)).with_declared_type("image/png"))
                .collect(),
        )
    }

    fn coordinator(
        workers: usize,
        queue_depth: usize,
        page_timeout_ms: u64,
        document_timeout_ms: u64,
    ) -> (JobCoordinator, Arc<ScriptedEngine>) {
        let engine = ScriptedEngine::new();
        let pool = RecognitionPool::start(
            &PoolConfig {
                workers,
                queue_depth,
                page_timeout_ms,
            },
            engine.clone(),
        );
        let coordinator = JobCoordinator::new(
            Normalizer::new(InputLimits::default()),
            pool,
            &JobConfig {
                document_timeout_ms,
                confidence_floor: 0.6,
            },
        )
        .with_ledger(JobLedger::open_in_memory().expect("ledger"));
        (coordinator, engine)
    }

    #[tokio::test]
    async fn single_page_is_ok() {
        let (coordinator, _) = coordinator(2, 8, 2_000, 10_000);
        let doc = document(&[marker::HELLO]);
        let id = doc.id;
        let result = coordinator
            .process(doc, CancelToken::new())
            .await
            .expect("process");

        assert_eq!(result.status, DocumentStatus::Ok);
        assert_eq!(result.pages.len(), 1);
        assert_eq!(result.pages[0].text, "page 10");
        assert!((result.overall_confidence - 0.95).abs() < 1e-6);

        let record = coordinator.job_record(id).await.expect("lookup").expect("recorded");
        assert_eq!(record.state, JobState::Ok);
        assert_eq!(record.page_count, Some(1));
        assert_eq!(record.file_count, 1);
    }

    #[tokio::test]
    async fn slow_middle_page_times_out_and_document_is_partial() {
        let (coordinator, _) = coordinator(2, 8, 100, 10_000);
        let result = coordinator
            .process(
                document(&[marker::HELLO, marker::SLOW, marker::HELLO]),
                CancelToken::new(),
            )
            .await
            .expect("process");

        assert_eq!(result.status, DocumentStatus::Partial);
        assert_eq!(result.pages.len(), 3);
        assert_eq!(result.pages[0].text, "page 10");
        assert_eq!(result.pages[1].text, "");
        assert_eq!(result.pages[1].confidence, 0.0);
        assert!(result.pages[1].warnings.iter().any(|w| w == "RecognitionTimeout"));
        assert_eq!(result.pages[2].text, "page 10");
        assert_eq!(result.failed_pages(), vec![1]);
    }

    #[tokio::test]
    async fn out_of_order_completion_keeps_page_order() {
        let (coordinator, _) = coordinator(2, 8, 5_000, 10_000);
        let result = coordinator
            .process(document(&[marker::SLOW, marker::HELLO]), CancelToken::new())
            .await
            .expect("process");

        let texts: Vec<&str> = result.pages.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["late", "page 10"]);
        assert_eq!(result.status, DocumentStatus::Ok);
    }

    #[tokio::test]
    async fn excess_pages_are_saturated_and_document_is_partial() {
        let (coordinator, _) = coordinator(1, 1, 5_000, 10_000);
        let result = coordinator
            .process(
                document(&[marker::SLOW, marker::SLOW, marker::HELLO, marker::HELLO]),
                CancelToken::new(),
            )
            .await
            .expect("process");

        assert_eq!(result.status, DocumentStatus::Partial);
        assert_eq!(result.pages.len(), 4);
        assert_eq!(result.failed_pages(), vec![2, 3]);
        assert!(result
            .diagnostics
            .iter()
            .all(|d| d.kind == DiagnosticKind::PoolSaturated));
        assert!(result.pages[0].failure.is_none());
        assert!(result.pages[1].failure.is_none());
    }

    #[tokio::test]
    async fn document_deadline_marks_outstanding_pages() {
        let (coordinator, _) = coordinator(2, 8, 5_000, 150);
        let result = coordinator
            .process(document(&[marker::HELLO, marker::SLOW]), CancelToken::new())
            .await
            .expect("process");

        assert_eq!(result.status, DocumentStatus::Partial);
        assert!(result.pages[0].failure.is_none());
        assert_eq!(result.pages[1].failure, Some(PageFailure::RecognitionTimeout));
        let diagnostic = &result.diagnostics[0];
        assert_eq!(diagnostic.page_index, 1);
        assert!(diagnostic.message.contains("deadline"));
    }

    #[tokio::test]
    async fn corrupt_and_unsupported_uploads_fail_before_recognition() {
        let (coordinator, engine) = coordinator(1, 4, 1_000, 10_000);

        let mut corrupt = b"\x89PNG\r\n\x1a\n".to_vec();
        corrupt.extend_from_slice(&[0u8; 32]);
        let doc = Document::single(SourceFile::new(corrupt));
        let id = doc.id;
        let err = coordinator
            .process(doc, CancelToken::new())
            .await
            .expect_err("corrupt");
        assert_eq!(err.kind(), "DecodeError");
        let record = coordinator.job_record(id).await.expect("lookup").expect("recorded");
        assert_eq!(record.state, JobState::Rejected);
        assert!(record.error_message.is_some());

        let doc = Document::single(SourceFile::new(b"just some text".to_vec()));
        let err = coordinator
            .process(doc, CancelToken::new())
            .await
            .expect_err("unsupported");
        assert_eq!(err.kind(), "UnsupportedFormat");

        assert_eq!(engine.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn every_page_gets_exactly_one_entry() {
        let (coordinator, _) = coordinator(3, 16, 2_000, 10_000);
        let levels = [marker::HELLO, marker::FAIL, marker::BLANK, marker::HELLO, marker::PANIC];
        let result = coordinator
            .process(document(&levels), CancelToken::new())
            .await
            .expect("process");

        let indices: Vec<usize> = result.pages.iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(result.failed_pages(), vec![1, 4]);
        assert_eq!(result.pages[2].confidence, 0.0);
        assert_eq!(result.status, DocumentStatus::Partial);
    }

    #[tokio::test]
    async fn cancelling_stops_waiting_and_skips_queued_pages() {
        let (coordinator, engine) = coordinator(1, 8, 5_000, 10_000);
        let cancel = CancelToken::new();
        let doc = document(&[marker::SLOW, marker::HELLO, marker::HELLO]);
        let id = doc.id;

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let result = coordinator.process(doc, cancel).await.expect("process");

        assert_eq!(result.pages.len(), 3);
        assert!(result
            .pages
            .iter()
            .all(|p| p.failure == Some(PageFailure::Cancelled)));
        assert_eq!(result.status, DocumentStatus::Failed);

        // Let the in-flight page finish; the queued ones never reach the engine.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(engine.calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        let record = coordinator.job_record(id).await.expect("lookup").expect("recorded");
        assert_eq!(record.state, JobState::Cancelled);
    }

    #[tokio::test]
    async fn expired_jobs_are_pruned_when_later_jobs_finish() {
        let (coordinator, _) = coordinator(1, 4, 1_000, 10_000);
        let coordinator = coordinator.with_retention(Some(Duration::from_millis(50)));

        let old = document(&[marker::HELLO]);
        let old_id = old.id;
        coordinator.process(old, CancelToken::new()).await.expect("process");
        assert!(coordinator.job_record(old_id).await.expect("lookup").is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let new = document(&[marker::HELLO]);
        let new_id = new.id;
        coordinator.process(new, CancelToken::new()).await.expect("process");

        assert!(coordinator.job_record(old_id).await.expect("lookup").is_none());
        assert!(coordinator.job_record(new_id).await.expect("lookup").is_some());
    }

    #[tokio::test]
    async fn already_cancelled_job_is_refused() {
        let (coordinator, engine) = coordinator(1, 8, 1_000, 10_000);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = coordinator
            .process(document(&[marker::HELLO]), cancel)
            .await
            .expect_err("cancelled");
        assert_eq!(err.kind(), "Cancelled");
        assert_eq!(engine.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
