// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Recognition Worker Pool — a fixed set of workers pulling pages from one
// bounded queue and running the OCR engine on blocking threads with a hard
// per-page timeout.
//
// Admission is decided by a semaphore sized `workers + queue_depth`: a page
// holds its permit from `submit` until its engine call returns, so the pool
// never holds more pages than that and `submit` never waits. A second
// semaphore sized `workers` caps concurrent engine calls, including calls
// abandoned after a timeout.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use lesewerk_core::config::PoolConfig;
use lesewerk_core::error::{LesewerkError, Result};
use lesewerk_core::{
    EngineOutput, JobId, Page, PageFailure, PageImage, RecognitionResult, Recognizer, TextBlock,
    warning,
};

use crate::cancel::CancelToken;

/// Lifecycle of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolStatus {
    Running,
    /// No new pages are admitted; queued pages are still being recognised.
    Draining,
    Stopped,
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub status: PoolStatus,
    pub workers: usize,
    pub queue_depth: usize,
    /// Admission slots in use: queued or running pages, plus abandoned
    /// engine calls that have not returned yet.
    pub in_flight: usize,
    pub submitted: usize,
    pub completed: usize,
    pub rejected: usize,
    pub timed_out: usize,
    pub engine_errors: usize,
    /// Timed-out engine calls that are still burning a blocking thread.
    pub abandoned_running: usize,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicUsize,
    completed: AtomicUsize,
    rejected: AtomicUsize,
    timed_out: AtomicUsize,
    engine_errors: AtomicUsize,
    abandoned_running: Arc<AtomicUsize>,
}

/// One admitted page waiting for a worker.
struct PageTask {
    job_id: JobId,
    page: Page,
    cancel: CancelToken,
    reply: oneshot::Sender<RecognitionResult>,
    permit: OwnedSemaphorePermit,
}

struct Shared {
    engine: Arc<dyn Recognizer>,
    workers: usize,
    queue_depth: usize,
    page_timeout: Duration,
    admission: Arc<Semaphore>,
    /// One slot per worker; held for the whole engine call, abandoned or not.
    engine_slots: Arc<Semaphore>,
    sender: Mutex<Option<mpsc::Sender<PageTask>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    status: Mutex<PoolStatus>,
    counters: Counters,
}

impl Shared {
    fn capacity(&self) -> usize {
        self.workers + self.queue_depth
    }

    fn set_status(&self, status: PoolStatus) {
        *self.status.lock().unwrap_or_else(|p| p.into_inner()) = status;
    }
}

/// Process-wide pool of OCR workers. Cheap to clone; all clones share the
/// same workers and queue.
#[derive(Clone)]
pub struct RecognitionPool {
    shared: Arc<Shared>,
}

impl RecognitionPool {
    /// Spawn the workers. Must be called inside a Tokio runtime.
    #[instrument(skip_all, fields(engine = engine.name()))]
    pub fn start(config: &PoolConfig, engine: Arc<dyn Recognizer>) -> Self {
        let workers = config.effective_workers().max(1);
        let queue_depth = config.queue_depth;
        let capacity = workers + queue_depth;

        let (sender, receiver) = mpsc::channel::<PageTask>(capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let shared = Arc::new(Shared {
            engine,
            workers,
            queue_depth,
            page_timeout: config.page_timeout(),
            admission: Arc::new(Semaphore::new(capacity)),
            engine_slots: Arc::new(Semaphore::new(workers)),
            sender: Mutex::new(Some(sender)),
            handles: Mutex::new(Vec::with_capacity(workers)),
            status: Mutex::new(PoolStatus::Running),
            counters: Counters::default(),
        });

        let handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let shared = Arc::clone(&shared);
                tokio::spawn(worker_loop(worker, receiver, shared))
            })
            .collect();
        *shared.handles.lock().unwrap_or_else(|p| p.into_inner()) = handles;

        info!(
            workers,
            queue_depth,
            page_timeout_ms = config.page_timeout_ms,
            "Recognition pool started"
        );
        Self { shared }
    }

    /// Queue one page for recognition.
    ///
    /// Fails fast with `PoolSaturated` when `workers + queue_depth` pages are
    /// already admitted, and with `PoolClosed` after `shutdown`.
    pub fn submit(
        &self,
        job_id: JobId,
        page: Page,
        cancel: &CancelToken,
    ) -> Result<PendingRecognition> {
        let sender = self
            .shared
            .sender
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or(LesewerkError::PoolClosed)?;

        let permit = Arc::clone(&self.shared.admission)
            .try_acquire_owned()
            .map_err(|err| match err {
                TryAcquireError::NoPermits => {
                    self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
                    LesewerkError::PoolSaturated(self.shared.capacity())
                }
                TryAcquireError::Closed => LesewerkError::PoolClosed,
            })?;

        let page_index = page.index;
        let (reply, receiver) = oneshot::channel();
        let task = PageTask {
            job_id,
            page,
            cancel: cancel.clone(),
            reply,
            permit,
        };
        sender.try_send(task).map_err(|err| match err {
            TrySendError::Full(_) => LesewerkError::PoolSaturated(self.shared.capacity()),
            TrySendError::Closed(_) => LesewerkError::PoolClosed,
        })?;

        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
        debug!(%job_id, page = page_index, "Page queued");
        Ok(PendingRecognition {
            page_index,
            receiver,
        })
    }

    /// Stop admitting pages, let everything already queued finish, and join
    /// the workers.
    pub async fn shutdown(&self) {
        self.shared.admission.close();
        let sender = self
            .shared
            .sender
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if sender.is_none() {
            return;
        }
        drop(sender);
        self.shared.set_status(PoolStatus::Draining);
        info!("Recognition pool draining");

        let handles = std::mem::take(
            &mut *self.shared.handles.lock().unwrap_or_else(|p| p.into_inner()),
        );
        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "Recognition worker ended abnormally");
            }
        }

        self.shared.set_status(PoolStatus::Stopped);
        info!("Recognition pool stopped");
    }

    pub fn status(&self) -> PoolStatus {
        *self.shared.status.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn engine_name(&self) -> &str {
        self.shared.engine.name()
    }

    pub fn stats(&self) -> PoolStats {
        let c = &self.shared.counters;
        PoolStats {
            status: self.status(),
            workers: self.shared.workers,
            queue_depth: self.shared.queue_depth,
            in_flight: self
                .shared
                .capacity()
                .saturating_sub(self.shared.admission.available_permits()),
            submitted: c.submitted.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            timed_out: c.timed_out.load(Ordering::Relaxed),
            engine_errors: c.engine_errors.load(Ordering::Relaxed),
            abandoned_running: c.abandoned_running.load(Ordering::Relaxed),
        }
    }
}

/// Result of one submitted page, tagged with its index.
///
/// Resolves to a failed result instead of hanging if the pool drops the page
/// without answering.
#[derive(Debug)]
pub struct PendingRecognition {
    page_index: usize,
    receiver: oneshot::Receiver<RecognitionResult>,
}

impl PendingRecognition {
    pub fn page_index(&self) -> usize {
        self.page_index
    }
}

impl Future for PendingRecognition {
    type Output = RecognitionResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let page_index = self.page_index;
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(RecognitionResult::failed(
                page_index,
                PageFailure::EngineError,
                Some("recognition worker stopped before answering".into()),
                Duration::ZERO,
            )),
            Poll::Pending => Poll::Pending,
        }
    }
}

async fn worker_loop(
    worker: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<PageTask>>>,
    shared: Arc<Shared>,
) {
    debug!(worker, "Recognition worker started");
    loop {
        let task = receiver.lock().await.recv().await;
        let Some(task) = task else {
            break;
        };
        run_task(&shared, task).await;
    }
    debug!(worker, "Recognition worker exiting");
}

/// Engine call states, used to account for abandoned invocations exactly once.
const CALL_RUNNING: u8 = 0;
const CALL_FINISHED: u8 = 1;
const CALL_ABANDONED: u8 = 2;

async fn run_task(shared: &Shared, task: PageTask) {
    let PageTask {
        job_id,
        page,
        cancel,
        reply,
        permit,
    } = task;
    let index = page.index;

    if reply.is_closed() {
        debug!(%job_id, page = index, "Caller gone; skipping page");
        return;
    }
    if cancel.is_cancelled() {
        debug!(%job_id, page = index, "Job cancelled; skipping page");
        drop(permit);
        let _ = reply.send(RecognitionResult::failed(
            index,
            PageFailure::Cancelled,
            None,
            Duration::ZERO,
        ));
        return;
    }

    let started = Instant::now();
    let Page {
        image,
        text_layer,
        warnings: page_warnings,
        ..
    } = page;

    let mut result = match text_layer {
        Some(text) => {
            debug!(%job_id, page = index, "Using embedded text layer");
            drop(permit);
            sanitize_output(
                index,
                EngineOutput {
                    blocks: vec![TextBlock::new(text, 1.0)],
                    warnings: vec![warning::TEXT_LAYER.into()],
                },
                started.elapsed(),
            )
        }
        None => recognize(shared, job_id, index, image, permit, started).await,
    };

    // Normalisation warnings come first, then recognition warnings.
    let mut warnings = page_warnings;
    warnings.append(&mut result.warnings);
    result.warnings = warnings;

    shared.counters.completed.fetch_add(1, Ordering::Relaxed);
    let _ = reply.send(result);
}

/// Run the engine on one raster under the page timeout.
///
/// The admission permit and an engine slot travel into the blocking call, so
/// a call abandoned on timeout keeps occupying capacity until it returns.
async fn recognize(
    shared: &Shared,
    job_id: JobId,
    index: usize,
    image: PageImage,
    permit: OwnedSemaphorePermit,
    started: Instant,
) -> RecognitionResult {
    let deadline = tokio::time::Instant::now() + shared.page_timeout;
    let timeout_ms = shared.page_timeout.as_millis() as u64;

    let slot = match tokio::time::timeout_at(
        deadline,
        Arc::clone(&shared.engine_slots).acquire_owned(),
    )
    .await
    {
        Ok(Ok(slot)) => slot,
        Ok(Err(_)) => {
            return RecognitionResult::failed(
                index,
                PageFailure::EngineError,
                Some("engine slots closed".into()),
                started.elapsed(),
            );
        }
        Err(_) => {
            shared.counters.timed_out.fetch_add(1, Ordering::Relaxed);
            warn!(%job_id, page = index, timeout_ms, "Every engine slot busy with abandoned calls");
            return RecognitionResult::failed(
                index,
                PageFailure::RecognitionTimeout,
                Some(format!(
                    "{}; engine busy with abandoned calls",
                    LesewerkError::RecognitionTimeout(timeout_ms)
                )),
                started.elapsed(),
            );
        }
    };

    let engine = Arc::clone(&shared.engine);
    let state = Arc::new(AtomicU8::new(CALL_RUNNING));
    let call_state = Arc::clone(&state);
    let abandoned = Arc::clone(&shared.counters.abandoned_running);

    let call = tokio::task::spawn_blocking(move || {
        let output = engine.recognize(&image);
        if call_state.swap(CALL_FINISHED, Ordering::SeqCst) == CALL_ABANDONED {
            abandoned.fetch_sub(1, Ordering::SeqCst);
        }
        // Capacity comes back before the caller is answered.
        drop(slot);
        drop(permit);
        output
    });

    let outcome = tokio::time::timeout_at(deadline, call).await;
    let elapsed = started.elapsed();
    match outcome {
        Err(_) => {
            // The blocking thread cannot be interrupted; let it run out and
            // discard whatever it produces.
            let counter = &shared.counters.abandoned_running;
            counter.fetch_add(1, Ordering::SeqCst);
            if state
                .compare_exchange(CALL_RUNNING, CALL_ABANDONED, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                counter.fetch_sub(1, Ordering::SeqCst);
            }
            shared.counters.timed_out.fetch_add(1, Ordering::Relaxed);
            warn!(%job_id, page = index, timeout_ms, "Recognition timed out");
            RecognitionResult::failed(
                index,
                PageFailure::RecognitionTimeout,
                Some(LesewerkError::RecognitionTimeout(timeout_ms).to_string()),
                elapsed,
            )
        }
        Ok(Err(join_err)) => {
            shared.counters.engine_errors.fetch_add(1, Ordering::Relaxed);
            error!(%job_id, page = index, error = %join_err, "OCR engine panicked");
            RecognitionResult::failed(
                index,
                PageFailure::EngineError,
                Some(format!("engine crashed: {join_err}")),
                elapsed,
            )
        }
        Ok(Ok(Err(err))) => {
            shared.counters.engine_errors.fetch_add(1, Ordering::Relaxed);
            warn!(%job_id, page = index, error = %err, "OCR engine error");
            RecognitionResult::failed(
                index,
                PageFailure::EngineError,
                Some(err.to_string()),
                elapsed,
            )
        }
        Ok(Ok(Ok(output))) => {
            let result = sanitize_output(index, output, elapsed);
            debug!(
                %job_id,
                page = index,
                confidence = result.confidence,
                elapsed_ms = elapsed.as_millis() as u64,
                "Page recognised"
            );
            result
        }
    }
}

/// Clamp engine confidences into [0, 1] and derive the page confidence as
/// the character-weighted mean of its blocks.
pub fn sanitize_output(
    page_index: usize,
    output: EngineOutput,
    elapsed: Duration,
) -> RecognitionResult {
    let EngineOutput {
        blocks,
        mut warnings,
    } = output;

    let mut clamped = false;
    let blocks: Vec<TextBlock> = blocks
        .into_iter()
        .map(|mut block| {
            let confidence = clamp_confidence(block.confidence);
            if confidence != block.confidence {
                clamped = true;
            }
            block.confidence = confidence;
            block
        })
        .filter(|block| !block.text.trim().is_empty())
        .collect();
    if clamped {
        warnings.push(warning::CONFIDENCE_CLAMPED.into());
    }

    let (weighted, chars) = blocks.iter().fold((0.0f64, 0usize), |(sum, n), block| {
        let len = block.text.trim().chars().count();
        (sum + block.confidence as f64 * len as f64, n + len)
    });
    let confidence = if chars == 0 {
        warnings.push(warning::NO_TEXT_DETECTED.into());
        0.0
    } else {
        clamp_confidence((weighted / chars as f64) as f32)
    };

    RecognitionResult {
        page_index,
        blocks,
        confidence,
        warnings,
        elapsed,
        failure: None,
        failure_detail: None,
    }
}

/// NaN counts as no confidence at all.
fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
