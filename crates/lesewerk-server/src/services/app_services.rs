// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Central service layer — builds the OCR engine, the process-wide recognition
// pool, the normaliser, and the job ledger once at start-up, and tears the
// pool down at shutdown.

use std::sync::Arc;

use lesewerk_core::config::OcrModelConfig;
use lesewerk_core::error::{LesewerkError, Result};
use lesewerk_core::{Recognizer, ServiceConfig, UnavailableRecognizer};
use lesewerk_document::{Normalizer, Preprocessor};
use lesewerk_pipeline::{JobCoordinator, JobLedger, RecognitionPool};
use tracing::{error, info};

use super::data_dir;

/// Everything a request handler needs. Cheap to clone.
#[derive(Clone)]
pub struct AppServices {
    coordinator: JobCoordinator,
    config: Arc<ServiceConfig>,
}

impl AppServices {
    /// Load the OCR engine and start the pool. Call once, inside the runtime.
    pub async fn init(config: ServiceConfig) -> Result<Self> {
        let ocr = config.ocr.clone();
        let engine = tokio::task::spawn_blocking(move || select_engine(&ocr))
            .await
            .map_err(|err| LesewerkError::EngineError(format!("engine loader crashed: {err}")))?;

        let ledger = if config.ledger.enabled {
            let path = config
                .ledger
                .path
                .clone()
                .unwrap_or_else(|| data_dir::data_dir().join("jobs.db"));
            match JobLedger::open(&path) {
                Ok(ledger) => Some(ledger),
                Err(err) => {
                    error!(
                        path = %path.display(),
                        error = %err,
                        "Job ledger unavailable; using in-memory fallback"
                    );
                    Some(JobLedger::open_in_memory()?)
                }
            }
        } else {
            None
        };

        Ok(Self::assemble(config, engine, ledger))
    }

    /// Services around a given engine with an in-memory ledger.
    #[cfg(test)]
    pub fn with_engine(config: ServiceConfig, engine: Arc<dyn Recognizer>) -> Result<Self> {
        let ledger = if config.ledger.enabled {
            Some(JobLedger::open_in_memory()?)
        } else {
            None
        };
        Ok(Self::assemble(config, engine, ledger))
    }

    fn assemble(
        config: ServiceConfig,
        engine: Arc<dyn Recognizer>,
        ledger: Option<JobLedger>,
    ) -> Self {
        let pool = RecognitionPool::start(&config.pool, engine);
        let normalizer = Normalizer::new(config.limits.clone())
            .with_preprocessor(Preprocessor::new(config.preprocess.clone()));
        let mut coordinator = JobCoordinator::new(normalizer, pool, &config.job);
        if let Some(ledger) = ledger {
            coordinator = coordinator
                .with_ledger(ledger)
                .with_retention(config.ledger.retention());
        }

        info!(
            engine = coordinator.pool().engine_name(),
            workers = coordinator.pool().stats().workers,
            ledger = coordinator.has_ledger(),
            "Services initialised"
        );
        Self {
            coordinator,
            config: Arc::new(config),
        }
    }

    pub fn coordinator(&self) -> &JobCoordinator {
        &self.coordinator
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Stop admitting pages and drain the pool.
    pub async fn shutdown(&self) {
        self.coordinator.pool().shutdown().await;
    }
}

#[cfg(feature = "ocr")]
fn select_engine(config: &OcrModelConfig) -> Arc<dyn Recognizer> {
    use lesewerk_document::{OcrConfig, OcrsRecognizer};

    match OcrsRecognizer::new(OcrConfig::from_service(config)) {
        Ok(engine) => Arc::new(engine),
        Err(err) => {
            error!(error = %err, "OCR engine failed to load; pages will fail with EngineError");
            Arc::new(UnavailableRecognizer::new(err.to_string()))
        }
    }
}

#[cfg(not(feature = "ocr"))]
fn select_engine(_config: &OcrModelConfig) -> Arc<dyn Recognizer> {
    tracing::warn!("Built without the `ocr` feature; pages will fail with EngineError");
    Arc::new(UnavailableRecognizer::new(
        "this build has no OCR engine; rebuild with `--features ocr`",
    ))
}
