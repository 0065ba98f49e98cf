// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service configuration: defaults, optional JSON file, environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LesewerkError, Result};

/// Environment variable naming an optional JSON config file.
pub const CONFIG_FILE_ENV: &str = "LESEWERK_CONFIG";

/// Complete service settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub limits: InputLimits,
    pub pool: PoolConfig,
    pub job: JobConfig,
    pub preprocess: PreprocessConfig,
    pub ocr: OcrModelConfig,
    pub ledger: LedgerConfig,
}

/// HTTP front end. The process manager decides how many of these run;
/// nothing in the pipeline assumes that number.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Maximum request body accepted by the upload route.
    pub max_upload_bytes: usize,
    /// Emit logs as JSON lines instead of human-readable text.
    pub log_json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            max_upload_bytes: 64 * 1024 * 1024,
            log_json: false,
        }
    }
}

/// Ceilings enforced by the normalizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputLimits {
    /// Largest single encoded file.
    pub max_file_bytes: usize,
    /// Largest raster (width x height) we are willing to decode at all.
    pub max_decode_pixels: u64,
    /// Longest side after normalisation; bigger images are downsampled.
    pub max_dimension: u32,
    pub max_files_per_document: usize,
    pub max_pages_per_document: usize,
}

impl Default for InputLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: 50 * 1024 * 1024,
            max_decode_pixels: 120_000_000,
            max_dimension: 4096,
            max_files_per_document: 32,
            max_pages_per_document: 500,
        }
    }
}

/// Recognition worker pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Parallel recognition workers; 0 means "one per available core".
    pub workers: usize,
    /// Pages allowed to wait for a worker beyond those being recognized.
    pub queue_depth: usize,
    /// Hard limit for a single engine call.
    pub page_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_depth: 64,
            page_timeout_ms: 30_000,
        }
    }
}

impl PoolConfig {
    /// Worker count with the "auto" value resolved.
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.page_timeout_ms)
    }
}

/// Per-document policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Deadline for a whole document, independent of the page timeout.
    pub document_timeout_ms: u64,
    /// Pages under this confidence make a document `partial`.
    pub confidence_floor: f32,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            document_timeout_ms: 120_000,
            confidence_floor: 0.6,
        }
    }
}

impl JobConfig {
    pub fn document_timeout(&self) -> Duration {
        Duration::from_millis(self.document_timeout_ms)
    }
}

/// Image clean-up applied after normalisation, before recognition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Stretch the grey levels to use the full 0-255 range.
    pub stretch_contrast: bool,
    /// Gaussian blur sigma; 0 disables denoising.
    pub denoise_sigma: f32,
    /// Otsu binarisation to pure black/white.
    pub binarize: bool,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            stretch_contrast: true,
            denoise_sigma: 0.0,
            binarize: false,
        }
    }
}

/// Where to find OCR model files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrModelConfig {
    /// Directory holding the detection and recognition models. `None`
    /// uses the engine's default cache location.
    pub model_dir: Option<PathBuf>,
}

/// Optional job-status store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub enabled: bool,
    /// SQLite file; `None` puts `jobs.db` in the data directory.
    pub path: Option<PathBuf>,
    /// Finished jobs older than this are deleted. 0 keeps them forever.
    pub retention_hours: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            retention_hours: 24 * 7,
        }
    }
}

impl LedgerConfig {
    pub fn retention(&self) -> Option<Duration> {
        (self.retention_hours > 0)
            .then(|| Duration::from_secs(self.retention_hours.saturating_mul(3600)))
    }
}

impl ServiceConfig {
    /// Defaults, then the file named by `LESEWERK_CONFIG`, then environment
    /// overrides, then validation.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_FILE_ENV) {
            Ok(path) if !path.is_empty() => Self::load(Path::new(&path))?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file. Missing sections take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LesewerkError::Config(format!("reading {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| LesewerkError::Config(format!("parsing {}: {e}", path.display())))
    }

    /// Apply environment-style overrides through `lookup`, which returns the
    /// value for a variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        // PORT is what most process managers hand out.
        if let Some(v) = lookup("LESEWERK_PORT").or_else(|| lookup("PORT")) {
            self.server.port = parse_var("PORT", &v)?;
        }
        if let Some(v) = lookup("LESEWERK_HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("LESEWERK_LOG_JSON") {
            self.server.log_json = parse_bool("LESEWERK_LOG_JSON", &v)?;
        }
        if let Some(v) = lookup("LESEWERK_POOL_WORKERS") {
            self.pool.workers = parse_var("LESEWERK_POOL_WORKERS", &v)?;
        }
        if let Some(v) = lookup("LESEWERK_QUEUE_DEPTH") {
            self.pool.queue_depth = parse_var("LESEWERK_QUEUE_DEPTH", &v)?;
        }
        if let Some(v) = lookup("LESEWERK_PAGE_TIMEOUT_MS") {
            self.pool.page_timeout_ms = parse_var("LESEWERK_PAGE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("LESEWERK_DOCUMENT_TIMEOUT_MS") {
            self.job.document_timeout_ms = parse_var("LESEWERK_DOCUMENT_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("LESEWERK_CONFIDENCE_FLOOR") {
            self.job.confidence_floor = parse_var("LESEWERK_CONFIDENCE_FLOOR", &v)?;
        }
        if let Some(v) = lookup("LESEWERK_MODEL_DIR") {
            self.ocr.model_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("LESEWERK_LEDGER_PATH") {
            self.ledger.path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("LESEWERK_LEDGER_RETENTION_HOURS") {
            self.ledger.retention_hours = parse_var("LESEWERK_LEDGER_RETENTION_HOURS", &v)?;
        }
        Ok(())
    }

    /// Reject settings the pipeline cannot honour.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.job.confidence_floor) {
            return Err(LesewerkError::Config(format!(
                "confidence_floor must be within [0, 1], got {}",
                self.job.confidence_floor
            )));
        }
        if self.pool.page_timeout_ms == 0 {
            return Err(LesewerkError::Config("page_timeout_ms must be > 0".into()));
        }
        if self.job.document_timeout_ms == 0 {
            return Err(LesewerkError::Config(
                "document_timeout_ms must be > 0".into(),
            ));
        }
        if self.limits.max_dimension < 16 {
            return Err(LesewerkError::Config(format!(
                "max_dimension {} is too small to recognise anything",
                self.limits.max_dimension
            )));
        }
        if self.limits.max_pages_per_document == 0 || self.limits.max_files_per_document == 0 {
            return Err(LesewerkError::Config(
                "per-document file and page limits must be > 0".into(),
            ));
        }
        if self.preprocess.denoise_sigma < 0.0 {
            return Err(LesewerkError::Config("denoise_sigma must be >= 0".into()));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| LesewerkError::Config(format!("{name}: cannot parse {value:?}")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(LesewerkError::Config(format!(
            "{name}: expected a boolean, got {value:?}"
        ))),
    }
}
