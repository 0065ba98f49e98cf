// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// OCR engine binding backed by the `ocrs` crate, a pure-Rust OCR engine whose
// neural network models run on `rten`.
//
// # Feature Gate
//
// This module is only available when the `ocr` feature is enabled.
//
// # Model Setup
//
// Two model files are needed, `text-detection.rten` and
// `text-recognition.rten`. Running `ocrs-cli` once downloads them to
// `$XDG_CACHE_HOME/ocrs` (typically `~/.cache/ocrs`), which is where we look
// when no directory is configured.

use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage};
use lesewerk_core::config::OcrModelConfig;
use lesewerk_core::error::{LesewerkError, Result};
use lesewerk_core::{BoundingBox, EngineOutput, PageImage, Recognizer, TextBlock};
use ocrs::{ImageSource, OcrEngine, OcrEngineParams, TextItem};
use rten::Model;
use tracing::{debug, info, instrument};

const DETECTION_MODEL_FILENAME: &str = "text-detection.rten";
const RECOGNITION_MODEL_FILENAME: &str = "text-recognition.rten";

/// Characters that commonly appear in printed text besides letters and
/// digits.
const PLAUSIBLE_PUNCTUATION: &str = ".,;:!?'\"()[]-/&%$@#+*=_€£§°";

/// `$XDG_CACHE_HOME/ocrs`, falling back to `~/.cache/ocrs`.
fn default_model_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        PathBuf::from(xdg).join("ocrs")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".cache").join("ocrs")
    } else {
        PathBuf::from("ocrs-models")
    }
}

/// Locations of the two model files.
#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub detection_model_path: PathBuf,
    pub recognition_model_path: PathBuf,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self::from_dir(default_model_dir())
    }
}

impl OcrConfig {
    /// Expect both well-known model files inside `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            detection_model_path: dir.join(DETECTION_MODEL_FILENAME),
            recognition_model_path: dir.join(RECOGNITION_MODEL_FILENAME),
        }
    }

    /// Honour the service's configured model directory, if any.
    pub fn from_service(config: &OcrModelConfig) -> Self {
        match &config.model_dir {
            Some(dir) => Self::from_dir(dir),
            None => Self::default(),
        }
    }

    /// Verify that both model files exist.
    pub fn validate(&self) -> Result<()> {
        for path in [&self.detection_model_path, &self.recognition_model_path] {
            if !path.exists() {
                return Err(LesewerkError::EngineError(format!(
                    "OCR model not found at {}; run `ocrs-cli` once to download models",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

/// `Recognizer` implementation over an `ocrs` engine.
///
/// Model loading is the expensive step; build one instance at start-up and
/// share it between all pool workers.
pub struct OcrsRecognizer {
    engine: OcrEngine,
}

impl OcrsRecognizer {
    /// Load both models and initialise the engine.
    ///
    /// **Important:** `ocrs` and `rten` are 10-100x slower in debug builds.
    #[instrument(skip_all, fields(
        detection = %config.detection_model_path.display(),
        recognition = %config.recognition_model_path.display(),
    ))]
    pub fn new(config: OcrConfig) -> Result<Self> {
        config.validate()?;

        info!("Loading OCR detection model");
        let detection_model = Model::load_file(&config.detection_model_path).map_err(|err| {
            LesewerkError::EngineError(format!(
                "failed to load detection model from {}: {err}",
                config.detection_model_path.display()
            ))
        })?;

        info!("Loading OCR recognition model");
        let recognition_model =
            Model::load_file(&config.recognition_model_path).map_err(|err| {
                LesewerkError::EngineError(format!(
                    "failed to load recognition model from {}: {err}",
                    config.recognition_model_path.display()
                ))
            })?;

        let engine = OcrEngine::new(OcrEngineParams {
            detection_model: Some(detection_model),
            recognition_model: Some(recognition_model),
            ..Default::default()
        })
        .map_err(|err| {
            LesewerkError::EngineError(format!("failed to initialise OCR engine: {err}"))
        })?;

        info!("OCR engine initialised");
        Ok(Self { engine })
    }
}

impl Recognizer for OcrsRecognizer {
    fn name(&self) -> &str {
        "ocrs"
    }

    /// One text block per detected line, in reading order.
    ///
    /// `ocrs` does not report a confidence, so each line is scored by how
    /// much of it looks like printed text.
    #[instrument(skip_all, fields(width = image.width, height = image.height))]
    fn recognize(&self, image: &PageImage) -> Result<EngineOutput> {
        let gray = GrayImage::from_raw(image.width, image.height, image.pixels.clone())
            .ok_or_else(|| {
                LesewerkError::EngineError("page buffer does not match its size".into())
            })?;
        // ocrs expects RGB input.
        let rgb = DynamicImage::ImageLuma8(gray).to_rgb8();

        let source = ImageSource::from_bytes(rgb.as_raw(), rgb.dimensions()).map_err(|err| {
            LesewerkError::EngineError(format!(
                "failed to create image source ({}x{}): {err}",
                image.width, image.height
            ))
        })?;
        let input = self
            .engine
            .prepare_input(source)
            .map_err(|err| LesewerkError::EngineError(format!("OCR preprocessing failed: {err}")))?;

        let word_rects = self
            .engine
            .detect_words(&input)
            .map_err(|err| LesewerkError::EngineError(format!("word detection failed: {err}")))?;
        let line_rects = self.engine.find_text_lines(&input, &word_rects);
        let lines = self
            .engine
            .recognize_text(&input, &line_rects)
            .map_err(|err| LesewerkError::EngineError(format!("line recognition failed: {err}")))?;

        let blocks: Vec<TextBlock> = lines
            .iter()
            .flatten()
            .filter_map(|line| {
                let text = line.to_string();
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return None;
                }
                let rect = line.bounding_rect();
                let bounds = BoundingBox {
                    x: rect.left().max(0) as u32,
                    y: rect.top().max(0) as u32,
                    width: rect.width().max(0) as u32,
                    height: rect.height().max(0) as u32,
                };
                Some(TextBlock::new(trimmed, plausibility(trimmed)).with_bounds(bounds))
            })
            .collect();

        debug!(
            words = word_rects.len(),
            lines = blocks.len(),
            "OCR recognition complete"
        );
        Ok(EngineOutput {
            blocks,
            warnings: Vec::new(),
        })
    }
}

/// Share of non-space characters that are letters, digits, or common
/// punctuation. Garbage recognitions of noise score low.
pub fn plausibility(text: &str) -> f32 {
    let (good, total) = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .fold((0u32, 0u32), |(good, total), c| {
            let ok = c.is_alphanumeric() || PLAUSIBLE_PUNCTUATION.contains(c);
            (good + ok as u32, total + 1)
        });
    if total == 0 {
        return 0.0;
    }
    good as f32 / total as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_dir() {
        let config = OcrConfig::from_dir("/tmp/my-models");
        assert_eq!(
            config.detection_model_path,
            PathBuf::from("/tmp/my-models/text-detection.rten")
        );
        assert_eq!(
            config.recognition_model_path,
            PathBuf::from("/tmp/my-models/text-recognition.rten")
        );
    }

    #[test]
    fn service_model_dir_is_honoured() {
        let config = OcrConfig::from_service(&OcrModelConfig {
            model_dir: Some(PathBuf::from("/srv/models")),
        });
        assert!(config.detection_model_path.starts_with("/srv/models"));
    }

    #[test]
    fn missing_models_fail_validation() {
        let err = OcrConfig::from_dir("/nonexistent/path/ocr-models")
            .validate()
            .expect_err("models missing");
        assert_eq!(err.kind(), "EngineError");
    }

    #[test]
    fn plausibility_scores_clean_text_high() {
        assert_eq!(plausibility("Hello, world."), 1.0);
        assert!(plausibility("~~|^^~") < 0.2);
        assert_eq!(plausibility("   "), 0.0);
    }
}
