// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Lesewerk OCR pipeline.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an OCR job (one submitted document).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse the textual form produced by `Display`.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Input formats the normalizer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaType {
    Png,
    Jpeg,
    Tiff,
    Bmp,
    Gif,
    WebP,
    /// Multi-page container; pages are extracted from embedded images.
    Pdf,
}

impl MediaType {
    /// Canonical MIME type string.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Tiff => "image/tiff",
            Self::Bmp => "image/bmp",
            Self::Gif => "image/gif",
            Self::WebP => "image/webp",
            Self::Pdf => "application/pdf",
        }
    }

    /// Map a declared MIME type (parameters and case ignored).
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            "image/tiff" | "image/tif" => Some(Self::Tiff),
            "image/bmp" | "image/x-bmp" | "image/x-ms-bmp" => Some(Self::Bmp),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::WebP),
            "application/pdf" | "application/x-pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    /// Infer media type from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "tif" | "tiff" => Some(Self::Tiff),
            "bmp" => Some(Self::Bmp),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::WebP),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }
}

/// Whether a declared type is a generic placeholder that carries no format
/// information (browsers send these for unknown files).
pub fn is_generic_mime(mime: &str) -> bool {
    let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    essence.is_empty() || essence == "application/octet-stream" || essence == "binary/octet-stream"
}

/// One uploaded payload, before decoding.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Client-supplied file name, if any.
    pub name: Option<String>,
    /// Declared media type (`Content-Type` of the part or request).
    pub declared_type: Option<String>,
    /// Raw encoded bytes.
    pub bytes: Vec<u8>,
}

impl SourceFile {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            name: None,
            declared_type: None,
            bytes,
        }
    }

    pub fn with_declared_type(mut self, mime: impl Into<String>) -> Self {
        self.declared_type = Some(mime.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Declared type resolved to a `MediaType`, falling back to the file
    /// name's extension when no specific MIME type was given.
    pub fn declared_media_type(&self) -> Option<MediaType> {
        let from_mime = self
            .declared_type
            .as_deref()
            .filter(|m| !is_generic_mime(m))
            .and_then(MediaType::from_mime);
        from_mime.or_else(|| {
            self.name
                .as_deref()
                .and_then(|n| n.rsplit_once('.'))
                .and_then(|(_, ext)| MediaType::from_extension(ext))
        })
    }
}

/// The unit of work submitted by a caller.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: JobId,
    /// Source files in submission order.
    pub files: Vec<SourceFile>,
    pub submitted_at: DateTime<Utc>,
}

impl Document {
    pub fn new(files: Vec<SourceFile>) -> Self {
        Self {
            id: JobId::new(),
            files,
            submitted_at: Utc::now(),
        }
    }

    pub fn single(file: SourceFile) -> Self {
        Self::new(vec![file])
    }

    /// Sum of raw payload sizes.
    pub fn total_bytes(&self) -> usize {
        self.files.iter().map(|f| f.bytes.len()).sum()
    }
}

/// Canonical raster handed to the OCR engine: 8-bit grayscale, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl PageImage {
    /// Build from raw luma samples. Returns `None` when the buffer length
    /// does not match the dimensions.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        if pixels.len() as u64 != width as u64 * height as u64 {
            return None;
        }
        Some(Self {
            width,
            height,
            pixels,
        })
    }

    /// A white raster, used for pages that have nothing to decode.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![255; width as usize * height as usize],
        }
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// One normalized raster unit derived from a document.
#[derive(Debug, Clone)]
pub struct Page {
    /// 0-based position within the document, contiguous across files.
    pub index: usize,
    /// Which source file this page came from.
    pub source_file: usize,
    /// Page position inside the source file (0 for single images).
    pub source_page: usize,
    pub image: PageImage,
    /// Problems found while preparing the page (carried into its result).
    pub warnings: Vec<String>,
    /// Text already embedded in the source (a PDF text layer). When set the
    /// page is answered from it and never reaches the engine.
    pub text_layer: Option<String>,
}

/// Axis-aligned region in page pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A recognized run of text with its engine-reported confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<BoundingBox>,
}

impl TextBlock {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            bounds: None,
        }
    }

    pub fn with_bounds(mut self, bounds: BoundingBox) -> Self {
        self.bounds = Some(bounds);
        self
    }
}

/// Raw output of one engine call, before sanitising.
#[derive(Debug, Clone, Default)]
pub struct EngineOutput {
    /// Text blocks in reading order.
    pub blocks: Vec<TextBlock>,
    /// Warnings reported by the engine itself.
    pub warnings: Vec<String>,
}

/// Why a page has no usable recognition output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageFailure {
    RecognitionTimeout,
    EngineError,
    PoolSaturated,
    Cancelled,
    /// No result arrived for this index.
    Missing,
}

impl PageFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecognitionTimeout => "RecognitionTimeout",
            Self::EngineError => "EngineError",
            Self::PoolSaturated => "PoolSaturated",
            Self::Cancelled => "Cancelled",
            Self::Missing => "Missing",
        }
    }
}

impl std::fmt::Display for PageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one OCR invocation on one page. Confidences are already
/// clamped to [0, 1].
#[derive(Debug, Clone)]
pub struct RecognitionResult {
    pub page_index: usize,
    pub blocks: Vec<TextBlock>,
    /// Page-level confidence in [0, 1].
    pub confidence: f32,
    pub warnings: Vec<String>,
    pub elapsed: Duration,
    /// Set when the page failed; the text is then empty and confidence 0.
    pub failure: Option<PageFailure>,
    /// Human-readable detail for a failure (engine message etc.).
    pub failure_detail: Option<String>,
}

impl RecognitionResult {
    /// A failed page: empty text, confidence 0, and the failure kind recorded
    /// as a warning.
    pub fn failed(
        page_index: usize,
        failure: PageFailure,
        detail: Option<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            page_index,
            blocks: Vec::new(),
            confidence: 0.0,
            warnings: vec![failure.as_str().to_string()],
            elapsed,
            failure: Some(failure),
            failure_detail: detail,
        }
    }

    /// Block texts joined by newlines.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Overall outcome of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Every page recognized at or above the confidence floor.
    Ok,
    /// At least one page succeeded, at least one failed or fell short.
    Partial,
    /// No page succeeded.
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

/// Per-page entry of a `DocumentResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageReport {
    pub index: usize,
    pub text: String,
    pub confidence: f32,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<PageFailure>,
    pub elapsed_ms: u64,
    pub blocks: Vec<TextBlock>,
}

/// Category of a diagnostics entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    RecognitionTimeout,
    EngineError,
    PoolSaturated,
    Cancelled,
    Missing,
    /// Page recognized but under the configured confidence floor.
    LowConfidence,
}

impl From<PageFailure> for DiagnosticKind {
    fn from(failure: PageFailure) -> Self {
        match failure {
            PageFailure::RecognitionTimeout => Self::RecognitionTimeout,
            PageFailure::EngineError => Self::EngineError,
            PageFailure::PoolSaturated => Self::PoolSaturated,
            PageFailure::Cancelled => Self::Cancelled,
            PageFailure::Missing => Self::Missing,
        }
    }
}

/// One problem worth surfacing to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub page_index: usize,
    pub kind: DiagnosticKind,
    pub message: String,
}

/// Aggregated result for a whole document, pages in index order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResult {
    pub job_id: JobId,
    pub status: DocumentStatus,
    /// All page texts with page-boundary markers.
    pub text: String,
    pub pages: Vec<PageReport>,
    pub overall_confidence: f32,
    pub min_confidence: f32,
    pub diagnostics: Vec<Diagnostic>,
    pub elapsed_ms: u64,
}

impl DocumentResult {
    /// Indices of pages that failed outright (not merely low confidence).
    pub fn failed_pages(&self) -> Vec<usize> {
        self.pages
            .iter()
            .filter(|p| p.failure.is_some())
            .map(|p| p.index)
            .collect()
    }
}

/// Warning strings attached to pages and results.
pub mod warning {
    /// A PDF page had no embedded raster; the page was recognised as blank.
    pub const NO_RASTER_CONTENT: &str = "NoRasterContent";
    /// A PDF page image used a compression or colour model we cannot decode.
    pub const UNSUPPORTED_IMAGE_ENCODING: &str = "UnsupportedImageEncoding";
    /// Several images on one PDF page; only the largest was used.
    pub const MULTIPLE_IMAGES_ON_PAGE: &str = "MultipleImagesOnPage";
    /// The page was shrunk to the configured maximum dimension.
    pub const DOWNSAMPLED: &str = "Downsampled";
    /// The engine reported a confidence outside [0, 1].
    pub const CONFIDENCE_CLAMPED: &str = "ConfidenceClamped";
    /// Recognition succeeded but found no text.
    pub const NO_TEXT_DETECTED: &str = "NoTextDetected";
    /// Text came from the PDF's own text layer, not from the engine.
    pub const TEXT_LAYER: &str = "TextLayer";
}
