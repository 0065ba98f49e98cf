// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image Normalizer — turns one uploaded payload into canonical grayscale page
// rasters, or rejects it before any recognition work is scheduled.

use lesewerk_core::config::InputLimits;
use lesewerk_core::error::{LesewerkError, Result};
use lesewerk_core::{MediaType, PageImage, SourceFile, is_generic_mime, warning};
use tracing::{debug, info, instrument, warn};

use crate::image::decode::{RasterDecoder, image_format, sniff};
use crate::image::processor::ImageProcessor;
use crate::pdf::reader::PdfReader;
use crate::scan::enhance::Preprocessor;

/// What the caller told us about a payload's type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declared {
    /// Nothing, or a generic type such as `application/octet-stream`.
    Unspecified,
    Supported(MediaType),
    /// A specific type we do not handle (e.g. `application/msword`).
    Unsupported(String),
}

impl Declared {
    /// Interpret a declared MIME type string.
    pub fn from_mime(mime: Option<&str>) -> Self {
        match mime {
            None => Self::Unspecified,
            Some(m) if is_generic_mime(m) => Self::Unspecified,
            Some(m) => match MediaType::from_mime(m) {
                Some(media_type) => Self::Supported(media_type),
                None => Self::Unsupported(m.to_string()),
            },
        }
    }

    /// Declared type of an uploaded file. A specific MIME type wins; the file
    /// name's extension is only consulted when the MIME type is generic.
    pub fn from_source(file: &SourceFile) -> Self {
        match Self::from_mime(file.declared_type.as_deref()) {
            Self::Unspecified => file
                .declared_media_type()
                .map_or(Self::Unspecified, Self::Supported),
            other => other,
        }
    }
}

/// One page produced by normalising a single payload.
#[derive(Debug, Clone)]
pub struct NormalizedPage {
    /// Position inside the payload (0 for single images).
    pub source_page: usize,
    pub image: PageImage,
    pub warnings: Vec<String>,
    /// Embedded text for pages that had no raster to recognise.
    pub text_layer: Option<String>,
}

/// Output of normalising one payload: its resolved type and its pages in
/// native order.
#[derive(Debug, Clone)]
pub struct NormalizedInput {
    pub media_type: MediaType,
    pub pages: Vec<NormalizedPage>,
}

/// Decodes payloads into canonical page rasters under fixed resource limits.
#[derive(Debug, Clone)]
pub struct Normalizer {
    limits: InputLimits,
    decoder: RasterDecoder,
    preprocessor: Option<Preprocessor>,
}

impl Normalizer {
    pub fn new(limits: InputLimits) -> Self {
        Self {
            decoder: RasterDecoder::new(&limits),
            limits,
            preprocessor: None,
        }
    }

    /// Run recognition pre-processing on every page after normalisation.
    pub fn with_preprocessor(mut self, preprocessor: Preprocessor) -> Self {
        self.preprocessor = Some(preprocessor).filter(Preprocessor::is_enabled);
        self
    }

    pub fn limits(&self) -> &InputLimits {
        &self.limits
    }

    /// Normalise an uploaded file, consuming it so the encoded bytes are
    /// released as soon as decoding finishes.
    pub fn normalize_file(&self, file: SourceFile) -> Result<NormalizedInput> {
        let declared = Declared::from_source(&file);
        let result = self.normalize(&file.bytes, &declared);
        drop(file);
        result
    }

    /// Decode `bytes` into page rasters.
    ///
    /// The sniffed format decides how to decode. Failure kinds are chosen so a
    /// caller can tell "wrong kind of file" (`UnsupportedFormat`) from
    /// "right kind, but damaged" (`DecodeError`).
    #[instrument(skip(self, bytes), fields(bytes_len = bytes.len(), ?declared))]
    pub fn normalize(&self, bytes: &[u8], declared: &Declared) -> Result<NormalizedInput> {
        if bytes.len() > self.limits.max_file_bytes {
            return Err(LesewerkError::InputTooLarge(format!(
                "file is {} bytes, limit is {}",
                bytes.len(),
                self.limits.max_file_bytes
            )));
        }
        if let Declared::Unsupported(mime) = declared {
            return Err(LesewerkError::UnsupportedFormat(mime.clone()));
        }

        let media_type = match (sniff(bytes), declared) {
            (Some(sniffed), Declared::Supported(claimed)) if sniffed != *claimed => {
                debug!(
                    ?sniffed,
                    ?claimed,
                    "Declared type disagrees with content; trusting content"
                );
                sniffed
            }
            (Some(sniffed), _) => sniffed,
            (None, Declared::Supported(claimed)) => {
                return Err(LesewerkError::DecodeError(format!(
                    "payload is not a valid {}",
                    claimed.mime_type()
                )));
            }
            (None, _) => {
                return Err(LesewerkError::UnsupportedFormat(
                    "unrecognised file signature".into(),
                ));
            }
        };

        let pages = match image_format(media_type) {
            Some(format) => {
                let image = self.decoder.decode(bytes, format)?;
                vec![self.finish(0, ImageProcessor::from_dynamic(image), Vec::new())]
            }
            None => self.normalize_pdf(bytes)?,
        };

        info!(?media_type, pages = pages.len(), "Payload normalised");
        Ok(NormalizedInput { media_type, pages })
    }

    fn normalize_pdf(&self, bytes: &[u8]) -> Result<Vec<NormalizedPage>> {
        let reader = PdfReader::from_bytes(bytes)?;
        let count = reader.page_count();
        if count > self.limits.max_pages_per_document {
            return Err(LesewerkError::InputTooLarge(format!(
                "PDF has {count} pages, limit is {}",
                self.limits.max_pages_per_document
            )));
        }

        // Each page is shrunk before the next one is decoded.
        let mut pages = Vec::with_capacity(count);
        for raster in reader.page_rasters(&self.decoder)? {
            let raster = raster?;
            let page = match raster.image {
                Some(image) => {
                    let processor =
                        ImageProcessor::from_dynamic(image).rotate_clockwise(raster.rotation);
                    self.finish(raster.source_page, processor, raster.warnings)
                }
                None => {
                    if raster.text_layer.is_none() {
                        warn!(source_page = raster.source_page, "PDF page has no usable raster");
                    }
                    NormalizedPage {
                        source_page: raster.source_page,
                        image: PageImage::blank(1, 1),
                        warnings: raster.warnings,
                        text_layer: raster.text_layer,
                    }
                }
            };
            pages.push(page);
        }
        Ok(pages)
    }

    /// Bound the size, run pre-processing, and emit the canonical page.
    fn finish(
        &self,
        source_page: usize,
        processor: ImageProcessor,
        mut warnings: Vec<String>,
    ) -> NormalizedPage {
        let processor = processor.fit_within(self.limits.max_dimension);
        if processor.was_downsampled() {
            warnings.push(warning::DOWNSAMPLED.into());
        }
        let gray = processor.into_gray();
        let gray = match &self.preprocessor {
            Some(pre) => pre.apply(gray),
            None => gray,
        };
        NormalizedPage {
            source_page,
            image: ImageProcessor::from_gray(gray).into_page_image(),
            warnings,
            text_layer: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::reader::tests::{TestPage, build_pdf};
    use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
    use std::io::Cursor;

    fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut out = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut out), format)
            .expect("encode test image");
        out
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        encode(
            DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([20, 40, 60]))),
            ImageFormat::Png,
        )
    }

    fn normalizer() -> Normalizer {
        Normalizer::new(InputLimits::default())
    }

    #[test]
    fn single_image_yields_one_gray_page() {
        let out = normalizer()
            .normalize(&png(40, 30), &Declared::Unspecified)
            .expect("normalize");
        assert_eq!(out.media_type, MediaType::Png);
        assert_eq!(out.pages.len(), 1);
        let page = &out.pages[0].image;
        assert_eq!((page.width, page.height), (40, 30));
        assert_eq!(page.pixels.len(), 40 * 30);
    }

    #[test]
    fn sniffed_format_beats_wrong_declaration() {
        let bmp = encode(
            DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 8, Luma([0]))),
            ImageFormat::Bmp,
        );
        let out = normalizer()
            .normalize(&bmp, &Declared::Supported(MediaType::Png))
            .expect("normalize");
        assert_eq!(out.media_type, MediaType::Bmp);
    }

    #[test]
    fn unknown_bytes_are_unsupported() {
        let err = normalizer()
            .normalize(b"just some text", &Declared::Unspecified)
            .expect_err("not an image");
        assert_eq!(err.kind(), "UnsupportedFormat");
    }

    #[test]
    fn unknown_bytes_claiming_an_image_are_corrupt() {
        let err = normalizer()
            .normalize(b"just some text", &Declared::Supported(MediaType::Jpeg))
            .expect_err("not a jpeg");
        assert_eq!(err.kind(), "DecodeError");
    }

    #[test]
    fn unsupported_declaration_is_rejected() {
        let declared = Declared::from_mime(Some("application/msword"));
        let err = normalizer()
            .normalize(&png(4, 4), &declared)
            .expect_err("word docs are not accepted");
        assert_eq!(err.kind(), "UnsupportedFormat");
    }

    #[test]
    fn truncated_image_is_a_decode_error() {
        let mut bytes = png(40, 30);
        bytes.truncate(bytes.len() / 2);
        let err = normalizer()
            .normalize(&bytes, &Declared::Unspecified)
            .expect_err("truncated");
        assert_eq!(err.kind(), "DecodeError");
    }

    #[test]
    fn byte_ceiling_is_enforced() {
        let limits = InputLimits {
            max_file_bytes: 16,
            ..InputLimits::default()
        };
        let err = Normalizer::new(limits)
            .normalize(&png(4, 4), &Declared::Unspecified)
            .expect_err("too many bytes");
        assert_eq!(err.kind(), "InputTooLarge");
    }

    #[test]
    fn pixel_ceiling_is_enforced() {
        let limits = InputLimits {
            max_decode_pixels: 100,
            ..InputLimits::default()
        };
        let err = Normalizer::new(limits)
            .normalize(&png(40, 30), &Declared::Unspecified)
            .expect_err("too many pixels");
        assert_eq!(err.kind(), "InputTooLarge");
    }

    #[test]
    fn oversized_images_are_downsampled() {
        let limits = InputLimits {
            max_dimension: 20,
            ..InputLimits::default()
        };
        let out = Normalizer::new(limits)
            .normalize(&png(80, 40), &Declared::Unspecified)
            .expect("normalize");
        let page = &out.pages[0];
        assert_eq!((page.image.width, page.image.height), (20, 10));
        assert!(page.warnings.iter().any(|w| w == warning::DOWNSAMPLED));
    }

    #[test]
    fn pdf_pages_come_out_in_order_and_rotated() {
        let pdf = build_pdf(
            &[
                TestPage::Gray {
                    width: 10,
                    height: 20,
                    value: 0,
                },
                TestPage::Empty,
            ],
            90,
        );
        let out = normalizer()
            .normalize(&pdf, &Declared::Supported(MediaType::Pdf))
            .expect("normalize");
        assert_eq!(out.media_type, MediaType::Pdf);
        assert_eq!(out.pages.len(), 2);
        assert_eq!((out.pages[0].image.width, out.pages[0].image.height), (20, 10));
        assert_eq!(out.pages[1].source_page, 1);
        assert_eq!(out.pages[1].image, PageImage::blank(1, 1));
        assert!(out.pages[1].warnings.iter().any(|w| w == warning::NO_RASTER_CONTENT));
    }

    #[test]
    fn born_digital_pdf_page_keeps_its_text() {
        let pdf = build_pdf(&[TestPage::Text("Quarterly report")], 0);
        let out = normalizer()
            .normalize(&pdf, &Declared::Unspecified)
            .expect("normalize");
        assert_eq!(out.pages.len(), 1);
        assert_eq!(out.pages[0].text_layer.as_deref(), Some("Quarterly report"));
        assert_eq!(out.pages[0].image, PageImage::blank(1, 1));
    }

    #[test]
    fn pdf_flate_bomb_is_too_large() {
        let limits = InputLimits {
            max_decode_pixels: 100,
            ..InputLimits::default()
        };
        let pdf = build_pdf(&[TestPage::FlateBomb { inflated: 4 << 20 }], 0);
        let err = Normalizer::new(limits)
            .normalize(&pdf, &Declared::Unspecified)
            .expect_err("bounded inflation");
        assert_eq!(err.kind(), "InputTooLarge");
    }

    #[test]
    fn pdf_pages_are_downsampled_as_they_are_decoded() {
        let limits = InputLimits {
            max_dimension: 8,
            ..InputLimits::default()
        };
        let page = || TestPage::FlateGray {
            width: 64,
            height: 32,
            value: 200,
        };
        let pdf = build_pdf(&[page(), page(), page()], 0);
        let out = Normalizer::new(limits)
            .normalize(&pdf, &Declared::Unspecified)
            .expect("normalize");
        assert_eq!(out.pages.len(), 3);
        for page in &out.pages {
            assert_eq!((page.image.width, page.image.height), (8, 4));
            assert!(page.warnings.iter().any(|w| w == warning::DOWNSAMPLED));
        }
    }

    #[test]
    fn png_mentioning_pdf_in_metadata_is_still_an_image() {
        // A leading `%PDF-` only counts when no raster signature matches.
        let mut bytes = png(4, 4);
        bytes.extend_from_slice(b"%PDF-1.4 trailing junk");
        let out = normalizer()
            .normalize(&bytes, &Declared::Unspecified)
            .expect("normalize");
        assert_eq!(out.media_type, MediaType::Png);
    }

    #[test]
    fn pdf_page_ceiling_is_enforced() {
        let limits = InputLimits {
            max_pages_per_document: 1,
            ..InputLimits::default()
        };
        let pdf = build_pdf(&[TestPage::Empty, TestPage::Empty], 0);
        let err = Normalizer::new(limits)
            .normalize(&pdf, &Declared::Unspecified)
            .expect_err("too many pages");
        assert_eq!(err.kind(), "InputTooLarge");
    }

    #[test]
    fn declared_type_falls_back_to_file_name() {
        let file = SourceFile::new(Vec::new())
            .with_declared_type("application/octet-stream")
            .with_name("scan.png");
        assert_eq!(Declared::from_source(&file), Declared::Supported(MediaType::Png));

        let file = SourceFile::new(Vec::new()).with_declared_type("text/plain");
        assert_eq!(
            Declared::from_source(&file),
            Declared::Unsupported("text/plain".into())
        );
    }

    #[test]
    fn preprocessing_runs_after_normalisation() {
        let pre = Preprocessor::new(lesewerk_core::config::PreprocessConfig {
            stretch_contrast: false,
            denoise_sigma: 0.0,
            binarize: true,
        });
        let out = normalizer()
            .with_preprocessor(pre)
            .normalize_file(SourceFile::new(png(6, 6)))
            .expect("normalize");
        assert!(out.pages[0].image.pixels.iter().all(|&p| p == 0 || p == 255));
    }
}
