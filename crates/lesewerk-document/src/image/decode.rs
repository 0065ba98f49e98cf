// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bounded raster decoding: format sniffing, header-first size checks,
// decoder allocation limits, and EXIF orientation.

use std::io::Cursor;

use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageError, ImageFormat, ImageReader, Limits};
use lesewerk_core::config::InputLimits;
use lesewerk_core::error::{LesewerkError, Result};
use lesewerk_core::MediaType;
use tracing::{debug, instrument};

const PDF_MAGIC: &[u8] = b"%PDF-";
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
/// Leading whitespace tolerated before a PDF header.
const PDF_LEADING_ALLOWANCE: usize = 1024;

/// Identify a payload from its leading bytes.
///
/// Raster signatures are checked first. A PDF header may follow a BOM and
/// some whitespace, since many writers emit those before it.
pub fn sniff(bytes: &[u8]) -> Option<MediaType> {
    if let Some(media_type) = image::guess_format(bytes).ok().and_then(media_type_for) {
        return Some(media_type);
    }
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let start = body
        .iter()
        .take(PDF_LEADING_ALLOWANCE)
        .position(|b| !b.is_ascii_whitespace() && *b != 0)?;
    body[start..].starts_with(PDF_MAGIC).then_some(MediaType::Pdf)
}

fn media_type_for(format: ImageFormat) -> Option<MediaType> {
    match format {
        ImageFormat::Png => Some(MediaType::Png),
        ImageFormat::Jpeg => Some(MediaType::Jpeg),
        ImageFormat::Tiff => Some(MediaType::Tiff),
        ImageFormat::Bmp => Some(MediaType::Bmp),
        ImageFormat::Gif => Some(MediaType::Gif),
        ImageFormat::WebP => Some(MediaType::WebP),
        _ => None,
    }
}

/// The `image` crate format for a raster media type; `None` for containers.
pub fn image_format(media_type: MediaType) -> Option<ImageFormat> {
    match media_type {
        MediaType::Png => Some(ImageFormat::Png),
        MediaType::Jpeg => Some(ImageFormat::Jpeg),
        MediaType::Tiff => Some(ImageFormat::Tiff),
        MediaType::Bmp => Some(ImageFormat::Bmp),
        MediaType::Gif => Some(ImageFormat::Gif),
        MediaType::WebP => Some(ImageFormat::WebP),
        MediaType::Pdf => None,
    }
}

/// Decodes encoded rasters without letting a hostile header allocate
/// unbounded memory.
#[derive(Debug, Clone)]
pub struct RasterDecoder {
    max_decode_pixels: u64,
}

impl RasterDecoder {
    pub fn new(limits: &InputLimits) -> Self {
        Self {
            max_decode_pixels: limits.max_decode_pixels,
        }
    }

    /// Reject a raster whose declared size is beyond what we will decode.
    pub fn check_dimensions(&self, width: u32, height: u32) -> Result<()> {
        let pixels = width as u64 * height as u64;
        if pixels > self.max_decode_pixels {
            return Err(LesewerkError::InputTooLarge(format!(
                "{width}x{height} is {pixels} pixels, limit is {}",
                self.max_decode_pixels
            )));
        }
        if width == 0 || height == 0 {
            return Err(LesewerkError::DecodeError(format!(
                "image has empty dimensions {width}x{height}"
            )));
        }
        Ok(())
    }

    /// Decode `bytes` as `format`, applying any embedded orientation.
    #[instrument(skip(self, bytes), fields(bytes_len = bytes.len(), ?format))]
    pub fn decode(&self, bytes: &[u8], format: ImageFormat) -> Result<DynamicImage> {
        let (width, height) = ImageReader::with_format(Cursor::new(bytes), format)
            .into_dimensions()
            .map_err(map_image_error)?;
        self.check_dimensions(width, height)?;

        let mut reader = ImageReader::with_format(Cursor::new(bytes), format);
        let mut limits = Limits::default();
        // Worst case is 16-bit RGBA: 8 bytes per pixel.
        limits.max_alloc = Some(self.max_decode_pixels.saturating_mul(8));
        reader.limits(limits);

        let mut decoder = reader.into_decoder().map_err(map_image_error)?;
        // Missing or unreadable metadata means "as decoded".
        let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
        let mut image = DynamicImage::from_decoder(decoder).map_err(map_image_error)?;
        if orientation != Orientation::NoTransforms {
            debug!(?orientation, "Applying embedded orientation");
            image.apply_orientation(orientation);
        }
        Ok(image)
    }
}

fn map_image_error(err: ImageError) -> LesewerkError {
    match err {
        ImageError::Limits(detail) => LesewerkError::InputTooLarge(detail.to_string()),
        other => LesewerkError::DecodeError(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = GrayImage::from_pixel(width, height, Luma([200]));
        let mut out = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .expect("encode png");
        out
    }

    fn decoder(max_decode_pixels: u64) -> RasterDecoder {
        RasterDecoder::new(&InputLimits {
            max_decode_pixels,
            ..InputLimits::default()
        })
    }

    /// Standard CRC-32 as used by PNG chunks.
    fn crc32(data: &[u8]) -> u32 {
        let mut crc = 0xFFFF_FFFFu32;
        for &byte in data {
            crc ^= byte as u32;
            for _ in 0..8 {
                let mask = (crc & 1).wrapping_neg();
                crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
            }
        }
        !crc
    }

    /// Insert a `tEXt` chunk right after IHDR.
    fn png_with_text(text: &[u8]) -> Vec<u8> {
        let plain = png_bytes(8, 8);
        // Signature (8) + IHDR chunk (4 + 4 + 13 + 4).
        let (head, tail) = plain.split_at(33);
        let mut chunk_body = b"tEXt".to_vec();
        chunk_body.extend_from_slice(b"Comment\0");
        chunk_body.extend_from_slice(text);

        let mut out = head.to_vec();
        out.extend_from_slice(&((chunk_body.len() - 4) as u32).to_be_bytes());
        out.extend_from_slice(&chunk_body);
        out.extend_from_slice(&crc32(&chunk_body).to_be_bytes());
        out.extend_from_slice(tail);
        out
    }

    /// Insert an EXIF APP1 segment carrying `orientation` after SOI.
    fn jpeg_with_orientation(width: u32, height: u32, orientation: u16) -> Vec<u8> {
        let mut plain = Vec::new();
        DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([120])))
            .write_to(&mut Cursor::new(&mut plain), ImageFormat::Jpeg)
            .expect("encode jpeg");

        let mut tiff = b"MM\0\x2a".to_vec();
        tiff.extend_from_slice(&8u32.to_be_bytes());
        tiff.extend_from_slice(&1u16.to_be_bytes());
        tiff.extend_from_slice(&0x0112u16.to_be_bytes());
        tiff.extend_from_slice(&3u16.to_be_bytes());
        tiff.extend_from_slice(&1u32.to_be_bytes());
        tiff.extend_from_slice(&orientation.to_be_bytes());
        tiff.extend_from_slice(&[0, 0]);
        tiff.extend_from_slice(&0u32.to_be_bytes());

        let mut payload = b"Exif\0\0".to_vec();
        payload.extend_from_slice(&tiff);

        let mut out = plain[..2].to_vec();
        out.extend_from_slice(&[0xFF, 0xE1]);
        out.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        out.extend_from_slice(&payload);
        out.extend_from_slice(&plain[2..]);
        out
    }

    #[test]
    fn sniffs_png_and_pdf() {
        assert_eq!(sniff(&png_bytes(2, 2)), Some(MediaType::Png));
        assert_eq!(sniff(b"%PDF-1.7\n..."), Some(MediaType::Pdf));
        assert_eq!(sniff(b"\n\n%PDF-1.4"), Some(MediaType::Pdf));
        assert_eq!(sniff(b"\xEF\xBB\xBF%PDF-1.4"), Some(MediaType::Pdf));
        assert_eq!(sniff(b"hello world"), None);
        assert_eq!(sniff(b"see %PDF-1.4 below"), None);
        assert_eq!(sniff(&[]), None);
    }

    #[test]
    fn pdf_marker_inside_image_metadata_stays_an_image() {
        let bytes = png_with_text(b"converted from %PDF-1.4 source");
        assert_eq!(sniff(&bytes), Some(MediaType::Png));
        let img = decoder(10_000)
            .decode(&bytes, ImageFormat::Png)
            .expect("decode png with text chunk");
        assert_eq!((img.width(), img.height()), (8, 8));
    }

    #[test]
    fn exif_orientation_is_applied() {
        // Orientation 6: rotate 90 degrees clockwise to display.
        let bytes = jpeg_with_orientation(16, 8, 6);
        let img = decoder(10_000)
            .decode(&bytes, ImageFormat::Jpeg)
            .expect("decode");
        assert_eq!((img.width(), img.height()), (8, 16));

        let upright = jpeg_with_orientation(16, 8, 1);
        let img = decoder(10_000)
            .decode(&upright, ImageFormat::Jpeg)
            .expect("decode");
        assert_eq!((img.width(), img.height()), (16, 8));
    }

    #[test]
    fn decodes_within_limits() {
        let img = decoder(10_000)
            .decode(&png_bytes(20, 10), ImageFormat::Png)
            .expect("decode");
        assert_eq!((img.width(), img.height()), (20, 10));
    }

    #[test]
    fn oversized_header_is_rejected_before_decoding() {
        let err = decoder(100)
            .decode(&png_bytes(20, 10), ImageFormat::Png)
            .expect_err("too many pixels");
        assert_eq!(err.kind(), "InputTooLarge");
    }

    #[test]
    fn truncated_payload_is_a_decode_error() {
        let mut bytes = png_bytes(20, 10);
        bytes.truncate(40);
        let err = decoder(10_000)
            .decode(&bytes, ImageFormat::Png)
            .expect_err("truncated");
        assert_eq!(err.kind(), "DecodeError");
    }
}
