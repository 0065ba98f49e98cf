// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF reader — walks the page tree of a scanned PDF and pulls out the raster
// behind each page using the `lopdf` crate.

use std::borrow::Cow;
use std::io::Read;

use flate2::read::ZlibDecoder;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lesewerk_core::error::{LesewerkError, Result};
use lesewerk_core::warning;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::{debug, instrument, warn};

use crate::image::decode::RasterDecoder;

/// Parent links followed before giving up on inherited attributes.
const MAX_TREE_DEPTH: usize = 32;
/// Inflated bytes allowed beyond an image's expected sample length.
const INFLATE_SLACK: usize = 4096;
/// Ceiling on a page's inflated content streams before text extraction.
const MAX_CONTENT_BYTES: usize = 8 * 1024 * 1024;

/// The raster found behind one PDF page.
#[derive(Debug)]
pub struct PdfPageRaster {
    /// 0-based position in the page tree.
    pub source_page: usize,
    /// `None` when the page had nothing we could decode.
    pub image: Option<DynamicImage>,
    /// Embedded text of a page without a usable raster.
    pub text_layer: Option<String>,
    /// Clockwise `/Rotate` value, already normalised to 0..360.
    pub rotation: i64,
    pub warnings: Vec<String>,
}

/// Read-only view over a PDF loaded from memory.
pub struct PdfReader {
    document: Document,
}

impl PdfReader {
    // -- Construction ---------------------------------------------------------

    /// Parse a PDF already in memory. Structural damage is a `DecodeError`.
    #[instrument(skip_all, fields(bytes_len = data.len()))]
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let document = Document::load_mem(data)
            .map_err(|err| LesewerkError::DecodeError(format!("failed to load PDF: {err}")))?;

        debug!(pages = document.get_pages().len(), "PDF loaded from bytes");
        Ok(Self { document })
    }

    // -- Inspection -----------------------------------------------------------

    pub fn page_count(&self) -> usize {
        self.document.get_pages().len()
    }

    // -- Extraction -----------------------------------------------------------

    /// One raster per page, in page-tree order, decoded lazily.
    ///
    /// Every page yields an entry; pages without a usable image carry a
    /// warning instead of being skipped. Each page is decoded only when the
    /// iterator reaches it, so callers can shrink it before the next one.
    #[instrument(skip_all, fields(pages = self.page_count()))]
    pub fn page_rasters<'a>(
        &'a self,
        decoder: &'a RasterDecoder,
    ) -> Result<impl Iterator<Item = Result<PdfPageRaster>> + 'a> {
        let pages = self.document.get_pages();
        if pages.is_empty() {
            return Err(LesewerkError::DecodeError("PDF has no pages".into()));
        }
        // BTreeMap keys are 1-based page numbers, already in order.
        Ok(pages
            .into_iter()
            .enumerate()
            .map(move |(source_page, (page_number, page_id))| {
                self.page_raster(source_page, page_number, page_id, decoder)
            }))
    }

    fn page_raster(
        &self,
        source_page: usize,
        page_number: u32,
        page_id: ObjectId,
        decoder: &RasterDecoder,
    ) -> Result<PdfPageRaster> {
        let rotation = self
            .inherited(page_id, b"Rotate")
            .and_then(|r| r.as_i64().ok())
            .unwrap_or(0)
            .rem_euclid(360);

        let mut warnings = Vec::new();
        let image = self.page_image(page_id, decoder, &mut warnings)?;
        let text_layer = match image {
            Some(_) => None,
            None => self.text_layer(page_number, page_id)?,
        };
        if image.is_none() {
            debug!(
                source_page,
                has_text = text_layer.is_some(),
                ?warnings,
                "Page has no decodable raster"
            );
        }
        Ok(PdfPageRaster {
            source_page,
            image,
            text_layer,
            rotation,
            warnings,
        })
    }

    fn page_image(
        &self,
        page_id: ObjectId,
        decoder: &RasterDecoder,
        warnings: &mut Vec<String>,
    ) -> Result<Option<DynamicImage>> {
        let mut candidates = self.image_xobjects(page_id);
        if candidates.is_empty() {
            warnings.push(warning::NO_RASTER_CONTENT.into());
            return Ok(None);
        }
        if candidates.len() > 1 {
            warnings.push(warning::MULTIPLE_IMAGES_ON_PAGE.into());
        }

        // Largest image first; scans are full-page, logos and stamps are not.
        candidates.sort_by_key(|(w, h, _)| std::cmp::Reverse(*w as u64 * *h as u64));
        let (width, height, stream) = candidates[0];
        decoder.check_dimensions(width, height)?;

        match self.decode_image_stream(stream, width, height, decoder)? {
            Some(image) => Ok(Some(image)),
            None => {
                warn!(width, height, "Unsupported PDF image encoding");
                warnings.push(warning::UNSUPPORTED_IMAGE_ENCODING.into());
                Ok(None)
            }
        }
    }

    /// Text drawn by the page's content streams, for born-digital pages.
    ///
    /// Unreadable fonts or content mean "no text layer"; only content that
    /// inflates past the ceiling is an error.
    fn text_layer(&self, page_number: u32, page_id: ObjectId) -> Result<Option<String>> {
        let mut content_bytes = 0usize;
        for content_id in self.document.get_page_contents(page_id) {
            let stream = self.document.get_object(content_id).and_then(Object::as_stream);
            let Ok(stream) = stream else {
                continue;
            };
            content_bytes += match self.filters(&stream.dict).as_slice() {
                [] => stream.content.len(),
                [only] if is_flate(only) => {
                    let budget = MAX_CONTENT_BYTES.saturating_sub(content_bytes);
                    inflate_bounded(&stream.content, budget)?.len()
                }
                // Only content whose inflated size can be bounded reaches lopdf.
                _ => return Ok(None),
            };
            if content_bytes > MAX_CONTENT_BYTES {
                return Err(LesewerkError::InputTooLarge(format!(
                    "page content exceeds {MAX_CONTENT_BYTES} bytes"
                )));
            }
        }
        if content_bytes == 0 {
            return Ok(None);
        }

        match self.document.extract_text(&[page_number]) {
            Ok(text) => {
                let text = text.trim();
                Ok((!text.is_empty()).then(|| text.to_string()))
            }
            Err(err) => {
                debug!(page_number, error = %err, "No usable text layer");
                Ok(None)
            }
        }
    }

    /// Image XObjects reachable from the page's (possibly inherited)
    /// resources, with their declared dimensions.
    fn image_xobjects(&self, page_id: ObjectId) -> Vec<(u32, u32, &Stream)> {
        let Some(resources) = self
            .inherited(page_id, b"Resources")
            .and_then(|r| r.as_dict().ok())
        else {
            return Vec::new();
        };
        let Some(xobjects) = resources
            .get(b"XObject")
            .ok()
            .and_then(|x| self.resolve(x))
            .and_then(|x| x.as_dict().ok())
        else {
            return Vec::new();
        };

        xobjects
            .iter()
            .filter_map(|(_, obj)| self.resolve(obj)?.as_stream().ok())
            .filter(|stream| name_of(&stream.dict, b"Subtype") == Some(b"Image".as_slice()))
            .filter_map(|stream| {
                let width = int_of(&stream.dict, b"Width")?;
                let height = int_of(&stream.dict, b"Height")?;
                Some((width, height, stream))
            })
            .collect()
    }

    /// Decode one image stream. `Ok(None)` means "valid PDF, encoding we do
    /// not handle"; errors mean the data itself is damaged or too large.
    fn decode_image_stream(
        &self,
        stream: &Stream,
        width: u32,
        height: u32,
        decoder: &RasterDecoder,
    ) -> Result<Option<DynamicImage>> {
        let filters = self.filters(&stream.dict);
        let is_dct = matches!(
            filters.as_slice(),
            [only] if matches!(only.as_slice(), b"DCTDecode" | b"DCT")
        );
        if is_dct {
            return decoder.decode(&stream.content, ImageFormat::Jpeg).map(Some);
        }

        let is_mask = matches!(stream.dict.get(b"ImageMask"), Ok(Object::Boolean(true)));
        let bits = if is_mask {
            1
        } else {
            int_of(&stream.dict, b"BitsPerComponent").unwrap_or(8)
        };
        let colour = if is_mask {
            Some(Colour::Gray)
        } else {
            stream
                .dict
                .get(b"ColorSpace")
                .ok()
                .and_then(|cs| self.colour_space(cs))
        };
        let Some(colour) = colour else {
            return Ok(None);
        };
        if !matches!(
            (colour, bits),
            (Colour::Gray, 8 | 1) | (Colour::Rgb, 8) | (Colour::Cmyk, 8)
        ) {
            return Ok(None);
        }

        let samples: Cow<'_, [u8]> = match filters.as_slice() {
            [] => Cow::Borrowed(stream.content.as_slice()),
            [only] if is_flate(only) => {
                let row_bits = width as usize * colour.components() * bits as usize;
                let row_bytes = row_bits.div_ceil(8);
                // PNG predictors add one tag byte per row.
                let cap = (row_bytes + 1) * height as usize + INFLATE_SLACK;
                let inflated = inflate_bounded(&stream.content, cap)?;
                if has_predictor(&stream.dict) {
                    // Size is known to be bounded; let lopdf undo the predictor.
                    Cow::Owned(stream.decompressed_content().map_err(|err| {
                        LesewerkError::DecodeError(format!("corrupt Flate image data: {err}"))
                    })?)
                } else {
                    Cow::Owned(inflated)
                }
            }
            _ => return Ok(None),
        };
        let inverted = decode_is_inverted(&stream.dict);

        let image = match (colour, bits) {
            (Colour::Gray, 8) => gray8(&samples, width, height, inverted)?,
            (Colour::Gray, 1) => gray1(&samples, width, height, inverted)?,
            (Colour::Rgb, 8) => rgb8(&samples, width, height)?,
            (Colour::Cmyk, 8) => cmyk8(&samples, width, height)?,
            _ => return Ok(None),
        };
        Ok(Some(image))
    }

    fn filters(&self, dict: &Dictionary) -> Vec<Vec<u8>> {
        match dict.get(b"Filter").ok().and_then(|f| self.resolve(f)) {
            Some(Object::Name(name)) => vec![name.clone()],
            Some(Object::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Object::Name(name) => Some(name.clone()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    fn colour_space(&self, obj: &Object) -> Option<Colour> {
        match self.resolve(obj)? {
            Object::Name(name) => Colour::from_name(name),
            Object::Array(items) => {
                let Some(Object::Name(family)) = items.first() else {
                    return None;
                };
                if family.as_slice() == b"ICCBased" {
                    let profile = self.resolve(items.get(1)?)?.as_stream().ok()?;
                    match int_of(&profile.dict, b"N")? {
                        1 => Some(Colour::Gray),
                        3 => Some(Colour::Rgb),
                        4 => Some(Colour::Cmyk),
                        _ => None,
                    }
                } else {
                    // CalGray / CalRGB arrays carry calibration we ignore.
                    Colour::from_name(family)
                }
            }
            _ => None,
        }
    }

    /// Follow one level of indirection.
    fn resolve<'a>(&'a self, obj: &'a Object) -> Option<&'a Object> {
        match obj {
            Object::Reference(id) => self.document.get_object(*id).ok(),
            other => Some(other),
        }
    }

    /// Look up a page attribute, walking up `/Parent` links for inheritable
    /// keys like `/Resources` and `/Rotate`.
    fn inherited(&self, page_id: ObjectId, key: &[u8]) -> Option<&Object> {
        let mut current = self.document.get_dictionary(page_id).ok()?;
        for _ in 0..MAX_TREE_DEPTH {
            if let Ok(value) = current.get(key) {
                return self.resolve(value);
            }
            let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
            current = self.document.get_dictionary(parent).ok()?;
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Colour {
    Gray,
    Rgb,
    Cmyk,
}

impl Colour {
    fn components(self) -> usize {
        match self {
            Self::Gray => 1,
            Self::Rgb => 3,
            Self::Cmyk => 4,
        }
    }

    fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"DeviceGray" | b"CalGray" | b"G" => Some(Self::Gray),
            b"DeviceRGB" | b"CalRGB" | b"RGB" => Some(Self::Rgb),
            b"DeviceCMYK" | b"CMYK" => Some(Self::Cmyk),
            _ => None,
        }
    }
}

fn is_flate(filter: &[u8]) -> bool {
    matches!(filter, b"FlateDecode" | b"Fl")
}

fn has_predictor(dict: &Dictionary) -> bool {
    dict.get(b"DecodeParms")
        .and_then(Object::as_dict)
        .ok()
        .and_then(|params| int_of(params, b"Predictor"))
        .is_some_and(|predictor| predictor > 1)
}

/// Inflate a zlib stream, refusing to produce more than `cap` bytes.
fn inflate_bounded(data: &[u8], cap: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(cap.min(data.len().saturating_mul(4)));
    ZlibDecoder::new(data)
        .take(cap as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|err| LesewerkError::DecodeError(format!("corrupt Flate data: {err}")))?;
    if out.len() > cap {
        return Err(LesewerkError::InputTooLarge(format!(
            "Flate stream inflates past {cap} bytes"
        )));
    }
    Ok(out)
}

fn name_of<'a>(dict: &'a Dictionary, key: &[u8]) -> Option<&'a [u8]> {
    match dict.get(key).ok()? {
        Object::Name(name) => Some(name.as_slice()),
        _ => None,
    }
}

fn int_of(dict: &Dictionary, key: &[u8]) -> Option<u32> {
    dict.get(key)
        .ok()?
        .as_i64()
        .ok()
        .and_then(|v| u32::try_from(v).ok())
}

/// `/Decode [1 0]` flips sample meaning for single-channel images.
fn decode_is_inverted(dict: &Dictionary) -> bool {
    let Ok(Object::Array(range)) = dict.get(b"Decode") else {
        return false;
    };
    let as_f = |o: &Object| match o {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    };
    match (range.first().and_then(as_f), range.get(1).and_then(as_f)) {
        (Some(lo), Some(hi)) => lo > hi,
        _ => false,
    }
}

fn short_data(expected: usize, got: usize) -> LesewerkError {
    LesewerkError::DecodeError(format!(
        "PDF image data too short: expected {expected} bytes, got {got}"
    ))
}

fn gray8(samples: &[u8], width: u32, height: u32, inverted: bool) -> Result<DynamicImage> {
    let len = width as usize * height as usize;
    if samples.len() < len {
        return Err(short_data(len, samples.len()));
    }
    let mut pixels = samples[..len].to_vec();
    if inverted {
        pixels.iter_mut().for_each(|p| *p = 255 - *p);
    }
    GrayImage::from_raw(width, height, pixels)
        .map(DynamicImage::ImageLuma8)
        .ok_or_else(|| short_data(len, samples.len()))
}

fn gray1(samples: &[u8], width: u32, height: u32, inverted: bool) -> Result<DynamicImage> {
    let row_bytes = (width as usize).div_ceil(8);
    let len = row_bytes * height as usize;
    if samples.len() < len {
        return Err(short_data(len, samples.len()));
    }
    let mut image = GrayImage::new(width, height);
    for (y, row) in samples.chunks(row_bytes).take(height as usize).enumerate() {
        for x in 0..width as usize {
            let bit = (row[x / 8] >> (7 - (x % 8))) & 1;
            let white = (bit == 1) != inverted;
            image.put_pixel(x as u32, y as u32, image::Luma([if white { 255 } else { 0 }]));
        }
    }
    Ok(DynamicImage::ImageLuma8(image))
}

fn rgb8(samples: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    let len = width as usize * height as usize * 3;
    if samples.len() < len {
        return Err(short_data(len, samples.len()));
    }
    RgbImage::from_raw(width, height, samples[..len].to_vec())
        .map(DynamicImage::ImageRgb8)
        .ok_or_else(|| short_data(len, samples.len()))
}

fn cmyk8(samples: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    let len = width as usize * height as usize * 4;
    if samples.len() < len {
        return Err(short_data(len, samples.len()));
    }
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for px in samples[..len].chunks_exact(4) {
        let k = px[3] as u16;
        for &c in &px[..3] {
            rgb.push(255 - (c as u16 + k).min(255) as u8);
        }
    }
    RgbImage::from_raw(width, height, rgb)
        .map(DynamicImage::ImageRgb8)
        .ok_or_else(|| short_data(len, samples.len()))
}
