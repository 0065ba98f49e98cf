// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image processor — grayscale conversion, quarter-turn rotation, and bounded
// downsampling of decoded rasters into the canonical page form.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use lesewerk_core::PageImage;
use tracing::{debug, instrument};

/// Geometry pipeline over a single 8-bit grayscale raster.
///
/// Each method consumes `self` and returns the transformed processor, so
/// steps chain:
///
/// ```ignore
/// let page = ImageProcessor::from_dynamic(decoded)
///     .rotate_clockwise(90)
///     .fit_within(4096)
///     .into_page_image();
/// ```
pub struct ImageProcessor {
    image: GrayImage,
    downsampled: bool,
}

impl ImageProcessor {
    // -- Construction ---------------------------------------------------------

    /// Convert any decoded image to 8-bit luma.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        let gray = match image {
            DynamicImage::ImageLuma8(gray) => gray,
            other => other.to_luma8(),
        };
        Self::from_gray(gray)
    }

    pub fn from_gray(image: GrayImage) -> Self {
        Self {
            image,
            downsampled: false,
        }
    }

    /// Wrap a canonical page raster.
    pub fn from_page_image(page: PageImage) -> Option<Self> {
        GrayImage::from_raw(page.width, page.height, page.pixels).map(Self::from_gray)
    }

    // -- Accessors ------------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Whether `fit_within` had to shrink the image.
    pub fn was_downsampled(&self) -> bool {
        self.downsampled
    }

    pub fn as_gray(&self) -> &GrayImage {
        &self.image
    }

    pub fn into_gray(self) -> GrayImage {
        self.image
    }

    pub fn into_page_image(self) -> PageImage {
        let (width, height) = self.image.dimensions();
        PageImage {
            width,
            height,
            pixels: self.image.into_raw(),
        }
    }

    // -- Transformations (consume self, return new Self) -----------------------

    /// Rotate clockwise by a multiple of 90 degrees. Other angles are
    /// snapped down to the nearest quarter turn, matching how PDF `/Rotate`
    /// values are defined.
    pub fn rotate_clockwise(self, degrees: i64) -> Self {
        let turns = degrees.rem_euclid(360) / 90;
        let image = match turns {
            1 => imageops::rotate90(&self.image),
            2 => imageops::rotate180(&self.image),
            3 => imageops::rotate270(&self.image),
            _ => return self,
        };
        debug!(degrees, "Rotated raster");
        Self { image, ..self }
    }

    /// Downsample so the longest side is at most `max_dimension`, keeping the
    /// aspect ratio. Images already within bounds are left alone.
    #[instrument(skip(self), fields(width = self.image.width(), height = self.image.height()))]
    pub fn fit_within(self, max_dimension: u32) -> Self {
        let (width, height) = self.image.dimensions();
        let longest = width.max(height);
        if longest <= max_dimension || max_dimension == 0 {
            return self;
        }

        let (new_w, new_h) = scaled_dimensions(width, height, max_dimension);
        debug!(new_w, new_h, "Downsampling raster");
        let image = imageops::resize(&self.image, new_w, new_h, FilterType::Triangle);
        Self {
            image,
            downsampled: true,
        }
    }
}

/// Dimensions that fit `width` x `height` inside a `max_dimension` square,
/// never collapsing a side to zero.
pub fn scaled_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let longest = width.max(height).max(1) as f64;
    let scale = max_dimension as f64 / longest;
    let w = ((width as f64 * scale).round() as u32).clamp(1, max_dimension);
    let h = ((height as f64 * scale).round() as u32).clamp(1, max_dimension);
    (w, h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb, RgbImage};

    #[test]
    fn rgb_input_becomes_gray() {
        let rgb = RgbImage::from_pixel(4, 2, Rgb([255, 255, 255]));
        let page = ImageProcessor::from_dynamic(DynamicImage::ImageRgb8(rgb)).into_page_image();
        assert_eq!((page.width, page.height), (4, 2));
        assert!(page.pixels.iter().all(|&p| p == 255));
    }

    #[test]
    fn fit_within_preserves_aspect_ratio() {
        let gray = GrayImage::new(4000, 1000);
        let processor = ImageProcessor::from_gray(gray).fit_within(1000);
        assert!(processor.was_downsampled());
        assert_eq!((processor.width(), processor.height()), (1000, 250));
    }

    #[test]
    fn fit_within_leaves_small_images_alone() {
        let processor = ImageProcessor::from_gray(GrayImage::new(300, 200)).fit_within(1000);
        assert!(!processor.was_downsampled());
        assert_eq!((processor.width(), processor.height()), (300, 200));
    }

    #[test]
    fn extreme_aspect_never_collapses_to_zero() {
        assert_eq!(scaled_dimensions(10_000, 2, 100), (100, 1));
    }

    #[test]
    fn rotate_quarter_turn_swaps_dimensions() {
        let mut gray = GrayImage::new(3, 2);
        gray.put_pixel(0, 0, Luma([7]));
        let rotated = ImageProcessor::from_gray(gray).rotate_clockwise(90);
        assert_eq!((rotated.width(), rotated.height()), (2, 3));
        // Top-left moves to top-right on a clockwise turn.
        assert_eq!(rotated.as_gray().get_pixel(1, 0).0[0], 7);
    }

    #[test]
    fn negative_rotation_is_normalised() {
        let rotated = ImageProcessor::from_gray(GrayImage::new(3, 2)).rotate_clockwise(-90);
        assert_eq!((rotated.width(), rotated.height()), (2, 3));
        let same = ImageProcessor::from_gray(GrayImage::new(3, 2)).rotate_clockwise(360);
        assert_eq!((same.width(), same.height()), (3, 2));
    }
}
