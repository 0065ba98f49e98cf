// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Recognition pre-processing — contrast stretching, Gaussian denoising, and
// Otsu binarization of canonical grayscale pages.

use image::{GrayImage, Luma};
use imageproc::filter::gaussian_blur_f32;
use lesewerk_core::config::PreprocessConfig;
use tracing::{debug, instrument};

/// Cleans up a page raster before it is handed to the OCR engine.
///
/// Each step is optional and driven by `PreprocessConfig`. The steps run in a
/// fixed order: contrast stretch, then denoise, then binarize.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    config: PreprocessConfig,
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    /// Whether any step is switched on.
    pub fn is_enabled(&self) -> bool {
        self.config.stretch_contrast || self.config.denoise_sigma > 0.0 || self.config.binarize
    }

    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    pub fn apply(&self, image: GrayImage) -> GrayImage {
        let mut image = image;
        if self.config.stretch_contrast {
            image = stretch_contrast(image);
        }
        if self.config.denoise_sigma > 0.0 {
            image = gaussian_blur_f32(&image, self.config.denoise_sigma);
            debug!(sigma = self.config.denoise_sigma, "Applied Gaussian denoise");
        }
        if self.config.binarize {
            image = binarize_otsu(image);
        }
        image
    }
}

/// Linearly map the darkest pixel to 0 and the brightest to 255. Flat images
/// are returned unchanged.
pub fn stretch_contrast(mut image: GrayImage) -> GrayImage {
    let (min, max) = image
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
    if max <= min || (min == 0 && max == 255) {
        return image;
    }

    let range = (max - min) as u32;
    for pixel in image.pixels_mut() {
        let v = (pixel.0[0] - min) as u32;
        pixel.0[0] = ((v * 255 + range / 2) / range) as u8;
    }
    debug!(min, max, "Stretched contrast");
    image
}

/// Global black/white threshold chosen by Otsu's method.
pub fn binarize_otsu(mut image: GrayImage) -> GrayImage {
    let threshold = otsu_threshold(&image);
    debug!(threshold, "Otsu threshold computed");
    for pixel in image.pixels_mut() {
        *pixel = Luma([if pixel.0[0] < threshold { 0 } else { 255 }]);
    }
    image
}

/// Threshold maximising between-class variance of the histogram.
fn otsu_threshold(gray: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for pixel in gray.pixels() {
        histogram[pixel.0[0] as usize] += 1;
    }

    let total_pixels = gray.width() as u64 * gray.height() as u64;
    if total_pixels == 0 {
        return 128;
    }

    let sum_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &count)| i as f64 * count as f64)
        .sum();

    let mut sum_background = 0.0;
    let mut weight_background = 0u64;
    let mut max_variance = 0.0;
    let mut best_threshold = 0u8;

    for (t, &count) in histogram.iter().enumerate() {
        weight_background += count;
        if weight_background == 0 {
            continue;
        }
        let weight_foreground = total_pixels - weight_background;
        if weight_foreground == 0 {
            break;
        }

        sum_background += t as f64 * count as f64;
        let mean_background = sum_background / weight_background as f64;
        let mean_foreground = (sum_total - sum_background) / weight_foreground as f64;
        let between = weight_background as f64
            * weight_foreground as f64
            * (mean_background - mean_foreground).powi(2);

        if between > max_variance {
            max_variance = between;
            // Pixels strictly below the threshold are background.
            best_threshold = (t + 1).min(255) as u8;
        }
    }
    best_threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_tone() -> GrayImage {
        GrayImage::from_fn(10, 10, |x, _| if x < 5 { Luma([60]) } else { Luma([180]) })
    }

    #[test]
    fn stretch_uses_full_range() {
        let stretched = stretch_contrast(two_tone());
        assert_eq!(stretched.get_pixel(0, 0).0[0], 0);
        assert_eq!(stretched.get_pixel(9, 0).0[0], 255);
    }

    #[test]
    fn stretch_leaves_flat_image_alone() {
        let flat = GrayImage::from_pixel(4, 4, Luma([128]));
        assert_eq!(stretch_contrast(flat.clone()), flat);
    }

    #[test]
    fn otsu_separates_two_tones() {
        let binary = binarize_otsu(two_tone());
        assert_eq!(binary.get_pixel(0, 0).0[0], 0);
        assert_eq!(binary.get_pixel(9, 9).0[0], 255);
    }

    #[test]
    fn disabled_preprocessor_is_identity() {
        let config = PreprocessConfig {
            stretch_contrast: false,
            denoise_sigma: 0.0,
            binarize: false,
        };
        let pre = Preprocessor::new(config);
        assert!(!pre.is_enabled());
        assert_eq!(pre.apply(two_tone()), two_tone());
    }

    #[test]
    fn denoise_keeps_dimensions() {
        let config = PreprocessConfig {
            stretch_contrast: false,
            denoise_sigma: 1.0,
            binarize: true,
        };
        let out = Preprocessor::new(config).apply(two_tone());
        assert_eq!(out.dimensions(), (10, 10));
    }
}
