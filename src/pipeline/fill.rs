//! Fill estimation: raster → luminance → smoothing → binary mask → percentage.
//!
//! ## Why smooth first?
//!
//! Phone photographs carry per-pixel sensor noise. Near the threshold that
//! noise flips individual pixels back and forth and turns clean regions into
//! salt-and-pepper. A small Gaussian (sigma ≈ 1.1, the 5×5 kernel OpenCV
//! users are used to) removes it while moving region boundaries by less
//! than a pixel.
//!
//! ## Polarity
//!
//! [`ThresholdPolicy::Fixed`] treats bright samples as filled;
//! [`ThresholdPolicy::OtsuInverted`] treats dark samples as filled. See
//! [`crate::config::ThresholdPolicy`] for why both exist.

use crate::config::ThresholdPolicy;
use image::{DynamicImage, GrayImage, Luma};
use tracing::debug;

/// Sample value marking a filled pixel in a [`BinaryMask`].
pub const FILLED: u8 = 255;
/// Sample value marking an empty pixel in a [`BinaryMask`].
pub const EMPTY: u8 = 0;

/// A single-channel raster whose samples are only [`FILLED`] or [`EMPTY`].
///
/// Only [`binarize`] constructs one, which is what guarantees the invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask(GrayImage);

impl BinaryMask {
    /// Number of filled samples.
    pub fn filled_count(&self) -> u64 {
        self.0.pixels().filter(|p| p.0[0] == FILLED).count() as u64
    }

    /// Total number of samples.
    pub fn total_count(&self) -> u64 {
        self.0.width() as u64 * self.0.height() as u64
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.0
    }
}

/// Outcome of [`estimate_fill`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillMeasurement {
    /// `filled_pixels / total_pixels × 100`, clamped to `[0, 100]`.
    pub fill_percentage: f64,
    /// Level used for binarisation (fixed or Otsu).
    pub threshold: u8,
    pub filled_pixels: u64,
    pub total_pixels: u64,
}

/// Convert any raster to single-channel 8-bit luminance.
///
/// Single-channel input is copied unchanged; colour input uses the
/// Rec. 601 weights the `image` crate applies.
pub fn to_luminance(raster: &DynamicImage) -> GrayImage {
    raster.to_luma8()
}

/// Gaussian smoothing; `sigma <= 0` returns the input unchanged.
pub fn smooth(gray: &GrayImage, sigma: f32) -> GrayImage {
    if sigma <= 0.0 {
        return gray.clone();
    }
    imageproc::filter::gaussian_blur_f32(gray, sigma)
}

/// Binarise a luminance image according to `policy`.
///
/// Returns the mask and the level that was applied.
pub fn binarize(gray: &GrayImage, policy: ThresholdPolicy) -> (BinaryMask, u8) {
    let (level, inverted) = match policy {
        ThresholdPolicy::Fixed { level } => (level, false),
        ThresholdPolicy::OtsuInverted => (imageproc::contrast::otsu_level(gray), true),
    };

    let mut mask = GrayImage::new(gray.width(), gray.height());
    for (src, dst) in gray.pixels().zip(mask.pixels_mut()) {
        let above = src.0[0] > level;
        *dst = Luma([if above != inverted { FILLED } else { EMPTY }]);
    }

    (BinaryMask(mask), level)
}

/// Run the whole fill estimate on a decoded raster.
///
/// A uniformly empty or uniformly filled raster yields 0 % or 100 %; both
/// are valid measurements.
pub fn estimate_fill(
    raster: &DynamicImage,
    policy: ThresholdPolicy,
    sigma: f32,
) -> FillMeasurement {
    let gray = to_luminance(raster);
    let smoothed = smooth(&gray, sigma);
    let (mask, threshold) = binarize(&smoothed, policy);

    let filled_pixels = mask.filled_count();
    let total_pixels = mask.total_count();
    let fill_percentage = if total_pixels == 0 {
        0.0
    } else {
        (filled_pixels as f64 / total_pixels as f64 * 100.0).clamp(0.0, 100.0)
    };

    debug!(
        "Fill: {}/{} px filled under {} (level {}) → {:.2}%",
        filled_pixels, total_pixels, policy, threshold, fill_percentage
    );

    FillMeasurement {
        fill_percentage,
        threshold,
        filled_pixels,
        total_pixels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    const FIXED: ThresholdPolicy = ThresholdPolicy::Fixed { level: 127 };

    /// Left `split` columns white, the rest black.
    fn split_image(w: u32, h: u32, split: u32) -> DynamicImage {
        let img = RgbImage::from_fn(w, h, |x, _| {
            if x < split {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn all_black_is_empty() {
        let img = DynamicImage::ImageLuma8(GrayImage::new(16, 16));
        let m = estimate_fill(&img, FIXED, 1.1);
        assert_eq!(m.fill_percentage, 0.0);
        assert_eq!(m.filled_pixels, 0);
    }

    #[test]
    fn all_white_is_full() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(16, 16, Luma([255])));
        let m = estimate_fill(&img, FIXED, 1.1);
        assert_eq!(m.fill_percentage, 100.0);
        assert_eq!(m.total_pixels, 256);
    }

    #[test]
    fn half_split_survives_smoothing() {
        let m = estimate_fill(&split_image(100, 100, 50), FIXED, 1.1);
        assert_eq!(m.filled_pixels, 5000);
        assert_eq!(m.fill_percentage, 50.0);
    }

    #[test]
    fn otsu_inverted_counts_dark_side() {
        let m = estimate_fill(&split_image(40, 10, 10), ThresholdPolicy::OtsuInverted, 0.0);
        // 30 of 40 columns are black → 75 % filled under inverted polarity.
        assert_eq!(m.fill_percentage, 75.0);
        assert!(m.threshold < 255);
    }

    #[test]
    fn otsu_inverted_uniform_images() {
        // Uniform input puts the Otsu level at 0: only pure black is filled.
        for (value, expected) in [(0u8, 100.0), (90, 0.0), (255, 0.0)] {
            let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(20, 20, Luma([value])));
            let m = estimate_fill(&img, ThresholdPolicy::OtsuInverted, 1.1);
            assert_eq!(m.threshold, 0, "value {value}");
            assert_eq!(m.fill_percentage, expected, "value {value}");
        }
    }

    #[test]
    fn mask_is_strictly_binary() {
        let gradient = GrayImage::from_fn(64, 4, |x, _| Luma([(x * 4) as u8]));
        let (mask, level) = binarize(&gradient, FIXED);
        assert_eq!(level, 127);
        assert!(mask
            .as_image()
            .pixels()
            .all(|p| p.0[0] == FILLED || p.0[0] == EMPTY));
        // 4·x > 127 ⇔ x ≥ 32 → half of each row.
        assert_eq!(mask.filled_count(), 32 * 4);
    }

    #[test]
    fn percentage_in_range_for_noisy_input() {
        let noisy = RgbImage::from_fn(37, 23, |x, y| {
            let v = ((x * 7919 + y * 104_729) % 256) as u8;
            Rgb([v, v.wrapping_mul(3), v.wrapping_add(91)])
        });
        for policy in [FIXED, ThresholdPolicy::OtsuInverted] {
            let m = estimate_fill(&DynamicImage::ImageRgb8(noisy.clone()), policy, 1.1);
            assert!((0.0..=100.0).contains(&m.fill_percentage), "{policy}: {m:?}");
        }
    }

    #[test]
    fn zero_sigma_skips_smoothing() {
        let gray = GrayImage::from_fn(5, 5, |x, y| Luma([((x + y) * 20) as u8]));
        assert_eq!(smooth(&gray, 0.0), gray);
    }
}
