//! Binary thresholding and Otsu threshold estimation.
//!
//! [`binarize_darker`] is the second pipeline stage: tissue is assumed
//! darker than the glass background, so pixels at or below the threshold
//! become foreground (255) and everything else background (0). This
//! matches the dark class of the Otsu split. The polarity is fixed.
//!
//! [`ThresholdEstimator`] picks that threshold automatically with Otsu's
//! method on a down-sampled rendering of the selected channel. The result
//! is memoized per channel because it is expensive to compute and stable
//! for a given source.

use std::collections::HashMap;

use image::GrayImage;
use log::debug;

use crate::channel;
use crate::source::{PyramidSource, base_dimensions};
use crate::types::{Dimensions, PipelineError, Rect};

/// Longest axis, in pixels, of the down-sampled processing raster.
pub const PROCESSING_EXTENT: u32 = 512;

/// Foreground value in binary masks.
pub const FOREGROUND: u8 = 255;

/// Keep pixels at or below `threshold` as foreground.
#[must_use = "returns the binary mask"]
pub fn binarize_darker(image: &GrayImage, threshold: u8) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let v = image.get_pixel(x, y).0[0];
        image::Luma([if v <= threshold { FOREGROUND } else { 0 }])
    })
}

/// Size and scale of the down-sampled raster used for thresholding and
/// tile scoring.
///
/// `scale = min(512 / width, 512 / height)`; both axes are truncated and
/// kept at least one pixel. Images smaller than 512 are scaled up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessingSize {
    /// Raster dimensions.
    pub dimensions: Dimensions,
    /// Raster pixels per level-0 pixel.
    pub scale: f64,
}

impl ProcessingSize {
    /// Compute the processing raster for a level-0 image size.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn for_dimensions(base: Dimensions) -> Self {
        let extent = f64::from(PROCESSING_EXTENT);
        let scale = (extent / f64::from(base.width.max(1)))
            .min(extent / f64::from(base.height.max(1)));
        let width = ((f64::from(base.width) * scale) as u32).max(1);
        let height = ((f64::from(base.height) * scale) as u32).max(1);
        Self {
            dimensions: Dimensions::new(width, height),
            scale,
        }
    }
}

/// Otsu's threshold for a 256-bin histogram.
///
/// Returns the `t` maximizing the between-class variance of the split
/// `[0, t]` / `(t, 255]`. Ties resolve to the lowest such `t`. A
/// histogram with a single occupied bin (or none) returns 0.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn otsu_from_histogram(histogram: &[u32; 256]) -> u8 {
    let total: u64 = histogram.iter().map(|&c| u64::from(c)).sum();
    if total == 0 {
        return 0;
    }
    let total_sum: f64 = histogram
        .iter()
        .enumerate()
        .map(|(value, &count)| value as f64 * f64::from(count))
        .sum();

    let mut background_weight = 0u64;
    let mut background_sum = 0f64;
    let mut best_variance = 0f64;
    let mut best = 0u8;

    for (t, &count) in (0u8..=255).zip(histogram.iter()) {
        background_weight += u64::from(count);
        if background_weight == 0 {
            continue;
        }
        let foreground_weight = total - background_weight;
        if foreground_weight == 0 {
            break;
        }
        background_sum += f64::from(t) * f64::from(count);

        let wb = background_weight as f64;
        let wf = foreground_weight as f64;
        let mean_b = background_sum / wb;
        let mean_f = (total_sum - background_sum) / wf;
        let diff = mean_b - mean_f;
        let variance = wb * wf * diff * diff;

        if variance > best_variance {
            best_variance = variance;
            best = t;
        }
    }
    best
}

/// Otsu's threshold of a grey raster.
#[must_use]
pub fn otsu_level(image: &GrayImage) -> u8 {
    let histogram = imageproc::stats::histogram(image);
    histogram
        .channels
        .first()
        .map_or(0, otsu_from_histogram)
}

/// Memoized Otsu threshold per channel for one source image.
///
/// Create one estimator per image session; estimates are never
/// invalidated.
#[derive(Debug, Default)]
pub struct ThresholdEstimator {
    estimates: HashMap<usize, u8>,
}

impl ThresholdEstimator {
    /// Create an estimator with no cached thresholds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached threshold for `channel`, if already computed.
    #[must_use]
    pub fn cached(&self, channel: usize) -> Option<u8> {
        self.estimates.get(&channel).copied()
    }

    /// Otsu threshold of `channel`, computed on first use.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingSource`] for an empty source and
    /// propagates source render failures.
    pub fn estimate(
        &mut self,
        source: &dyn PyramidSource,
        channel: usize,
    ) -> Result<u8, PipelineError> {
        if let Some(value) = self.cached(channel) {
            return Ok(value);
        }
        let base = base_dimensions(source)?;
        let processing = ProcessingSize::for_dimensions(base);
        let rgba = source.render(Rect::full(base), processing.dimensions)?;
        let gray = channel::select_channel(&rgba, channel, source.color_model());
        let value = otsu_level(&gray);
        debug!(
            "otsu threshold for channel {channel} of {}: {value} ({}x{} raster)",
            source.identifier(),
            processing.dimensions.width,
            processing.dimensions.height,
        );
        self.estimates.insert(channel, value);
        Ok(value)
    }
}
