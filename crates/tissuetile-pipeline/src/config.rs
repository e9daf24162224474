//! User-facing extraction parameters.
//!
//! Defaults scale with the image: eight grid cells fit across the
//! narrowest axis and tiles cover a tenth of the spacing.

use serde::{Deserialize, Serialize};

use crate::channel::DEFAULT_CHANNEL;
use crate::morphology::MAX_WINDOW;
use crate::pipeline::{FilterParams, IntermediateResult};
use crate::sampler::GridParams;
use crate::types::{Dimensions, PipelineError};

/// Default number of grid cells along the narrowest image axis.
pub const DEFAULT_REGIONS: u32 = 8;

/// Default tile side as a fraction of the spacing.
pub const DEFAULT_SIZE_FRACTION: f64 = 0.1;

/// Largest accepted tile side.
pub const MAX_TILE_SIZE: u32 = 4096;

/// Default morphology window.
pub const DEFAULT_WINDOW: u32 = 5;

/// Default acceptance fraction.
pub const DEFAULT_FRACTION: f64 = 0.2;

/// Everything the user can tune for one extraction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionParams {
    /// Tile side in level-0 pixels, `1..=min(narrowest, 4096)`.
    pub size: u32,
    /// Distance between tile origins, `1..=narrowest`.
    pub spacing: u32,
    /// Horizontal offset of the first column, `< width`.
    pub offset_x: u32,
    /// Vertical offset of the first row, `< height`.
    pub offset_y: u32,
    /// Morphology window, `1..=10`.
    pub window: u32,
    /// Acceptance fraction in `[0, 1]`.
    pub threshold: f64,
    /// Pyramid level tiles are saved at.
    pub resolution: usize,
    /// Write tile pixels and the session document.
    pub save: bool,
    /// Intermediate result to render for preview.
    pub intermediate: IntermediateResult,
    /// Channel used for tissue detection.
    pub channel: usize,
}

impl ExtractionParams {
    /// Defaults for an image of the given level-0 size.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn defaults_for(dimensions: Dimensions) -> Self {
        let narrowest = dimensions.narrowest();
        let spacing = (narrowest / DEFAULT_REGIONS).max(1);
        let size = ((f64::from(spacing) * DEFAULT_SIZE_FRACTION) as u32)
            .clamp(1, narrowest.clamp(1, MAX_TILE_SIZE));
        Self {
            size,
            spacing,
            offset_x: spacing / 2,
            offset_y: spacing / 2,
            window: DEFAULT_WINDOW,
            threshold: DEFAULT_FRACTION,
            resolution: 0,
            save: false,
            intermediate: IntermediateResult::Raw,
            channel: DEFAULT_CHANNEL,
        }
    }

    /// Check every parameter against the image it will be applied to.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the first value
    /// out of range, or [`PipelineError::MissingSource`] for an empty
    /// image.
    pub fn validate(&self, dimensions: Dimensions) -> Result<(), PipelineError> {
        if dimensions.is_empty() {
            return Err(PipelineError::MissingSource);
        }
        let narrowest = dimensions.narrowest();
        let max_size = narrowest.min(MAX_TILE_SIZE);
        let invalid = |msg: String| Err(PipelineError::InvalidConfig(msg));

        if !(1..=max_size).contains(&self.size) {
            return invalid(format!("size {} outside 1..={max_size}", self.size));
        }
        if !(1..=narrowest).contains(&self.spacing) {
            return invalid(format!("spacing {} outside 1..={narrowest}", self.spacing));
        }
        if self.offset_x >= dimensions.width {
            return invalid(format!(
                "x offset {} must be below width {}",
                self.offset_x, dimensions.width
            ));
        }
        if self.offset_y >= dimensions.height {
            return invalid(format!(
                "y offset {} must be below height {}",
                self.offset_y, dimensions.height
            ));
        }
        if !(1..=MAX_WINDOW).contains(&self.window) {
            return invalid(format!("window {} outside 1..={MAX_WINDOW}", self.window));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return invalid(format!("threshold {} outside [0, 1]", self.threshold));
        }
        Ok(())
    }

    /// Whether a change from `previous` requires a new sampling pass even
    /// if the mask pipeline was reused.
    ///
    /// The resolution only matters while tiles are being saved.
    #[must_use]
    pub fn requires_resample(&self, previous: &Self) -> bool {
        self.size != previous.size
            || self.spacing != previous.spacing
            || self.offset_x != previous.offset_x
            || self.offset_y != previous.offset_y
            || self.window != previous.window
            || self.threshold.to_bits() != previous.threshold.to_bits()
            || self.save != previous.save
            || (self.save && self.resolution != previous.resolution)
    }

    /// Grid geometry for the sampler.
    #[must_use]
    pub const fn grid(&self) -> GridParams {
        GridParams {
            size: self.size,
            spacing: self.spacing,
            offset_x: self.offset_x,
            offset_y: self.offset_y,
            fraction: self.threshold,
        }
    }

    /// Mask pipeline parameters for a given intensity threshold.
    #[must_use]
    pub const fn filter(&self, intensity_threshold: u8) -> FilterParams {
        FilterParams {
            channel: self.channel,
            threshold: intensity_threshold,
            window: self.window,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const DIMS: Dimensions = Dimensions::new(4000, 3200);

    #[test]
    fn defaults_scale_with_image() {
        let p = ExtractionParams::defaults_for(DIMS);
        assert_eq!(p.spacing, 400);
        assert_eq!(p.size, 40);
        assert_eq!((p.offset_x, p.offset_y), (200, 200));
        assert_eq!(p.window, 5);
        assert!((p.threshold - 0.2).abs() < f64::EPSILON);
        assert!(!p.save);
        assert_eq!(p.intermediate, IntermediateResult::Raw);
        assert!(p.validate(DIMS).is_ok());
    }

    #[test]
    fn defaults_for_tiny_image_stay_valid() {
        let dims = Dimensions::new(5, 3);
        let p = ExtractionParams::defaults_for(dims);
        assert_eq!(p.spacing, 1);
        assert_eq!(p.size, 1);
        assert!(p.validate(dims).is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let base = ExtractionParams::defaults_for(DIMS);
        let cases = [
            ExtractionParams { size: 0, ..base.clone() },
            ExtractionParams { size: 3201, ..base.clone() },
            ExtractionParams { spacing: 0, ..base.clone() },
            ExtractionParams { offset_x: 4000, ..base.clone() },
            ExtractionParams { offset_y: 3200, ..base.clone() },
            ExtractionParams { window: 0, ..base.clone() },
            ExtractionParams { window: 11, ..base.clone() },
            ExtractionParams { threshold: 1.5, ..base.clone() },
            ExtractionParams { threshold: f64::NAN, ..base.clone() },
        ];
        for params in cases {
            assert!(
                matches!(params.validate(DIMS), Err(PipelineError::InvalidConfig(_))),
                "{params:?} should be rejected",
            );
        }
    }

    #[test]
    fn validate_rejects_empty_image() {
        let p = ExtractionParams::defaults_for(DIMS);
        assert!(matches!(
            p.validate(Dimensions::new(0, 10)),
            Err(PipelineError::MissingSource)
        ));
    }

    #[test]
    fn resolution_only_counts_while_saving() {
        let base = ExtractionParams::defaults_for(DIMS);
        let moved = ExtractionParams {
            resolution: 2,
            ..base.clone()
        };
        assert!(!moved.requires_resample(&base));

        let saving = ExtractionParams {
            save: true,
            ..base.clone()
        };
        let saving_moved = ExtractionParams {
            resolution: 2,
            ..saving.clone()
        };
        assert!(saving.requires_resample(&base));
        assert!(saving_moved.requires_resample(&saving));
    }

    #[test]
    fn intermediate_and_channel_do_not_force_resample() {
        let base = ExtractionParams::defaults_for(DIMS);
        let other = ExtractionParams {
            intermediate: IntermediateResult::Mask,
            ..base.clone()
        };
        assert!(!other.requires_resample(&base));
        let threshold = ExtractionParams {
            threshold: 0.3,
            ..base.clone()
        };
        assert!(threshold.requires_resample(&base));
    }

    #[test]
    fn params_serde_round_trip() {
        let p = ExtractionParams::defaults_for(DIMS);
        let json = serde_json::to_string(&p).unwrap();
        let back: ExtractionParams = serde_json::from_str(&json).unwrap();
        assert_eq!(p, back);
    }

    #[test]
    fn grid_and_filter_views() {
        let p = ExtractionParams::defaults_for(DIMS);
        let grid = p.grid();
        assert_eq!(grid.spacing, 400);
        assert!((grid.fraction - 0.2).abs() < f64::EPSILON);
        let filter = p.filter(180);
        assert_eq!(filter.threshold, 180);
        assert_eq!(filter.window, 5);
        assert_eq!(filter.channel, DEFAULT_CHANNEL);
    }
}
