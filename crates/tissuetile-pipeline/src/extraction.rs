//! One tile-extraction session over a single source image.
//!
//! [`TileExtraction`] ties the pieces together: it estimates the
//! intensity threshold once per channel, keeps the memoized mask
//! pipeline alive between runs, and re-samples the grid only when the
//! mask or a sampling parameter changed.

use std::rc::Rc;

use image::DynamicImage;
use log::debug;

use crate::config::ExtractionParams;
use crate::pipeline::{self, IntermediateResult, PipelineHandle, PipelineState};
use crate::resolution::{self, LevelMapping, ResolutionMapper};
use crate::sampler::{self, CancelSignal, RoiRecord, SampleOutcome};
use crate::source::{PyramidSource, base_dimensions};
use crate::threshold::{ProcessingSize, ThresholdEstimator};
use crate::types::{Dimensions, PipelineError, Rect};

/// What a [`TileExtraction::run`] call did.
#[derive(Debug, Clone, PartialEq)]
pub enum RunReport {
    /// Neither the mask nor any sampling parameter changed; the
    /// previous tiles stand.
    Unchanged,
    /// The grid was scanned. If the scan was cancelled the outcome holds
    /// the partial result and the session keeps its previous tiles.
    Sampled(SampleOutcome),
}

/// Extraction state for one source image.
pub struct TileExtraction {
    source: Rc<dyn PyramidSource>,
    dimensions: Dimensions,
    processing: ProcessingSize,
    mapper: ResolutionMapper,
    labels: Vec<String>,
    estimator: ThresholdEstimator,
    state: PipelineState,
    handle: Option<PipelineHandle>,
    source_changed: bool,
    last_params: Option<ExtractionParams>,
    records: Vec<RoiRecord>,
}

impl std::fmt::Debug for TileExtraction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileExtraction")
            .field("source", &self.source.identifier())
            .field("dimensions", &self.dimensions)
            .field("state", &self.state)
            .field("records", &self.records.len())
            .finish_non_exhaustive()
    }
}

impl TileExtraction {
    /// Start a session on `source`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingSource`] if the source is empty.
    pub fn new(source: Rc<dyn PyramidSource>) -> Result<Self, PipelineError> {
        let dimensions = base_dimensions(source.as_ref())?;
        Ok(Self {
            processing: ProcessingSize::for_dimensions(dimensions),
            mapper: ResolutionMapper::from_source(source.as_ref()),
            labels: resolution::magnification_labels(source.max_magnification()),
            dimensions,
            source,
            estimator: ThresholdEstimator::new(),
            state: PipelineState::default(),
            handle: None,
            source_changed: false,
            last_params: None,
            records: Vec::new(),
        })
    }

    /// Swap in a different source image.
    ///
    /// Threshold estimates are dropped and the next run rebuilds the
    /// whole pipeline. Previously accepted tiles are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingSource`] if the new source is
    /// empty; the session is left unchanged in that case.
    pub fn set_source(&mut self, source: Rc<dyn PyramidSource>) -> Result<(), PipelineError> {
        let replacement = Self::new(source)?;
        *self = Self {
            state: std::mem::take(&mut self.state),
            source_changed: true,
            ..replacement
        };
        Ok(())
    }

    /// Default parameters for this session's image.
    #[must_use]
    pub fn default_params(&self) -> ExtractionParams {
        ExtractionParams::defaults_for(self.dimensions)
    }

    /// Bring the pipeline and tile set up to date with `params`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for out-of-range
    /// parameters and propagates source failures. Cancellation is not
    /// an error; see [`RunReport::Sampled`].
    pub fn run(
        &mut self,
        params: &ExtractionParams,
        cancel: &dyn CancelSignal,
    ) -> Result<RunReport, PipelineError> {
        params.validate(self.dimensions)?;

        let threshold = self
            .estimator
            .estimate(self.source.as_ref(), params.channel)?;
        let built = pipeline::build(
            self.state.clone(),
            &self.source,
            params.filter(threshold),
            self.source_changed,
        )?;
        self.state = built.state;
        self.source_changed = false;
        let handle = self.handle.insert(built.handle);

        let resample = built.changed
            || self
                .last_params
                .as_ref()
                .is_none_or(|previous| params.requires_resample(previous));
        if !resample {
            debug!("parameters unchanged, keeping {} tiles", self.records.len());
            return Ok(RunReport::Unchanged);
        }

        let mask = handle.render(Rect::full(self.dimensions), self.processing.dimensions)?;
        let outcome = sampler::sample(
            self.dimensions,
            &mask,
            self.processing.scale,
            &params.grid(),
            cancel,
        );

        if outcome.cancelled {
            // Force the next run to scan again.
            self.last_params = None;
        } else {
            self.records.clone_from(&outcome.records);
            self.last_params = Some(params.clone());
        }
        Ok(RunReport::Sampled(outcome))
    }

    /// Tiles accepted by the last completed pass, in enumeration order.
    #[must_use]
    pub fn records(&self) -> &[RoiRecord] {
        &self.records
    }

    /// The session's source image.
    #[must_use]
    pub const fn source(&self) -> &Rc<dyn PyramidSource> {
        &self.source
    }

    /// Level-0 image size.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Size and scale of the raster the mask is sampled on.
    #[must_use]
    pub const fn processing(&self) -> ProcessingSize {
        self.processing
    }

    /// Pipeline stages built so far.
    #[must_use]
    pub const fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Intensity threshold estimated for `channel`, once a run used it.
    #[must_use]
    pub fn estimated_threshold(&self, channel: usize) -> Option<u8> {
        self.estimator.cached(channel)
    }

    /// Level geometry mapper for this image.
    #[must_use]
    pub const fn mapper(&self) -> &ResolutionMapper {
        &self.mapper
    }

    /// Map a level-0 rectangle to `level`.
    #[must_use]
    pub fn map_to_level(&self, rect: Rect, level: usize) -> LevelMapping {
        self.mapper.map_to_level(rect, level)
    }

    /// Human-readable label for `level`.
    #[must_use]
    pub fn resolution_label(&self, level: usize) -> String {
        resolution::resolution_label(&self.labels, self.mapper.clamp_level(level))
    }

    /// Render an intermediate result for a level-0 region.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingStage`] before the first run for
    /// anything but [`IntermediateResult::Raw`], and propagates source
    /// failures.
    pub fn render_intermediate(
        &self,
        selection: IntermediateResult,
        region: Rect,
        output: Dimensions,
    ) -> Result<DynamicImage, PipelineError> {
        self.state
            .render_intermediate(selection, self.source.as_ref(), region, output)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sampler::{CancelToken, NeverCancel};
    use crate::source::MemoryPyramid;

    /// 800×800 slide: dark tissue in the top-left quadrant, white glass
    /// elsewhere.
    fn slide() -> Rc<dyn PyramidSource> {
        let img = image::RgbImage::from_fn(800, 800, |x, y| {
            if x < 400 && y < 400 {
                image::Rgb([150, 80, 160])
            } else {
                image::Rgb([240, 240, 240])
            }
        });
        Rc::new(
            MemoryPyramid::new("case-01.tif", &DynamicImage::ImageRgb8(img), 4, 3)
                .with_magnification(40.0),
        )
    }

    fn session() -> TileExtraction {
        TileExtraction::new(slide()).unwrap()
    }

    fn sampled(report: RunReport) -> SampleOutcome {
        match report {
            RunReport::Sampled(outcome) => outcome,
            RunReport::Unchanged => unreachable!("expected a sampling pass"),
        }
    }

    #[test]
    fn first_run_samples_tissue_only() {
        let mut s = session();
        let params = s.default_params();
        let outcome = sampled(s.run(&params, &NeverCancel).unwrap());
        // Spacing 100, offset 50: 8×8 grid, 4×4 over the tissue.
        assert_eq!(outcome.scored, 64);
        assert_eq!(outcome.records.len(), 16);
        assert!(
            outcome
                .records
                .iter()
                .all(|r| r.tile.rect.x < 400 && r.tile.rect.y < 400)
        );
        assert_eq!(s.records().len(), 16);
        assert!(s.estimated_threshold(params.channel).is_some());
    }

    #[test]
    fn repeated_run_is_unchanged() {
        let mut s = session();
        let params = s.default_params();
        s.run(&params, &NeverCancel).unwrap();
        let before = s.state().clone();
        assert_eq!(s.run(&params, &NeverCancel).unwrap(), RunReport::Unchanged);
        assert!(s.state().same_stages(&before));
    }

    #[test]
    fn fraction_change_resamples_without_rebuild() {
        let mut s = session();
        let params = s.default_params();
        s.run(&params, &NeverCancel).unwrap();
        let before = s.state().clone();
        let stricter = ExtractionParams {
            threshold: 0.9,
            ..params
        };
        let report = s.run(&stricter, &NeverCancel).unwrap();
        assert!(matches!(report, RunReport::Sampled(_)));
        assert!(s.state().same_stages(&before));
    }

    #[test]
    fn cancelled_run_keeps_previous_tiles() {
        let mut s = session();
        let params = s.default_params();
        s.run(&params, &NeverCancel).unwrap();
        let previous = s.records().to_vec();

        let token = CancelToken::new();
        token.cancel();
        let moved = ExtractionParams {
            offset_x: 10,
            ..params.clone()
        };
        let outcome = sampled(s.run(&moved, &token).unwrap());
        assert!(outcome.cancelled);
        assert_eq!(s.records(), previous.as_slice());

        // The interrupted pass is redone even with the same parameters.
        token.reset();
        let outcome = sampled(s.run(&moved, &token).unwrap());
        assert!(!outcome.cancelled);
        assert_ne!(s.records(), previous.as_slice());
    }

    #[test]
    fn invalid_params_are_rejected() {
        let mut s = session();
        let params = ExtractionParams {
            spacing: 0,
            ..s.default_params()
        };
        assert!(matches!(
            s.run(&params, &NeverCancel),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn set_source_forces_full_rebuild() {
        let mut s = session();
        let params = s.default_params();
        s.run(&params, &NeverCancel).unwrap();
        let before = s.state().clone();
        s.set_source(slide()).unwrap();
        assert!(s.records().is_empty());
        let report = s.run(&params, &NeverCancel).unwrap();
        assert!(matches!(report, RunReport::Sampled(_)));
        assert!(!s.state().same_stages(&before));
    }

    #[test]
    fn labels_and_level_mapping() {
        let s = session();
        assert_eq!(s.resolution_label(0), "40.0X");
        assert_eq!(s.resolution_label(1), "20.0X");
        assert_eq!(s.resolution_label(9), "40.0X");
        let mapping = s.map_to_level(Rect::new(400, 400, 64, 64), 1);
        assert_eq!(mapping.region, Rect::new(100, 100, 16, 16));
    }

    #[test]
    fn intermediate_mask_after_run() {
        let mut s = session();
        let params = s.default_params();
        assert!(
            s.render_intermediate(
                IntermediateResult::Mask,
                Rect::new(0, 0, 800, 800),
                Dimensions::new(80, 80)
            )
            .is_err()
        );
        s.run(&params, &NeverCancel).unwrap();
        let mask = s
            .render_intermediate(
                IntermediateResult::Mask,
                Rect::new(0, 0, 800, 800),
                Dimensions::new(80, 80),
            )
            .unwrap()
            .to_luma8();
        assert_eq!(mask.get_pixel(10, 10).0[0], 255);
        assert_eq!(mask.get_pixel(70, 70).0[0], 0);
    }
}
