//! tissuetile-pipeline: Tissue tile extraction core (sans-IO).
//!
//! Samples a pyramidal slide image on a regular grid and keeps the
//! tiles that cover tissue:
//! channel select -> threshold -> closing -> opening -> grid scoring.
//!
//! The threshold is picked per image with Otsu's method, and every mask
//! stage memoizes its renders so repeated passes with unchanged
//! parameters cost nothing.
//!
//! This crate has **no I/O dependencies**: pixels come in through the
//! [`PyramidSource`] trait and results leave as [`RoiRecord`]s. Writing
//! tiles and session documents lives in `tissuetile-io`.

pub mod cache;
pub mod channel;
pub mod config;
pub mod extraction;
pub mod morphology;
pub mod pipeline;
pub mod resolution;
pub mod sampler;
pub mod source;
pub mod threshold;
pub mod types;

pub use config::ExtractionParams;
pub use extraction::{RunReport, TileExtraction};
pub use pipeline::{FilterParams, IntermediateResult, PipelineHandle, PipelineState};
pub use resolution::{LevelMapping, ResolutionMapper};
pub use sampler::{
    CancelSignal, CancelToken, GraphicStyle, GridParams, LinePattern, NeverCancel, RoiRecord,
    SampleOutcome, Tile,
};
pub use source::{MemoryPyramid, PyramidSource};
pub use threshold::ThresholdEstimator;
pub use types::{ColorModel, Dimensions, PipelineError, Point, Rect};
