//! Memoized foreground-mask pipeline.
//!
//! The mask is produced by a fixed chain of four stages:
//!
//! ```text
//! source → channel-select → threshold → closing → opening
//! ```
//!
//! Each [`Stage`] owns a link to its upstream (the source for the first
//! stage) and a bounded [`RenderCache`] of rasters it has already
//! rendered. Stages are never mutated: when a parameter changes, the
//! affected stage and everything downstream of it is replaced by a new
//! instance, and untouched stages are reused as-is.
//!
//! The caller owns the [`PipelineState`] for the lifetime of one image
//! session and threads it through [`build`]:
//!
//! ```rust
//! # use std::rc::Rc;
//! # use tissuetile_pipeline::pipeline::{self, FilterParams, PipelineState};
//! # use tissuetile_pipeline::{MemoryPyramid, PipelineError, PyramidSource};
//! # fn run(source: Rc<dyn PyramidSource>) -> Result<(), PipelineError> {
//! let params = FilterParams { channel: 1, threshold: 200, window: 5 };
//! let first = pipeline::build(PipelineState::default(), &source, params, false)?;
//! assert!(first.changed);
//! let second = pipeline::build(first.state.clone(), &source, params, false)?;
//! assert!(!second.changed);
//! assert!(second.state.same_stages(&first.state));
//! # Ok(())
//! # }
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use image::DynamicImage;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::cache::RenderCache;
use crate::source::{PyramidSource, base_dimensions};
use crate::types::{Dimensions, GrayImage, PipelineError, Rect};
use crate::{channel, morphology, threshold};

/// Parameters feeding the mask pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterParams {
    /// Channel index projected by the first stage.
    pub channel: usize,
    /// Highest intensity kept as foreground.
    pub threshold: u8,
    /// Morphology window size (≥ 1).
    pub window: u32,
}

/// What a stage does, with the parameters it was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// Project the source onto one channel.
    ChannelSelect {
        /// Requested channel index.
        channel: usize,
    },
    /// Binarize, keeping pixels at or below `value`.
    Threshold {
        /// Threshold intensity.
        value: u8,
    },
    /// Morphological closing.
    Closing {
        /// Window size.
        window: u32,
    },
    /// Morphological opening.
    Opening {
        /// Window size.
        window: u32,
    },
}

impl StageKind {
    /// Short stage name for logs and diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ChannelSelect { .. } => "channel-select",
            Self::Threshold { .. } => "threshold",
            Self::Closing { .. } => "closing",
            Self::Opening { .. } => "opening",
        }
    }
}

/// A stage's operation together with its single upstream link.
enum Operation {
    ChannelSelect {
        source: Rc<dyn PyramidSource>,
        channel: usize,
    },
    Threshold {
        upstream: Rc<Stage>,
        value: u8,
    },
    Closing {
        upstream: Rc<Stage>,
        window: u32,
    },
    Opening {
        upstream: Rc<Stage>,
        window: u32,
    },
}

/// One cached processing stage.
pub struct Stage {
    operation: Operation,
    cache: RefCell<RenderCache>,
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("kind", &self.kind())
            .field("cached", &self.cache.borrow().len())
            .finish()
    }
}

impl Stage {
    fn new(operation: Operation) -> Self {
        Self {
            operation,
            cache: RefCell::new(RenderCache::default()),
        }
    }

    /// What this stage computes.
    #[must_use]
    pub const fn kind(&self) -> StageKind {
        match self.operation {
            Operation::ChannelSelect { channel, .. } => StageKind::ChannelSelect { channel },
            Operation::Threshold { value, .. } => StageKind::Threshold { value },
            Operation::Closing { window, .. } => StageKind::Closing { window },
            Operation::Opening { window, .. } => StageKind::Opening { window },
        }
    }

    /// Number of rasters currently cached by this stage.
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.cache.borrow().len()
    }

    /// Render a level-0 `region` at `output` size through this stage.
    ///
    /// # Errors
    ///
    /// Propagates failures of the underlying image source.
    pub fn render(&self, region: Rect, output: Dimensions) -> Result<GrayImage, PipelineError> {
        let key = (region, output);
        let cached = self.cache.borrow_mut().get(&key).cloned();
        if let Some(raster) = cached {
            return Ok(raster);
        }
        let raster = self.compute(region, output)?;
        self.cache.borrow_mut().insert(key, raster.clone());
        Ok(raster)
    }

    fn compute(&self, region: Rect, output: Dimensions) -> Result<GrayImage, PipelineError> {
        match &self.operation {
            Operation::ChannelSelect { source, channel } => {
                let rgba = source.render(region, output)?;
                Ok(channel::select_channel(&rgba, *channel, source.color_model()))
            }
            Operation::Threshold { upstream, value } => {
                let input = upstream.render(region, output)?;
                Ok(threshold::binarize_darker(&input, *value))
            }
            Operation::Closing { upstream, window } => {
                let input = upstream.render(region, output)?;
                Ok(morphology::close(&input, *window))
            }
            Operation::Opening { upstream, window } => {
                let input = upstream.render(region, output)?;
                Ok(morphology::open(&input, *window))
            }
        }
    }
}

/// Outcome of deciding whether a stage can be kept.
#[derive(Debug, Clone)]
pub enum Rebuild {
    /// The previous instance is still valid.
    Reused(Rc<Stage>),
    /// A fresh instance replaced the previous one (or none existed).
    New(Rc<Stage>),
}

impl Rebuild {
    /// The stage, reused or new.
    #[must_use]
    pub const fn stage(&self) -> &Rc<Stage> {
        match self {
            Self::Reused(stage) | Self::New(stage) => stage,
        }
    }

    /// Returns `true` for a freshly built stage.
    #[must_use]
    pub const fn is_new(&self) -> bool {
        matches!(self, Self::New(_))
    }

    fn into_stage(self) -> Rc<Stage> {
        match self {
            Self::Reused(stage) | Self::New(stage) => stage,
        }
    }
}

/// Keep `previous` unless it is missing, an ancestor was rebuilt, or its
/// parameters differ from `wanted`.
fn rebuild(
    previous: Option<Rc<Stage>>,
    wanted: StageKind,
    ancestor_changed: bool,
    make: impl FnOnce() -> Operation,
) -> Rebuild {
    match previous {
        Some(stage) if !ancestor_changed && stage.kind() == wanted => Rebuild::Reused(stage),
        _ => {
            debug!("building {} stage: {wanted:?}", wanted.name());
            Rebuild::New(Rc::new(Stage::new(make())))
        }
    }
}

/// Intermediate result that can be displayed instead of the raw image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntermediateResult {
    /// The unprocessed source image.
    #[default]
    Raw,
    /// Final foreground mask (after opening).
    Mask,
    /// Thresholded channel, before morphology.
    Threshold,
    /// Selected channel, before thresholding.
    Channel,
}

/// The stages built so far for one image session.
///
/// Passed into and returned from every [`build`] call; holds no hidden
/// global state.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    channel: Option<Rc<Stage>>,
    threshold: Option<Rc<Stage>>,
    closing: Option<Rc<Stage>>,
    opening: Option<Rc<Stage>>,
}

impl PipelineState {
    /// Returns `true` once all four stages exist.
    #[must_use]
    pub const fn is_built(&self) -> bool {
        self.channel.is_some()
            && self.threshold.is_some()
            && self.closing.is_some()
            && self.opening.is_some()
    }

    /// Whether both states reference the very same stage instances.
    #[must_use]
    pub fn same_stages(&self, other: &Self) -> bool {
        fn same(a: Option<&Rc<Stage>>, b: Option<&Rc<Stage>>) -> bool {
            match (a, b) {
                (Some(a), Some(b)) => Rc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            }
        }
        same(self.channel.as_ref(), other.channel.as_ref())
            && same(self.threshold.as_ref(), other.threshold.as_ref())
            && same(self.closing.as_ref(), other.closing.as_ref())
            && same(self.opening.as_ref(), other.opening.as_ref())
    }

    /// The stage backing an intermediate result, or `None` for
    /// [`IntermediateResult::Raw`] and for stages not built yet.
    #[must_use]
    pub fn stage_for(&self, selection: IntermediateResult) -> Option<&Rc<Stage>> {
        match selection {
            IntermediateResult::Raw => None,
            IntermediateResult::Mask => self.opening.as_ref(),
            IntermediateResult::Threshold => self.threshold.as_ref(),
            IntermediateResult::Channel => self.channel.as_ref(),
        }
    }

    /// Render an intermediate result for display.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingStage`] if the selected stage has
    /// not been built, and propagates source failures.
    pub fn render_intermediate(
        &self,
        selection: IntermediateResult,
        source: &dyn PyramidSource,
        region: Rect,
        output: Dimensions,
    ) -> Result<DynamicImage, PipelineError> {
        if selection == IntermediateResult::Raw {
            return Ok(DynamicImage::ImageRgba8(source.render(region, output)?));
        }
        let stage = self
            .stage_for(selection)
            .ok_or(PipelineError::MissingStage(selection))?;
        Ok(DynamicImage::ImageLuma8(stage.render(region, output)?))
    }
}

/// Read access to the final foreground mask.
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    mask: Rc<Stage>,
}

impl PipelineHandle {
    /// Render the foreground mask for a level-0 `region`.
    ///
    /// # Errors
    ///
    /// Propagates failures of the underlying image source.
    pub fn render(&self, region: Rect, output: Dimensions) -> Result<GrayImage, PipelineError> {
        self.mask.render(region, output)
    }

    /// The final (opening) stage.
    #[must_use]
    pub const fn stage(&self) -> &Rc<Stage> {
        &self.mask
    }
}

/// Result of a [`build`] call.
#[derive(Debug, Clone)]
pub struct Built {
    /// State to pass to the next [`build`] call.
    pub state: PipelineState,
    /// Handle to the final mask.
    pub handle: PipelineHandle,
    /// `true` if any stage was rebuilt.
    pub changed: bool,
}

/// Build the mask pipeline, reusing every stage whose inputs are
/// unchanged.
///
/// A stage is rebuilt when it does not exist yet, when its own
/// parameters differ from `params`, or when its upstream stage was
/// rebuilt. `source_changed` forces a rebuild of the whole chain.
///
/// # Errors
///
/// Returns [`PipelineError::MissingSource`] if the source has no levels
/// or an empty base level. No stage is built in that case.
pub fn build(
    state: PipelineState,
    source: &Rc<dyn PyramidSource>,
    params: FilterParams,
    source_changed: bool,
) -> Result<Built, PipelineError> {
    base_dimensions(source.as_ref())?;

    let channel = rebuild(
        state.channel,
        StageKind::ChannelSelect {
            channel: params.channel,
        },
        source_changed,
        || Operation::ChannelSelect {
            source: Rc::clone(source),
            channel: params.channel,
        },
    );
    let threshold = rebuild(
        state.threshold,
        StageKind::Threshold {
            value: params.threshold,
        },
        channel.is_new(),
        || Operation::Threshold {
            upstream: Rc::clone(channel.stage()),
            value: params.threshold,
        },
    );
    let closing = rebuild(
        state.closing,
        StageKind::Closing {
            window: params.window,
        },
        threshold.is_new(),
        || Operation::Closing {
            upstream: Rc::clone(threshold.stage()),
            window: params.window,
        },
    );
    // Opening reads the closed mask, not the thresholded one.
    let opening = rebuild(
        state.opening,
        StageKind::Opening {
            window: params.window,
        },
        closing.is_new(),
        || Operation::Opening {
            upstream: Rc::clone(closing.stage()),
            window: params.window,
        },
    );

    let changed = channel.is_new() || threshold.is_new() || closing.is_new() || opening.is_new();
    let mask = opening.into_stage();

    Ok(Built {
        state: PipelineState {
            channel: Some(channel.into_stage()),
            threshold: Some(threshold.into_stage()),
            closing: Some(closing.into_stage()),
            opening: Some(Rc::clone(&mask)),
        },
        handle: PipelineHandle { mask },
        changed,
    })
}
