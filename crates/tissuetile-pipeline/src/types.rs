//! Shared types for the tissuetile pipeline.

use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can reference mask and
/// channel rasters without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbaImage` so downstream crates can reference source
/// pixels without depending on `image` directly.
pub use image::RgbaImage;

/// A 2D point in base-resolution image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Whether the point lies strictly inside `dimensions`.
    ///
    /// Points on the left/top edge (`x == 0`) or at the right/bottom
    /// bound (`x == width`) are outside.
    #[must_use]
    pub fn is_strictly_inside(self, dimensions: Dimensions) -> bool {
        self.x > 0.0
            && self.x < f64::from(dimensions.width)
            && self.y > 0.0
            && self.y < f64::from(dimensions.height)
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Create new dimensions.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// The shorter of the two axes.
    #[must_use]
    pub const fn narrowest(self) -> u32 {
        if self.width < self.height {
            self.width
        } else {
            self.height
        }
    }

    /// Returns `true` if either axis is zero.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// An axis-aligned rectangle in integer pixel coordinates.
///
/// The rectangle may extend past the bounds of the image it was
/// generated for: grid tiles near the right and bottom edges are not
/// clipped at generation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Rect {
    /// Create a new rectangle.
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The rectangle covering a whole image.
    #[must_use]
    pub const fn full(dimensions: Dimensions) -> Self {
        Self::new(0, 0, dimensions.width, dimensions.height)
    }

    /// Exclusive right edge.
    #[must_use]
    pub const fn right(&self) -> u64 {
        self.x as u64 + self.width as u64
    }

    /// Exclusive bottom edge.
    #[must_use]
    pub const fn bottom(&self) -> u64 {
        self.y as u64 + self.height as u64
    }

    /// Size of the rectangle.
    #[must_use]
    pub const fn size(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    /// Four corners: top-left, top-right, bottom-right, bottom-left.
    #[must_use]
    pub fn corners(&self) -> [Point; 4] {
        let left = f64::from(self.x);
        let top = f64::from(self.y);
        #[allow(clippy::cast_precision_loss)]
        let (right, bottom) = (self.right() as f64, self.bottom() as f64);
        [
            Point::new(left, top),
            Point::new(right, top),
            Point::new(right, bottom),
            Point::new(left, bottom),
        ]
    }

    /// Whether the whole rectangle lies inside `dimensions`, with the
    /// bottom-right corner strictly inside.
    #[must_use]
    pub fn fits_strictly_within(&self, dimensions: Dimensions) -> bool {
        self.right() < u64::from(dimensions.width) && self.bottom() < u64::from(dimensions.height)
    }

    /// Center of the rectangle, truncated to integer pixels.
    #[must_use]
    pub const fn center(&self) -> (u32, u32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }
}

/// Colour layout of the pixels a source delivers.
///
/// Sources always hand pixels over as RGBA; the model says which of
/// those channels carry information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorModel {
    /// Single grey channel (replicated into R, G and B).
    Luma,
    /// Grey plus alpha.
    LumaAlpha,
    /// Red, green, blue.
    Rgb,
    /// Red, green, blue, alpha.
    Rgba,
}

impl ColorModel {
    /// Number of colour (non-alpha) channels.
    #[must_use]
    pub const fn color_channels(self) -> usize {
        match self {
            Self::Luma | Self::LumaAlpha => 1,
            Self::Rgb | Self::Rgba => 3,
        }
    }
}

impl From<image::ColorType> for ColorModel {
    fn from(color: image::ColorType) -> Self {
        match color {
            image::ColorType::L8 | image::ColorType::L16 => Self::Luma,
            image::ColorType::La8 | image::ColorType::La16 => Self::LumaAlpha,
            image::ColorType::Rgb8 | image::ColorType::Rgb16 | image::ColorType::Rgb32F => {
                Self::Rgb
            }
            _ => Self::Rgba,
        }
    }
}

/// Errors that can occur while building the pipeline or sampling.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The source image has no levels or a zero-sized base level.
    #[error("source image is missing or empty")]
    MissingSource,

    /// Extraction parameters are out of range.
    #[error("invalid extraction parameters: {0}")]
    InvalidConfig(String),

    /// The image source failed to deliver pixels.
    #[error("image source error: {0}")]
    Source(String),

    /// An intermediate result was requested before its stage was built.
    #[error("pipeline stage for {0:?} has not been built")]
    MissingStage(crate::pipeline::IntermediateResult),

    /// Failed to decode an input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),
}
