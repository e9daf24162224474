//! Pyramidal image sources.
//!
//! The host application owns the actual slide reader; the pipeline only
//! talks to it through [`PyramidSource`]. [`MemoryPyramid`] is a small
//! in-memory implementation built by repeatedly down-sampling a decoded
//! image, used by the CLI and by tests.

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba};

use crate::types::{ColorModel, Dimensions, PipelineError, Rect, RgbaImage};

/// Pixel value used for any part of a request that falls outside the
/// image. White reads as background to the darker-is-tissue threshold.
const OUTSIDE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Default ratio between the dimensions of adjacent pyramid levels.
pub const DEFAULT_LEVEL_FACTOR: u32 = 4;

/// A multi-resolution image.
///
/// Level 0 is full resolution; each subsequent level is down-sampled by
/// a fixed factor. Pixels are always delivered as RGBA, with
/// [`color_model`](Self::color_model) describing which channels are
/// meaningful.
pub trait PyramidSource {
    /// Number of resolution levels.
    fn level_count(&self) -> usize;

    /// Pixel dimensions of `level`, or `None` past the last level.
    fn dimensions(&self, level: usize) -> Option<Dimensions>;

    /// Native colour layout of the source.
    fn color_model(&self) -> ColorModel;

    /// Source path or other identifier, used to name output artifacts.
    fn identifier(&self) -> &str;

    /// Scanner magnification of level 0, when known.
    fn max_magnification(&self) -> Option<f64> {
        None
    }

    /// Render a level-0 `region` down-sampled to `output` pixels.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Source`] if the source cannot deliver
    /// the requested pixels.
    fn render(&self, region: Rect, output: Dimensions) -> Result<RgbaImage, PipelineError>;

    /// Read the pixels of `region`, expressed in `level` coordinates, at
    /// that level's native resolution.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Source`] if `level` does not exist or
    /// the source cannot deliver the requested pixels.
    fn read_region(&self, level: usize, region: Rect) -> Result<RgbaImage, PipelineError>;
}

/// Base dimensions of `source`, failing when the source is empty.
///
/// # Errors
///
/// Returns [`PipelineError::MissingSource`] when the source has no
/// levels or a zero-sized base level.
pub fn base_dimensions(source: &dyn PyramidSource) -> Result<Dimensions, PipelineError> {
    match source.dimensions(0) {
        Some(dims) if source.level_count() > 0 && !dims.is_empty() => Ok(dims),
        _ => Err(PipelineError::MissingSource),
    }
}

/// An image pyramid held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryPyramid {
    identifier: String,
    levels: Vec<RgbaImage>,
    color_model: ColorModel,
    magnification: Option<f64>,
}

impl MemoryPyramid {
    /// Build a pyramid from a decoded image.
    ///
    /// Levels are produced by dividing both axes by `level_factor` until
    /// either axis would drop below one pixel or `max_levels` is reached.
    /// A factor below 2 yields a single-level pyramid.
    #[must_use]
    pub fn new(
        identifier: impl Into<String>,
        image: &DynamicImage,
        level_factor: u32,
        max_levels: usize,
    ) -> Self {
        let color_model = ColorModel::from(image.color());
        let base = image.to_rgba8();
        let mut levels = vec![base];

        if level_factor >= 2 {
            while levels.len() < max_levels {
                let Some(prev) = levels.last() else { break };
                let (w, h) = (prev.width() / level_factor, prev.height() / level_factor);
                if w == 0 || h == 0 {
                    break;
                }
                let next = imageops::resize(prev, w, h, FilterType::Triangle);
                levels.push(next);
            }
        }

        Self {
            identifier: identifier.into(),
            levels,
            color_model,
            magnification: None,
        }
    }

    /// Decode encoded image bytes and build a pyramid from them.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingSource`] if `bytes` is empty.
    /// Returns [`PipelineError::ImageDecode`] if the format is
    /// unrecognized or the data is corrupt.
    pub fn from_bytes(
        identifier: impl Into<String>,
        bytes: &[u8],
        level_factor: u32,
        max_levels: usize,
    ) -> Result<Self, PipelineError> {
        if bytes.is_empty() {
            return Err(PipelineError::MissingSource);
        }
        let image = image::load_from_memory(bytes)?;
        Ok(Self::new(identifier, &image, level_factor, max_levels))
    }

    /// Attach a scanner magnification to level 0.
    #[must_use]
    pub const fn with_magnification(mut self, magnification: f64) -> Self {
        self.magnification = Some(magnification);
        self
    }

    /// Scale of `level` relative to level 0, per axis.
    fn level_scale(&self, level: usize) -> (f64, f64) {
        let (Some(base), Some(lvl)) = (self.levels.first(), self.levels.get(level)) else {
            return (1.0, 1.0);
        };
        (
            f64::from(lvl.width()) / f64::from(base.width()),
            f64::from(lvl.height()) / f64::from(base.height()),
        )
    }

    /// Pick the coarsest level that still has at least as many pixels
    /// across `region` as the requested output.
    fn level_for(&self, region: Rect, output: Dimensions) -> usize {
        let needed_x = f64::from(output.width) / f64::from(region.width.max(1));
        let needed_y = f64::from(output.height) / f64::from(region.height.max(1));
        (0..self.levels.len())
            .rev()
            .find(|&level| {
                let (sx, sy) = self.level_scale(level);
                sx >= needed_x && sy >= needed_y
            })
            .unwrap_or(0)
    }

    /// Sample the level-space area `[x0, x1) × [y0, y1)` into an
    /// `output`-sized raster. Parts of the area outside the level are
    /// filled with [`OUTSIDE`].
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn sample_level(
        &self,
        level: usize,
        area: [f64; 4],
        output: Dimensions,
    ) -> Result<RgbaImage, PipelineError> {
        let image = self
            .levels
            .get(level)
            .ok_or_else(|| PipelineError::Source(format!("level {level} does not exist")))?;
        let [x0, y0, x1, y1] = area;
        let mut canvas = RgbaImage::from_pixel(output.width, output.height, OUTSIDE);

        let cx0 = x0.max(0.0).floor();
        let cy0 = y0.max(0.0).floor();
        let cx1 = x1.min(f64::from(image.width())).ceil();
        let cy1 = y1.min(f64::from(image.height())).ceil();
        if cx1 <= cx0 || cy1 <= cy0 {
            return Ok(canvas);
        }

        let crop = imageops::crop_imm(
            image,
            cx0 as u32,
            cy0 as u32,
            (cx1 - cx0) as u32,
            (cy1 - cy0) as u32,
        )
        .to_image();

        let fx = f64::from(output.width) / (x1 - x0);
        let fy = f64::from(output.height) / (y1 - y0);
        let dest_w = (((cx1 - cx0) * fx).round() as u32).max(1);
        let dest_h = (((cy1 - cy0) * fy).round() as u32).max(1);
        let dest_x = ((cx0 - x0) * fx).round() as i64;
        let dest_y = ((cy0 - y0) * fy).round() as i64;

        let placed = if crop.dimensions() == (dest_w, dest_h) {
            crop
        } else {
            imageops::resize(&crop, dest_w, dest_h, FilterType::Triangle)
        };
        imageops::replace(&mut canvas, &placed, dest_x, dest_y);
        Ok(canvas)
    }
}

impl PyramidSource for MemoryPyramid {
    fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn dimensions(&self, level: usize) -> Option<Dimensions> {
        self.levels
            .get(level)
            .map(|img| Dimensions::new(img.width(), img.height()))
    }

    fn color_model(&self) -> ColorModel {
        self.color_model
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn max_magnification(&self) -> Option<f64> {
        self.magnification
    }

    fn render(&self, region: Rect, output: Dimensions) -> Result<RgbaImage, PipelineError> {
        if output.is_empty() || region.size().is_empty() {
            return Err(PipelineError::Source(format!(
                "empty render request: region {region:?}, output {output:?}"
            )));
        }
        let level = self.level_for(region, output);
        let (sx, sy) = self.level_scale(level);
        #[allow(clippy::cast_precision_loss)]
        let area = [
            f64::from(region.x) * sx,
            f64::from(region.y) * sy,
            region.right() as f64 * sx,
            region.bottom() as f64 * sy,
        ];
        self.sample_level(level, area, output)
    }

    fn read_region(&self, level: usize, region: Rect) -> Result<RgbaImage, PipelineError> {
        if region.size().is_empty() {
            return Err(PipelineError::Source(format!(
                "empty read request: region {region:?}"
            )));
        }
        #[allow(clippy::cast_precision_loss)]
        let area = [
            f64::from(region.x),
            f64::from(region.y),
            region.right() as f64,
            region.bottom() as f64,
        ];
        self.sample_level(level, area, region.size())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn gray_pyramid(w: u32, h: u32, value: u8) -> MemoryPyramid {
        let img = DynamicImage::ImageLuma8(image::GrayImage::from_pixel(w, h, image::Luma([value])));
        MemoryPyramid::new("slide.tif", &img, 4, 8)
    }

    #[test]
    fn levels_shrink_by_factor() {
        let pyramid = gray_pyramid(1024, 512, 0);
        assert_eq!(pyramid.level_count(), 5);
        assert_eq!(pyramid.dimensions(1), Some(Dimensions::new(256, 128)));
        assert_eq!(pyramid.dimensions(4), Some(Dimensions::new(4, 2)));
        assert_eq!(pyramid.dimensions(5), None);
    }

    #[test]
    fn max_levels_caps_pyramid() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::new(1024, 1024));
        let pyramid = MemoryPyramid::new("a", &img, 2, 3);
        assert_eq!(pyramid.level_count(), 3);
        assert_eq!(pyramid.color_model(), ColorModel::Rgb);
    }

    #[test]
    fn factor_below_two_is_single_level() {
        let pyramid = MemoryPyramid::new("a", &DynamicImage::new_rgb8(64, 64), 1, 8);
        assert_eq!(pyramid.level_count(), 1);
    }

    #[test]
    fn render_produces_requested_size() {
        let pyramid = gray_pyramid(1000, 600, 40);
        let out = pyramid
            .render(Rect::new(0, 0, 1000, 600), Dimensions::new(100, 60))
            .unwrap();
        assert_eq!(out.dimensions(), (100, 60));
        assert_eq!(out.get_pixel(50, 30).0[0], 40);
    }

    #[test]
    fn render_fills_outside_with_white() {
        let pyramid = gray_pyramid(100, 100, 0);
        let out = pyramid
            .render(Rect::new(50, 0, 100, 100), Dimensions::new(100, 100))
            .unwrap();
        assert_eq!(out.get_pixel(10, 10).0[0], 0);
        assert_eq!(out.get_pixel(90, 10).0[0], 255);
    }

    #[test]
    fn read_region_reads_level_pixels() {
        let img = DynamicImage::ImageLuma8(image::GrayImage::from_fn(64, 64, |x, _| {
            image::Luma([if x < 32 { 0 } else { 200 }])
        }));
        let pyramid = MemoryPyramid::new("a", &img, 2, 4);
        let tile = pyramid.read_region(0, Rect::new(30, 0, 4, 4)).unwrap();
        assert_eq!(tile.dimensions(), (4, 4));
        assert_eq!(tile.get_pixel(0, 0).0[0], 0);
        assert_eq!(tile.get_pixel(3, 0).0[0], 200);
    }

    #[test]
    fn read_region_rejects_missing_level() {
        let pyramid = gray_pyramid(16, 16, 0);
        let result = pyramid.read_region(9, Rect::new(0, 0, 4, 4));
        assert!(matches!(result, Err(PipelineError::Source(_))));
    }

    #[test]
    fn empty_bytes_is_missing_source() {
        let result = MemoryPyramid::from_bytes("a", &[], 4, 4);
        assert!(matches!(result, Err(PipelineError::MissingSource)));
    }

    #[test]
    fn corrupt_bytes_is_decode_error() {
        let result = MemoryPyramid::from_bytes("a", &[0xFF, 0x00, 0x12], 4, 4);
        assert!(matches!(result, Err(PipelineError::ImageDecode(_))));
    }

    #[test]
    fn base_dimensions_of_valid_source() {
        let pyramid = gray_pyramid(30, 20, 0);
        assert_eq!(base_dimensions(&pyramid).unwrap(), Dimensions::new(30, 20));
    }
}
