//! Uniform tile-grid sampling over a foreground mask.
//!
//! The grid starts at `(offset_x, offset_y)` and steps by `spacing` on
//! both axes; every grid point anchors a square candidate tile of side
//! `size`. Each candidate is mapped onto the down-sampled mask raster and
//! accepted when the summed mask values over its footprint, normalized
//! by `size² × mask_scale`, strictly exceed the requested fraction.
//!
//! The mask holds raw 0/255 values and the normalizer scales by
//! `mask_scale` once, not squared, so scores are not confined to
//! `[0, 1]`. Both quirks are kept so that existing fraction settings
//! select the same tiles.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use image::GrayImage;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::types::{Dimensions, Point, Rect};

/// Geometry and acceptance settings for one sampling pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridParams {
    /// Tile side in level-0 pixels.
    pub size: u32,
    /// Distance between adjacent tile origins.
    pub spacing: u32,
    /// Horizontal origin of the first column.
    pub offset_x: u32,
    /// Vertical origin of the first row.
    pub offset_y: u32,
    /// Minimum normalized foreground score (exclusive).
    pub fraction: f64,
}

impl GridParams {
    /// Number of `(columns, rows)` covering `dimensions`.
    ///
    /// Ceiling division, so the last tile of a row or column may extend
    /// past the image edge.
    #[must_use]
    pub fn grid_counts(&self, dimensions: Dimensions) -> (u32, u32) {
        let count = |extent: u32, offset: u32| {
            if self.spacing == 0 || offset >= extent {
                0
            } else {
                (extent - offset).div_ceil(self.spacing)
            }
        };
        (
            count(dimensions.width, self.offset_x),
            count(dimensions.height, self.offset_y),
        )
    }

    /// Candidate rectangle at grid position `(column, row)`.
    #[must_use]
    pub const fn candidate(&self, column: u32, row: u32) -> Rect {
        Rect::new(
            self.offset_x + column * self.spacing,
            self.offset_y + row * self.spacing,
            self.size,
            self.size,
        )
    }
}

/// Cooperative cancellation, polled between rows and columns.
pub trait CancelSignal {
    /// Returns `true` once the operation should stop.
    fn is_cancelled(&self) -> bool;
}

/// A signal that never fires.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

impl CancelSignal for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Shareable cancellation flag.
///
/// Clones share the same flag, so a host thread can keep one clone and
/// trip it while the pass runs with the other.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create an untripped token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Clear a previous request.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

impl CancelSignal for CancelToken {
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// A scored candidate tile in level-0 coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    /// Tile rectangle (may extend past the image edge).
    pub rect: Rect,
    /// Normalized foreground score.
    pub score: f64,
}

/// Stroke pattern of an overlay outline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinePattern {
    /// Continuous line.
    #[default]
    Solid,
    /// Dashed line.
    Dash,
    /// Dotted line.
    Dot,
}

impl LinePattern {
    /// Name used in session documents.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Solid => "Solid",
            Self::Dash => "Dash",
            Self::Dot => "Dot",
        }
    }
}

/// Overlay drawing style attached to each exported region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphicStyle {
    /// Stroke colour as `[r, g, b]`.
    pub color: [u8; 3],
    /// Stroke width in screen pixels.
    pub width: u32,
    /// Stroke pattern.
    pub pattern: LinePattern,
    /// Label font descriptor (`family,points`).
    pub font: String,
}

impl Default for GraphicStyle {
    fn default() -> Self {
        Self {
            color: [181, 230, 29],
            width: 2,
            pattern: LinePattern::Solid,
            font: "Arial,10".to_string(),
        }
    }
}

impl GraphicStyle {
    /// Stroke colour as `#rrggbb`.
    #[must_use]
    pub fn hex_color(&self) -> String {
        let [r, g, b] = self.color;
        format!("#{r:02x}{g:02x}{b:02x}")
    }
}

/// An accepted tile, ready for export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiRecord {
    /// The accepted tile.
    pub tile: Tile,
    /// Display name, `Region <n>` in enumeration order.
    pub label: String,
    /// Corners: top-left, top-right, bottom-right, bottom-left.
    pub corners: [Point; 4],
    /// Overlay style.
    pub style: GraphicStyle,
    /// Free-text description.
    pub description: String,
}

impl RoiRecord {
    /// Geometry kind written to session documents.
    pub const SHAPE: &'static str = "rectangle";

    /// Record for the `index`-th accepted tile (1-based).
    #[must_use]
    pub fn new(tile: Tile, index: usize) -> Self {
        Self {
            corners: tile.rect.corners(),
            label: format!("Region {index}"),
            tile,
            style: GraphicStyle::default(),
            description: " ".to_string(),
        }
    }
}

/// Result of one sampling pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleOutcome {
    /// Accepted tiles, in enumeration order.
    pub records: Vec<RoiRecord>,
    /// Number of candidates scored (accepted or not).
    pub scored: usize,
    /// `true` if the pass stopped early.
    pub cancelled: bool,
}

/// Summed mask values over `rect` mapped into the raster by `scale`.
///
/// Mapped bounds are truncated toward zero and clipped to the raster.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn footprint_sum(mask: &GrayImage, rect: Rect, scale: f64) -> u64 {
    let map = |v: u64| (v as f64 * scale) as i64;
    let x0 = map(u64::from(rect.x)).max(0);
    let y0 = map(u64::from(rect.y)).max(0);
    let x1 = map(rect.right()).min(i64::from(mask.width()));
    let y1 = map(rect.bottom()).min(i64::from(mask.height()));

    let mut sum = 0u64;
    for y in y0..y1 {
        for x in x0..x1 {
            // Both bounds were clipped to the raster above.
            #[allow(clippy::cast_sign_loss)]
            let px = mask.get_pixel(x as u32, y as u32);
            sum += u64::from(px.0[0]);
        }
    }
    sum
}

/// Normalized foreground score of one candidate.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn score_tile(mask: &GrayImage, rect: Rect, mask_scale: f64) -> f64 {
    let area = f64::from(rect.width) * f64::from(rect.height) * mask_scale;
    if area <= 0.0 {
        return 0.0;
    }
    footprint_sum(mask, rect, mask_scale) as f64 / area
}

/// Scan the grid over `mask` and collect accepted tiles.
///
/// `dimensions` is the level-0 image size and `mask_scale` the ratio of
/// mask pixels to level-0 pixels. Cancellation is polled before every
/// row and every column; a cancelled pass returns what it accepted so
/// far with [`SampleOutcome::cancelled`] set.
#[must_use]
pub fn sample(
    dimensions: Dimensions,
    mask: &GrayImage,
    mask_scale: f64,
    params: &GridParams,
    cancel: &dyn CancelSignal,
) -> SampleOutcome {
    let mut outcome = SampleOutcome::default();
    if params.size == 0 {
        return outcome;
    }
    let (columns, rows) = params.grid_counts(dimensions);

    'rows: for row in 0..rows {
        if cancel.is_cancelled() {
            outcome.cancelled = true;
            break;
        }
        for column in 0..columns {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break 'rows;
            }
            let rect = params.candidate(column, row);
            if rect.x >= dimensions.width || rect.y >= dimensions.height {
                continue;
            }
            let score = score_tile(mask, rect, mask_scale);
            outcome.scored += 1;
            if score > params.fraction {
                let index = outcome.records.len() + 1;
                outcome.records.push(RoiRecord::new(Tile { rect, score }, index));
            }
        }
    }

    debug!(
        "sampled {columns}x{rows} grid: {} scored, {} accepted{}",
        outcome.scored,
        outcome.records.len(),
        if outcome.cancelled { " (cancelled)" } else { "" },
    );
    outcome
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::Cell;

    use super::*;

    const DIMS: Dimensions = Dimensions::new(100, 100);

    fn params(size: u32, fraction: f64) -> GridParams {
        GridParams {
            size,
            spacing: 20,
            offset_x: 5,
            offset_y: 5,
            fraction,
        }
    }

    fn full_mask() -> GrayImage {
        GrayImage::from_pixel(100, 100, image::Luma([255]))
    }

    /// Trips after a fixed number of polls.
    struct AfterPolls {
        remaining: Cell<usize>,
    }

    impl CancelSignal for AfterPolls {
        fn is_cancelled(&self) -> bool {
            let left = self.remaining.get();
            if left == 0 {
                return true;
            }
            self.remaining.set(left - 1);
            false
        }
    }

    #[test]
    fn grid_counts_use_ceiling_division() {
        assert_eq!(params(10, 0.5).grid_counts(DIMS), (5, 5));
        let p = GridParams {
            spacing: 30,
            offset_x: 0,
            offset_y: 10,
            ..params(10, 0.5)
        };
        assert_eq!(p.grid_counts(Dimensions::new(100, 100)), (4, 3));
    }

    #[test]
    fn full_mask_accepts_whole_grid() {
        let outcome = sample(DIMS, &full_mask(), 1.0, &params(10, 0.5), &NeverCancel);
        assert_eq!(outcome.scored, 25);
        assert_eq!(outcome.records.len(), 25);
        assert!(!outcome.cancelled);
        let first = &outcome.records[0];
        assert_eq!(first.tile.rect, Rect::new(5, 5, 10, 10));
        assert_eq!(first.label, "Region 1");
        assert_eq!(outcome.records[24].tile.rect, Rect::new(85, 85, 10, 10));
        assert_eq!(outcome.records[24].label, "Region 25");
    }

    #[test]
    fn repeated_sampling_gives_identical_tiles() {
        // Disc of tissue on a half-scale mask.
        let mask = GrayImage::from_fn(50, 50, |x, y| {
            let (dx, dy) = (f64::from(x) - 24.5, f64::from(y) - 24.5);
            image::Luma([if dx.hypot(dy) < 18.0 { 255 } else { 0 }])
        });
        let grid = params(12, 0.4);

        let first = sample(DIMS, &mask, 0.5, &grid, &NeverCancel);
        let second = sample(DIMS, &mask, 0.5, &grid, &NeverCancel);

        assert!(!first.records.is_empty());
        assert!(first.records.len() < 25);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn score_uses_raw_mask_values() {
        let score = score_tile(&full_mask(), Rect::new(0, 0, 10, 10), 1.0);
        assert!((score - 255.0).abs() < 1e-9);
    }

    #[test]
    fn equality_with_fraction_is_rejected() {
        let empty = GrayImage::new(100, 100);
        let outcome = sample(DIMS, &empty, 1.0, &params(10, 0.0), &NeverCancel);
        assert_eq!(outcome.scored, 25);
        assert!(outcome.records.is_empty());

        let full = sample(DIMS, &full_mask(), 1.0, &params(10, 255.0), &NeverCancel);
        assert!(full.records.is_empty());
    }

    #[test]
    fn only_tiles_over_foreground_are_accepted() {
        let mask = GrayImage::from_fn(100, 100, |x, _| image::Luma([if x < 50 { 255 } else { 0 }]));
        let outcome = sample(DIMS, &mask, 1.0, &params(10, 0.5), &NeverCancel);
        // Columns at x = 5, 25, 45 overlap the left half.
        assert_eq!(outcome.records.len(), 15);
        assert!(outcome.records.iter().all(|r| r.tile.rect.x < 50));
    }

    #[test]
    fn footprint_is_mapped_through_mask_scale() {
        // Mask at half resolution: tile (5..15) maps to mask (2..7).
        let mask = GrayImage::from_pixel(50, 50, image::Luma([255]));
        let score = score_tile(&mask, Rect::new(5, 5, 10, 10), 0.5);
        assert!((score - 255.0 * 25.0 / 50.0).abs() < 1e-9);
    }

    #[test]
    fn footprint_is_clipped_to_raster() {
        let mask = full_mask();
        let score = score_tile(&mask, Rect::new(95, 95, 10, 10), 1.0);
        assert!((score - 255.0 * 25.0 / 100.0).abs() < 1e-9);
    }

    #[test]
    fn cancel_after_first_row_keeps_partial_result() {
        // One poll before the row plus one per column.
        let cancel = AfterPolls {
            remaining: Cell::new(6),
        };
        let outcome = sample(DIMS, &full_mask(), 1.0, &params(10, 0.5), &cancel);
        assert!(outcome.cancelled);
        assert_eq!(outcome.scored, 5);
        assert_eq!(outcome.records.len(), 5);
    }

    #[test]
    fn cancel_before_start_scores_nothing() {
        let token = CancelToken::new();
        token.cancel();
        let outcome = sample(DIMS, &full_mask(), 1.0, &params(10, 0.5), &token);
        assert!(outcome.cancelled);
        assert_eq!(outcome.scored, 0);
        token.reset();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn token_clones_share_flag() {
        let token = CancelToken::new();
        let remote = token.clone();
        remote.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn record_defaults() {
        let record = RoiRecord::new(
            Tile {
                rect: Rect::new(0, 0, 4, 4),
                score: 1.0,
            },
            3,
        );
        assert_eq!(record.label, "Region 3");
        assert_eq!(record.description, " ");
        assert_eq!(record.style.hex_color(), "#b5e61d");
        assert_eq!(record.style.pattern.as_str(), "Solid");
        assert_eq!(record.style.font, "Arial,10");
    }
}
