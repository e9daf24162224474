//! Mapping level-0 tile geometry onto other pyramid levels.

use serde::{Deserialize, Serialize};

use crate::source::PyramidSource;
use crate::types::{Dimensions, Rect};

/// Magnification labels, coarsest first.
const MAGNIFICATIONS: [&str; 5] = ["5.0X", "10.0X", "20.0X", "40.0X", "80.0X"];

/// A level-0 rectangle expressed at another level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelMapping {
    /// Level the geometry was mapped to (after clamping).
    pub level: usize,
    /// Rectangle in level coordinates.
    pub region: Rect,
}

/// Converts level-0 geometry to any level of one pyramid.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionMapper {
    levels: Vec<Dimensions>,
    factor: f64,
}

impl ResolutionMapper {
    /// Build a mapper from per-level dimensions, level 0 first.
    ///
    /// The per-level factor is `min(w0 / w1, h0 / h1)` using integer
    /// division, or 1 for single-level images.
    #[must_use]
    pub fn new(levels: Vec<Dimensions>) -> Self {
        let factor = match (levels.first(), levels.get(1)) {
            (Some(base), Some(next)) if next.width > 0 && next.height > 0 => {
                let ratio = (base.width / next.width).min(base.height / next.height);
                f64::from(ratio.max(1))
            }
            _ => 1.0,
        };
        Self { levels, factor }
    }

    /// Build a mapper from a source's level dimensions.
    #[must_use]
    pub fn from_source(source: &dyn PyramidSource) -> Self {
        Self::new(
            (0..source.level_count())
                .map_while(|level| source.dimensions(level))
                .collect(),
        )
    }

    /// Down-sampling factor between adjacent levels.
    #[must_use]
    pub const fn level_factor(&self) -> f64 {
        self.factor
    }

    /// Number of known levels.
    #[must_use]
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// `level` if it exists, otherwise 0.
    #[must_use]
    pub fn clamp_level(&self, level: usize) -> usize {
        if level < self.levels.len() { level } else { 0 }
    }

    /// Map a level-0 rectangle to `level`.
    ///
    /// The origin is scaled by the per-axis ratio of level to base
    /// dimensions and truncated. The size is the rectangle's own size at
    /// level 0; at other levels it is `floor(side / factor^level)`, at
    /// least one pixel. Unknown levels map to level 0.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn map_to_level(&self, rect: Rect, level: usize) -> LevelMapping {
        let level = self.clamp_level(level);
        let (Some(base), Some(target)) = (self.levels.first(), self.levels.get(level)) else {
            return LevelMapping { level: 0, region: rect };
        };
        if level == 0 {
            return LevelMapping { level, region: rect };
        }

        let sx = f64::from(target.width) / f64::from(base.width.max(1));
        let sy = f64::from(target.height) / f64::from(base.height.max(1));
        let divisor = self.factor.powi(level as i32);
        let shrink = |side: u32| ((f64::from(side) / divisor).floor() as u32).max(1);

        LevelMapping {
            level,
            region: Rect::new(
                (f64::from(rect.x) * sx) as u32,
                (f64::from(rect.y) * sy) as u32,
                shrink(rect.width),
                shrink(rect.height),
            ),
        }
    }
}

/// Resolution labels indexed by level.
///
/// Starting from `max_magnification`, one label is taken per halving
/// while the integer part stays divisible by 5, up to five labels;
/// the list is then reversed so index 0 names level 0. Without a usable
/// magnification the list is empty and [`resolution_label`] falls back
/// to `L<level>`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn magnification_labels(max_magnification: Option<f64>) -> Vec<String> {
    let Some(mut magnification) = max_magnification.filter(|m| m.is_finite() && *m >= 1.0) else {
        return Vec::new();
    };
    let mut labels = Vec::new();
    while (magnification as i64) % 5 == 0 && labels.len() < MAGNIFICATIONS.len() {
        labels.push(MAGNIFICATIONS[labels.len()].to_string());
        magnification /= 2.0;
    }
    labels.reverse();
    labels
}

/// Label for `level`, falling back to `L<level>`.
#[must_use]
pub fn resolution_label(labels: &[String], level: usize) -> String {
    labels
        .get(level)
        .cloned()
        .unwrap_or_else(|| format!("L{level}"))
}
