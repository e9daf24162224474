//! Channel selection: project RGBA source pixels onto one scalar channel.
//!
//! This is the first pipeline stage. The channel index addresses the
//! colour channels of the source's [`ColorModel`]; alpha is never
//! selected.

use image::GrayImage;

use crate::types::{ColorModel, RgbaImage};

/// Channel used for tissue detection (green for RGB sources).
pub const DEFAULT_CHANNEL: usize = 1;

/// Resolve a requested channel index against a colour model.
///
/// Indices past the last colour channel select the last colour channel,
/// so grey sources always project to luma.
#[must_use]
pub const fn effective_channel(channel: usize, model: ColorModel) -> usize {
    let last = model.color_channels() - 1;
    if channel > last { last } else { channel }
}

/// Extract one channel of an RGBA raster as a grey image.
#[must_use = "returns the single-channel image"]
pub fn select_channel(image: &RgbaImage, channel: usize, model: ColorModel) -> GrayImage {
    let index = effective_channel(channel, model);
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        image::Luma([image.get_pixel(x, y).0[index]])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_green_from_rgb() {
        let img = RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 255]));
        let green = select_channel(&img, 1, ColorModel::Rgb);
        assert_eq!(green.dimensions(), (3, 2));
        assert!(green.pixels().all(|p| p.0[0] == 20));
    }

    #[test]
    fn out_of_range_channel_clamps_to_last_color_channel() {
        assert_eq!(effective_channel(3, ColorModel::Rgba), 2);
        assert_eq!(effective_channel(1, ColorModel::Luma), 0);
        assert_eq!(effective_channel(1, ColorModel::LumaAlpha), 0);
    }

    #[test]
    fn grey_source_projects_to_luma() {
        let img = RgbaImage::from_pixel(1, 1, image::Rgba([77, 77, 77, 0]));
        let out = select_channel(&img, DEFAULT_CHANNEL, ColorModel::LumaAlpha);
        assert_eq!(out.get_pixel(0, 0).0[0], 77);
    }
}
