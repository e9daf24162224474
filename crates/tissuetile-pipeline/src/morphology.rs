//! Morphological closing and opening of binary masks.
//!
//! Uses a square structuring element of side `window` built as an
//! [`imageproc::morphology::Mask`]. Closing fills small holes inside
//! tissue regions; opening then removes small isolated specks from the
//! closed mask.
//!
//! For even windows the element has no pixel centre, so it is anchored
//! at `(window - 1) / 2` and the second pass of each operation uses the
//! reflected element. That keeps opening anti-extensive and closing
//! extensive without shifting the mask.

use image::{GrayImage, Luma};
use imageproc::morphology::{Mask, grayscale_dilate, grayscale_erode};

/// Largest morphology window accepted by the configuration layer.
pub const MAX_WINDOW: u32 = 10;

/// Side of the square element for a window size; imageproc masks are
/// anchored by `u8` offsets.
fn element_side(window: u32) -> u8 {
    u8::try_from(window).unwrap_or(u8::MAX)
}

/// The `window × window` element and its reflection through the origin.
///
/// Returns `None` for windows of 0 or 1, which leave the mask unchanged.
#[must_use]
pub fn structuring_elements(window: u32) -> Option<(Mask, Mask)> {
    let side = element_side(window);
    if side <= 1 {
        return None;
    }
    let square = GrayImage::from_pixel(u32::from(side), u32::from(side), Luma([255]));
    let anchor = (side - 1) / 2;
    let reflected_anchor = side - 1 - anchor;
    Some((
        Mask::from_image(&square, anchor, anchor),
        Mask::from_image(&square, reflected_anchor, reflected_anchor),
    ))
}

/// Morphological closing (dilate, then erode).
#[must_use = "returns the closed mask"]
pub fn close(mask: &GrayImage, window: u32) -> GrayImage {
    match structuring_elements(window) {
        None => mask.clone(),
        Some((element, reflected)) => {
            grayscale_erode(&grayscale_dilate(mask, &reflected), &element)
        }
    }
}

/// Morphological opening (erode, then dilate).
#[must_use = "returns the opened mask"]
pub fn open(mask: &GrayImage, window: u32) -> GrayImage {
    match structuring_elements(window) {
        None => mask.clone(),
        Some((element, reflected)) => {
            grayscale_dilate(&grayscale_erode(mask, &element), &reflected)
        }
    }
}
