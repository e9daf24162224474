//! Writing tile rasters and session documents to disk.

use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use log::{debug, info};
use tissuetile_export::{ExportSession, session_file_name, tile_file_name, to_session_xml};
use tissuetile_pipeline::resolution::LevelMapping;
use tissuetile_pipeline::{
    CancelSignal, ColorModel, Dimensions, PipelineError, PyramidSource, Rect, RoiRecord,
    TileExtraction,
};

/// Errors that can occur while exporting.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Writing a file failed.
    #[error("failed to write {}: {source}", .path.display())]
    Io {
        /// File being written.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Encoding a tile image failed.
    #[error("failed to save tile {}: {source}", .path.display())]
    Image {
        /// File being written.
        path: PathBuf,
        /// Underlying error.
        source: image::ImageError,
    },

    /// Reading tile pixels from the source failed.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Image format for saved tiles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TileFormat {
    /// Uncompressed TIFF.
    #[default]
    Tiff,
    /// PNG.
    Png,
}

impl TileFormat {
    /// File extension, without the dot.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Tiff => "tif",
            Self::Png => "png",
        }
    }

    const fn image_format(self) -> ImageFormat {
        match self {
            Self::Tiff => ImageFormat::Tiff,
            Self::Png => ImageFormat::Png,
        }
    }
}

/// Where and how an export writes its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOptions {
    /// File name root shared by every artifact.
    pub root: PathBuf,
    /// Pyramid level tiles are read from.
    pub resolution: usize,
    /// Tile image format.
    pub format: TileFormat,
}

/// What an export wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    /// Saved tile images, in enumeration order.
    pub tiles: Vec<PathBuf>,
    /// Accepted tiles not saved because they cross the image edge.
    pub skipped: usize,
    /// The session document, absent when the export was cancelled.
    pub session: Option<PathBuf>,
}

impl ExportSummary {
    /// Returns `true` if the export stopped before writing the session
    /// document.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        self.session.is_none()
    }
}

/// Write the session document for `session` next to `root`.
///
/// The document is written to a sibling `.partial` file first and then
/// renamed over the final name, so a failed write leaves any earlier
/// document in place.
///
/// # Errors
///
/// Returns [`ExportError::Io`] if the file cannot be written.
pub fn write_session(
    session: &ExportSession,
    dimensions: Dimensions,
    root: &Path,
) -> Result<PathBuf, ExportError> {
    let path = PathBuf::from(session_file_name(&root.to_string_lossy()));
    let mut partial = path.clone().into_os_string();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    let xml = to_session_xml(session, dimensions);
    fs::write(&partial, xml).map_err(|source| ExportError::Io {
        path: partial.clone(),
        source,
    })?;
    if let Err(source) = fs::rename(&partial, &path) {
        let _ = fs::remove_file(&partial);
        return Err(ExportError::Io { path, source });
    }
    info!(
        "wrote session with {} regions to {}",
        session.records.len(),
        path.display()
    );
    Ok(path)
}

/// Keep only the channels the source actually carries. Grey alpha is
/// dropped.
fn native_pixels(rgba: image::RgbaImage, model: ColorModel) -> DynamicImage {
    let image = DynamicImage::ImageRgba8(rgba);
    match model {
        ColorModel::Luma | ColorModel::LumaAlpha => DynamicImage::ImageLuma8(image.to_luma8()),
        ColorModel::Rgb => DynamicImage::ImageRgb8(image.to_rgb8()),
        ColorModel::Rgba => image,
    }
}

/// Read the pixels of one mapped tile and save them to `path`.
///
/// Returns the path written.
///
/// # Errors
///
/// Returns [`ExportError::Pipeline`] if the source cannot deliver the
/// pixels and [`ExportError::Image`] if encoding or writing fails.
pub fn save_tile(
    source: &dyn PyramidSource,
    mapping: LevelMapping,
    path: &Path,
    format: TileFormat,
) -> Result<PathBuf, ExportError> {
    let rgba = source.read_region(mapping.level, mapping.region)?;
    native_pixels(rgba, source.color_model())
        .save_with_format(path, format.image_format())
        .map_err(|source| ExportError::Image {
            path: path.to_path_buf(),
            source,
        })?;
    debug!(
        "saved {}x{} tile at level {} to {}",
        mapping.region.width,
        mapping.region.height,
        mapping.level,
        path.display()
    );
    Ok(path.to_path_buf())
}

/// Path of the tile image for `rect` under `options`.
#[must_use]
pub fn tile_path(options: &ExportOptions, rect: Rect, label: &str) -> PathBuf {
    PathBuf::from(tile_file_name(
        &options.root.to_string_lossy(),
        rect,
        label,
        options.format.extension(),
    ))
}

/// Save every exportable tile of `records`, then the session document.
///
/// Only tiles lying entirely inside the image have their pixels saved;
/// tiles crossing an edge are still listed in the session document.
/// `cancel` is polled before each tile. A cancelled export keeps the
/// tiles already written but writes no session document.
///
/// # Errors
///
/// Returns the first [`ExportError`] encountered.
pub fn export_session(
    extraction: &TileExtraction,
    records: &[RoiRecord],
    options: &ExportOptions,
    cancel: &dyn CancelSignal,
) -> Result<ExportSummary, ExportError> {
    let dimensions = extraction.dimensions();
    let label = extraction.resolution_label(options.resolution);
    let mut summary = ExportSummary::default();

    for record in records {
        if cancel.is_cancelled() {
            info!(
                "export cancelled after {} tiles; session not written",
                summary.tiles.len()
            );
            return Ok(summary);
        }
        let rect = record.tile.rect;
        if !rect.fits_strictly_within(dimensions) {
            summary.skipped += 1;
            continue;
        }
        let mapping = extraction.map_to_level(rect, options.resolution);
        let path = tile_path(options, rect, &label);
        let saved = save_tile(extraction.source().as_ref(), mapping, &path, options.format)?;
        summary.tiles.push(saved);
    }

    let session = ExportSession::new(extraction.source().identifier(), records);
    summary.session = Some(write_session(&session, dimensions, &options.root)?);
    info!(
        "exported {} tiles ({} on the image edge) at {label}",
        summary.tiles.len(),
        summary.skipped
    );
    Ok(summary)
}
