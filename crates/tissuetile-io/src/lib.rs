//! tissuetile-io: Filesystem output for tile extraction.
//!
//! Saves accepted tile rasters at a chosen pyramid level and writes the
//! session document produced by `tissuetile-export`. The pipeline and
//! serializer crates stay free of I/O.

pub mod output;
pub mod write;

pub use output::{DefaultRoot, FixedRoot, OutputPathChooser, resolve_root};
pub use write::{
    ExportError, ExportOptions, ExportSummary, TileFormat, export_session, save_tile, tile_path,
    write_session,
};
