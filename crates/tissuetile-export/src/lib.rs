//! tissuetile-export: Pure session document serializer (sans-IO)
//!
//! Converts accepted regions into an XML overlay session and derives the
//! file names of exported artifacts. Writing them to disk lives in
//! `tissuetile-io`.

pub mod session;

pub use session::{
    ExportSession, default_root, session_file_name, tile_file_name, to_session_xml,
};
