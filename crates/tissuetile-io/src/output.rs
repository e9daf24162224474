//! Choosing where exported artifacts go.

use std::path::{Path, PathBuf};

/// Picks the file name root for one export.
///
/// Every artifact of an export is named `<root>_...`. Interactive hosts
/// ask the user; returning `None` aborts the export.
pub trait OutputPathChooser {
    /// Choose a root, starting from `default_root` (the source path
    /// without its extension).
    fn choose(&mut self, default_root: &Path) -> Option<PathBuf>;
}

/// Accepts the suggested root unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRoot;

impl OutputPathChooser for DefaultRoot {
    fn choose(&mut self, default_root: &Path) -> Option<PathBuf> {
        Some(default_root.to_path_buf())
    }
}

/// Always uses one preset root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedRoot(pub PathBuf);

impl OutputPathChooser for FixedRoot {
    fn choose(&mut self, _default_root: &Path) -> Option<PathBuf> {
        Some(self.0.clone())
    }
}

/// Ask `chooser` for the root of artifacts derived from `identifier`.
pub fn resolve_root(chooser: &mut dyn OutputPathChooser, identifier: &str) -> Option<PathBuf> {
    let suggested = Path::new(tissuetile_export::default_root(identifier));
    chooser.choose(suggested)
}
