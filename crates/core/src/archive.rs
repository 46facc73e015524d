//! Deterministic archive naming.
//!
//! Every cached revision has three names derived from the same triple
//! (normalized import path, revision, extension):
//! - the hot-tier key `<import path>/<revision><ext>` below the archive root,
//! - the cold-tier key `<import path>-<revision><ext>`,
//! - the file name offered to clients, `<base name>-<short revision><ext>`.

use crate::SHORT_REVISION_LEN;
use crate::import_path::ImportPath;
use std::path::{Path, PathBuf};

/// Extension used when no provider specific rule applies.
pub const DEFAULT_ARCHIVE_EXTENSION: &str = ".zip";

/// Abbreviate a revision for display.
pub fn short_revision(revision: &str) -> &str {
    match revision.char_indices().nth(SHORT_REVISION_LEN) {
        Some((idx, _)) => &revision[..idx],
        None => revision,
    }
}

/// Validate a resolved revision string before it is used in a key.
pub fn validate_revision(revision: &str) -> crate::Result<()> {
    if revision.is_empty() {
        return Err(crate::Error::InvalidRevision(
            "revision cannot be empty".to_string(),
        ));
    }
    if !revision
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        || revision.contains("..")
    {
        return Err(crate::Error::InvalidRevision(format!(
            "revision contains unsupported characters: {revision}"
        )));
    }
    Ok(())
}

/// Layout of the hot tier on local disk.
#[derive(Clone, Debug)]
pub struct ArchiveLayout {
    root: PathBuf,
}

impl ArchiveLayout {
    /// Create a layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The archive root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Hot-tier key relative to the archive root.
    pub fn local_key(import_path: &ImportPath, revision: &str, extension: &str) -> String {
        format!("{import_path}/{revision}{extension}")
    }

    /// Absolute path of a cached archive on disk.
    pub fn archive_path(&self, import_path: &ImportPath, revision: &str, extension: &str) -> PathBuf {
        self.root
            .join(Self::local_key(import_path, revision, extension))
    }

    /// Directory holding every cached revision of a package.
    pub fn package_dir(&self, import_path: &ImportPath) -> PathBuf {
        self.root.join(import_path.as_str())
    }

    /// Cold-tier object key.
    pub fn remote_key(import_path: &ImportPath, revision: &str, extension: &str) -> String {
        format!("{import_path}-{revision}{extension}")
    }

    /// File name suggested to clients downloading an archive.
    pub fn download_name(import_path: &ImportPath, revision: &str, extension: &str) -> String {
        format!(
            "{}-{}{}",
            import_path.base_name(),
            short_revision(revision),
            extension
        )
    }
}
