//! Provider trait definitions.

use crate::error::ProviderResult;
use async_trait::async_trait;
use depot_core::{DEFAULT_ARCHIVE_EXTENSION, ImportPath};

/// Number of path segments forming a package root on most forges
/// (`host/owner/repo`).
pub const DEFAULT_ROOT_SEGMENTS: usize = 3;

/// Result of a revision lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    /// Normalized import path of the package.
    pub import_path: ImportPath,
    /// Tag or branch that was looked up, after default substitution.
    pub value: String,
    /// Canonical revision identifier returned by the provider.
    pub revision: String,
    /// Path the archive is actually downloaded from. Differs from
    /// `import_path` for redirector providers.
    pub download_path: ImportPath,
}

/// An upstream hosting provider.
///
/// Providers are selected by first prefix match over an ordered list, so
/// prefixes of earlier entries shadow later ones.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    /// Static identifier for metrics and logs (e.g. "github").
    fn name(&self) -> &'static str;

    /// Import path prefix owned by this provider, including the trailing slash.
    fn prefix(&self) -> &'static str;

    /// Reduce an import path to its package root.
    fn normalize(&self, import_path: &ImportPath) -> ImportPath {
        import_path.truncated(DEFAULT_ROOT_SEGMENTS)
    }

    /// Archive file extension, including the leading dot.
    fn extension(&self) -> &'static str {
        DEFAULT_ARCHIVE_EXTENSION
    }

    /// Resolve `value` (tag, branch or revision hint; empty for the default
    /// branch) to a canonical revision of the normalized `import_path`.
    async fn resolve_revision(&self, import_path: &ImportPath, value: &str)
    -> ProviderResult<Resolution>;

    /// URL of the archive for a resolved revision.
    fn archive_url(&self, resolution: &Resolution) -> ProviderResult<String>;
}

/// Split `host/owner/repo[/..]` into owner and repo.
pub(crate) fn owner_and_repo(path: &ImportPath) -> Option<(&str, &str)> {
    let mut segments = path.segments().skip(1);
    match (segments.next(), segments.next()) {
        (Some(owner), Some(repo)) => Some((owner, repo)),
        _ => None,
    }
}

/// Default tag for a version control system, if it is supported.
pub(crate) fn default_tag(vcs: &str) -> Option<&'static str> {
    match vcs {
        "git" => Some("master"),
        "hg" => Some("default"),
        _ => None,
    }
}
