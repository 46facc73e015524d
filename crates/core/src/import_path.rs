//! Import path parsing.
//!
//! An import path is the client-facing name of a package, such as
//! `github.com/owner/repo/subpkg`. Parsing only checks that the value is safe
//! to use as a filesystem and object-store key; provider specific
//! normalization happens in the provider registry.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum accepted import path length in bytes.
pub const MAX_IMPORT_PATH_LEN: usize = 512;

/// A validated import path.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImportPath(String);

impl ImportPath {
    /// Parse a client supplied import path.
    ///
    /// Surrounding whitespace, a leading URL scheme and trailing slashes are
    /// dropped. The remaining value must be a relative, slash separated path
    /// whose first segment is a host name.
    pub fn parse(raw: &str) -> crate::Result<Self> {
        let mut path = raw.trim();
        for scheme in ["https://", "http://"] {
            if let Some(rest) = path.strip_prefix(scheme) {
                path = rest;
            }
        }
        let path = path.trim_end_matches('/');

        if path.is_empty() {
            return Err(crate::Error::InvalidImportPath(
                "import path cannot be empty".to_string(),
            ));
        }
        if path.len() > MAX_IMPORT_PATH_LEN {
            return Err(crate::Error::InvalidImportPath(format!(
                "import path exceeds {MAX_IMPORT_PATH_LEN} bytes"
            )));
        }
        if path.starts_with('/') {
            return Err(crate::Error::InvalidImportPath(format!(
                "import path must be relative: {path}"
            )));
        }

        for segment in path.split('/') {
            if segment.is_empty() {
                return Err(crate::Error::InvalidImportPath(format!(
                    "empty segment in import path: {path}"
                )));
            }
            if segment == "." || segment == ".." || segment.contains("..") {
                return Err(crate::Error::InvalidImportPath(format!(
                    "relative segment in import path: {path}"
                )));
            }
            for c in segment.chars() {
                if !matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '~' | '+') {
                    return Err(crate::Error::InvalidImportPath(format!(
                        "invalid character {c:?} in import path: {path}"
                    )));
                }
            }
        }

        if !path.split('/').next().is_some_and(|host| host.contains('.')) {
            return Err(crate::Error::InvalidImportPath(format!(
                "import path must start with a host name: {path}"
            )));
        }

        Ok(Self(path.to_string()))
    }

    /// Get the path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the slash separated segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// The last path segment, used when naming downloaded files.
    pub fn base_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Keep at most the first `segments` segments.
    ///
    /// A prefix of a valid path is itself valid, so no re-validation happens.
    pub fn truncated(&self, segments: usize) -> ImportPath {
        match self.0.match_indices('/').nth(segments.saturating_sub(1)) {
            Some((idx, _)) if segments > 0 => ImportPath(self.0[..idx].to_string()),
            _ => self.clone(),
        }
    }

    /// Check whether the path starts with a registry prefix such as `github.com/`.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix) || format!("{}/", self.0) == prefix
    }
}

impl TryFrom<String> for ImportPath {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<ImportPath> for String {
    fn from(path: ImportPath) -> Self {
        path.0
    }
}

impl AsRef<str> for ImportPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ImportPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImportPath({})", self.0)
    }
}

impl fmt::Display for ImportPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_strips_scheme_and_trailing_slash() {
        let path = ImportPath::parse(" https://github.com/owner/repo/ ").unwrap();
        assert_eq!(path.as_str(), "github.com/owner/repo");
        assert_eq!(path.base_name(), "repo");
    }

    #[test]
    fn parse_rejects_traversal() {
        assert!(ImportPath::parse("github.com/../etc/passwd").is_err());
        assert!(ImportPath::parse("github.com/owner/..").is_err());
        assert!(ImportPath::parse("/github.com/owner").is_err());
        assert!(ImportPath::parse("github.com//owner").is_err());
    }

    #[test]
    fn parse_rejects_missing_host() {
        assert!(ImportPath::parse("").is_err());
        assert!(ImportPath::parse("localpkg/foo").is_err());
    }

    #[test]
    fn parse_rejects_unsafe_characters() {
        assert!(ImportPath::parse("github.com/owner/re po").is_err());
        assert!(ImportPath::parse("github.com/owner/repo?x=1").is_err());
        assert!(ImportPath::parse("github.com\\owner").is_err());
    }

    #[test]
    fn has_prefix_matches_bare_host() {
        let path = ImportPath::parse("gopkg.in/yaml.v2").unwrap();
        assert!(path.has_prefix("gopkg.in/"));
        assert!(!path.has_prefix("github.com/"));
    }

    #[test]
    fn truncated_keeps_root_segments() {
        let path = ImportPath::parse("github.com/owner/repo/sub/pkg").unwrap();
        assert_eq!(path.truncated(3).as_str(), "github.com/owner/repo");
        let short = ImportPath::parse("github.com/owner").unwrap();
        assert_eq!(short.truncated(3), short);
        assert_eq!(path.truncated(0), path);
    }

    #[test]
    fn deserialize_validates() {
        let ok: ImportPath = serde_json::from_str("\"golang.org/x/net\"").unwrap();
        assert_eq!(ok.as_str(), "golang.org/x/net");
        assert!(serde_json::from_str::<ImportPath>("\"../x\"").is_err());
    }
}
