//! gopkg.in versioned redirector onto GitHub.
//!
//! `gopkg.in/[user/]name.vN[/sub]` is served from `github.com/{user}/{name}`,
//! where `user` defaults to `go-{name}`. Both spellings normalize to
//! `gopkg.in/{user}/name.vN`, so `gopkg.in/yaml.v2` and
//! `gopkg.in/go-yaml/yaml.v2` share one package. The version selects the
//! greatest branch or tag named `vN` or `vN.*` (`v0` means `master`).

use crate::error::{ProviderError, ProviderResult};
use crate::github;
use crate::http;
use crate::traits::{Provider, Resolution};
use async_trait::async_trait;
use depot_core::ImportPath;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

const PREFIX: &str = "gopkg.in";

static PATH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^/(?:([a-zA-Z0-9][-a-zA-Z0-9]+)/)?([a-zA-Z][-.a-zA-Z0-9]*)\.((?:v0|v[1-9][0-9]*)(?:\.0|\.[1-9][0-9]*){0,2})(?:\.git)?((?:/[a-zA-Z0-9][-.a-zA-Z0-9]*)*)$",
    )
    .expect("gopkg path pattern is valid")
});

/// Parsed `gopkg.in` path.
#[derive(Debug, PartialEq, Eq)]
struct VersionedPath<'a> {
    user: Option<&'a str>,
    name: &'a str,
    version: &'a str,
}

impl<'a> VersionedPath<'a> {
    fn parse(path: &'a str) -> Option<Self> {
        let rest = path.strip_prefix(PREFIX)?;
        let caps = PATH_PATTERN.captures(rest)?;
        Some(Self {
            user: caps.get(1).map(|m| m.as_str()),
            name: caps.get(2)?.as_str(),
            version: caps.get(3)?.as_str(),
        })
    }

    fn user(&self) -> String {
        match self.user {
            Some(user) => user.to_string(),
            None => format!("go-{}", self.name),
        }
    }

    /// Package root with the user spelled out and sub-packages and `.git`
    /// dropped.
    fn root(&self) -> String {
        format!("{PREFIX}/{}/{}.{}", self.user(), self.name, self.version)
    }

    fn github_path(&self) -> String {
        format!("github.com/{}/{}", self.user(), self.name)
    }

    fn ref_prefix(&self) -> &'a str {
        if self.version == "v0" { "master" } else { self.version }
    }
}

/// Pick the revision for `version` from a smart-protocol ref advertisement.
///
/// Candidates are `refs/heads/{version}` and `refs/tags/{version}`, alone or
/// followed by a `.` component, so `v1` never picks up `v10.0.0`. Peeled tag
/// lines (`^{}`) override the tag object id. The lexicographically greatest
/// candidate name wins.
pub(crate) fn select_ref(advertisement: &str, version: &str) -> Option<(String, String)> {
    let branch_ref = format!("refs/heads/{version}");
    let tag_ref = format!("refs/tags/{version}");

    let mut revisions: HashMap<&str, (&str, bool)> = HashMap::new();
    for line in advertisement.lines() {
        // The first ref follows the flush packet that ends the service header.
        let line = match line.strip_prefix("0000") {
            Some(rest) if rest.len() >= 45 => rest,
            _ => line,
        };
        if line.len() < 45 || !line.is_char_boundary(44) || !line.is_char_boundary(45) {
            continue;
        }
        let sha = &line[4..44];
        if !sha.chars().all(|c| c.is_ascii_hexdigit()) {
            continue;
        }
        let name = line[45..].split('\0').next().unwrap_or_default();
        let (name, peeled) = match name.strip_suffix("^{}") {
            Some(base) => (base, true),
            None => (name, false),
        };
        if !is_version_ref(name, &branch_ref) && !is_version_ref(name, &tag_ref) {
            continue;
        }
        match revisions.get(name) {
            Some((_, true)) if !peeled => {}
            _ => {
                revisions.insert(name, (sha, peeled));
            }
        }
    }

    revisions
        .into_iter()
        .max_by_key(|(name, _)| *name)
        .map(|(name, (sha, _))| (name.to_string(), sha.to_string()))
}

fn is_version_ref(name: &str, version_ref: &str) -> bool {
    name.strip_prefix(version_ref)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}

/// `gopkg.in/...`.
pub struct GopkgProvider {
    client: reqwest::Client,
    github_url: String,
}

impl GopkgProvider {
    pub fn new(client: reqwest::Client, github_url: &str) -> Self {
        Self {
            client,
            github_url: http::base(github_url),
        }
    }
}

#[async_trait]
impl Provider for GopkgProvider {
    fn name(&self) -> &'static str {
        "gopkg"
    }

    fn prefix(&self) -> &'static str {
        "gopkg.in/"
    }

    fn normalize(&self, import_path: &ImportPath) -> ImportPath {
        VersionedPath::parse(import_path.as_str())
            .and_then(|parsed| ImportPath::parse(&parsed.root()).ok())
            .unwrap_or_else(|| import_path.clone())
    }

    async fn resolve_revision(
        &self,
        import_path: &ImportPath,
        _value: &str,
    ) -> ProviderResult<Resolution> {
        let parsed = VersionedPath::parse(import_path.as_str())
            .ok_or_else(|| ProviderError::lookup(import_path, "fail to match URL path"))?;
        let download_path = ImportPath::parse(&parsed.github_path())?;
        let version = parsed.ref_prefix();

        let repo = download_path
            .as_str()
            .strip_prefix("github.com/")
            .unwrap_or(download_path.as_str());
        let url = format!(
            "{}/{repo}.git/info/refs?service=git-upload-pack",
            self.github_url
        );
        let advertisement = http::get_text(&self.client, &url)
            .await
            .map_err(|e| ProviderError::lookup(import_path, format!("fail to get refs: {e}")))?;
        let (ref_name, revision) = select_ref(&advertisement, version)
            .ok_or_else(|| ProviderError::lookup(import_path, "cannot find revision in refs"))?;
        tracing::debug!(
            import_path = %import_path,
            ref_name = %ref_name,
            revision = %revision,
            "gopkg ref selected"
        );

        Ok(Resolution {
            import_path: import_path.clone(),
            value: version.to_string(),
            revision,
            download_path,
        })
    }

    fn archive_url(&self, resolution: &Resolution) -> ProviderResult<String> {
        github::archive_url(&self.github_url, resolution)
    }
}
