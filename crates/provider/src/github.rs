//! github.com and the golang.org/x redirector.

use crate::error::{ProviderError, ProviderResult};
use crate::http;
use crate::traits::{DEFAULT_ROOT_SEGMENTS, Provider, Resolution, owner_and_repo};
use async_trait::async_trait;
use depot_core::ImportPath;
use regex::Regex;
use std::sync::LazyLock;

/// Fragment of the commits page that precedes the newest commit's revision.
const COMMIT_LOCATOR: &str = "commit-links-group BtnGroup";

const DEFAULT_BRANCH: &str = "master";

static REVISION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"value="([a-zA-Z0-9]+)""#).expect("revision pattern is valid")
});

/// Extract the newest commit from a GitHub commits page.
pub(crate) fn parse_commits_page(page: &str) -> Option<&str> {
    let start = page.find(COMMIT_LOCATOR)?;
    REVISION_PATTERN
        .captures(&page[start..])
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Look up the head commit of `value` in `owner/repo` on a GitHub host.
pub(crate) async fn lookup_commit(
    client: &reqwest::Client,
    web_url: &str,
    import_path: &ImportPath,
    download_path: &ImportPath,
    value: &str,
) -> ProviderResult<String> {
    let (owner, repo) = owner_and_repo(download_path)
        .ok_or_else(|| ProviderError::lookup(import_path, "path must name an owner and a repository"))?;
    let url = format!(
        "{web_url}/{owner}/{repo}/commits/{}",
        http::path_segment(value)
    );
    let page = http::get_text(client, &url)
        .await
        .map_err(|e| ProviderError::lookup(import_path, format!("fail to get revision: {e}")))?;
    if !page.contains(COMMIT_LOCATOR) {
        return Err(ProviderError::lookup(import_path, "cannot find locator in page"));
    }
    parse_commits_page(&page)
        .map(str::to_string)
        .ok_or_else(|| ProviderError::lookup(import_path, "cannot find revision in page"))
}

/// GitHub archive URL for a download path of the form `github.com/owner/repo`.
pub(crate) fn archive_url(web_url: &str, resolution: &Resolution) -> ProviderResult<String> {
    let (owner, repo) = owner_and_repo(&resolution.download_path).ok_or_else(|| {
        ProviderError::download(&resolution.import_path, "download path has no repository")
    })?;
    Ok(format!(
        "{web_url}/{owner}/{repo}/archive/{}.zip",
        resolution.revision
    ))
}

fn default_value(value: &str) -> &str {
    if value.is_empty() { DEFAULT_BRANCH } else { value }
}

/// `github.com/{owner}/{repo}`.
pub struct GithubProvider {
    client: reqwest::Client,
    web_url: String,
}

impl GithubProvider {
    pub fn new(client: reqwest::Client, web_url: &str) -> Self {
        Self {
            client,
            web_url: http::base(web_url),
        }
    }
}

#[async_trait]
impl Provider for GithubProvider {
    fn name(&self) -> &'static str {
        "github"
    }

    fn prefix(&self) -> &'static str {
        "github.com/"
    }

    async fn resolve_revision(
        &self,
        import_path: &ImportPath,
        value: &str,
    ) -> ProviderResult<Resolution> {
        let value = default_value(value);
        let revision =
            lookup_commit(&self.client, &self.web_url, import_path, import_path, value).await?;
        Ok(Resolution {
            import_path: import_path.clone(),
            value: value.to_string(),
            revision,
            download_path: import_path.truncated(DEFAULT_ROOT_SEGMENTS),
        })
    }

    fn archive_url(&self, resolution: &Resolution) -> ProviderResult<String> {
        archive_url(&self.web_url, resolution)
    }
}

/// `golang.org/x/{repo}`, served from `github.com/golang/{repo}`.
pub struct GolangProvider {
    client: reqwest::Client,
    github_url: String,
}

impl GolangProvider {
    pub fn new(client: reqwest::Client, github_url: &str) -> Self {
        Self {
            client,
            github_url: http::base(github_url),
        }
    }

    fn download_path(import_path: &ImportPath) -> ProviderResult<ImportPath> {
        let repo = import_path
            .segments()
            .nth(2)
            .ok_or_else(|| ProviderError::lookup(import_path, "path must name a repository"))?;
        Ok(ImportPath::parse(&format!("github.com/golang/{repo}"))?)
    }
}

#[async_trait]
impl Provider for GolangProvider {
    fn name(&self) -> &'static str {
        "golang"
    }

    fn prefix(&self) -> &'static str {
        "golang.org/x/"
    }

    async fn resolve_revision(
        &self,
        import_path: &ImportPath,
        value: &str,
    ) -> ProviderResult<Resolution> {
        let value = default_value(value);
        let download_path = Self::download_path(import_path)?;
        let revision = lookup_commit(
            &self.client,
            &self.github_url,
            import_path,
            &download_path,
            value,
        )
        .await?;
        Ok(Resolution {
            import_path: import_path.clone(),
            value: value.to_string(),
            revision,
            download_path,
        })
    }

    fn archive_url(&self, resolution: &Resolution) -> ProviderResult<String> {
        archive_url(&self.github_url, resolution)
    }
}
