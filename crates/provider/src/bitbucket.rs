//! bitbucket.org.

use crate::error::{ProviderError, ProviderResult};
use crate::http;
use crate::traits::{DEFAULT_ROOT_SEGMENTS, Provider, Resolution, default_tag, owner_and_repo};
use async_trait::async_trait;
use depot_core::ImportPath;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

static REVISION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"data-revision="([a-zA-Z0-9]+)"#).expect("revision pattern is valid")
});

#[derive(Deserialize)]
struct RepositoryInfo {
    scm: String,
}

/// `bitbucket.org/{owner}/{repo}`, git or mercurial.
pub struct BitbucketProvider {
    client: reqwest::Client,
    web_url: String,
    api_url: String,
}

impl BitbucketProvider {
    pub fn new(client: reqwest::Client, web_url: &str, api_url: &str) -> Self {
        Self {
            client,
            web_url: http::base(web_url),
            api_url: http::base(api_url),
        }
    }
}

#[async_trait]
impl Provider for BitbucketProvider {
    fn name(&self) -> &'static str {
        "bitbucket"
    }

    fn prefix(&self) -> &'static str {
        "bitbucket.org/"
    }

    async fn resolve_revision(
        &self,
        import_path: &ImportPath,
        value: &str,
    ) -> ProviderResult<Resolution> {
        let (owner, repo) = owner_and_repo(import_path).ok_or_else(|| {
            ProviderError::lookup(import_path, "path must name an owner and a repository")
        })?;

        let value = if value.is_empty() {
            let url = format!("{}/repositories/{owner}/{repo}", self.api_url);
            let info: RepositoryInfo = http::get_json(&self.client, &url)
                .await
                .map_err(|e| ProviderError::lookup(import_path, format!("fail to fetch repository: {e}")))?;
            default_tag(&info.scm).ok_or_else(|| {
                ProviderError::lookup(import_path, format!("unsupported scm: {}", info.scm))
            })?
        } else {
            value
        };

        let url = format!(
            "{}/{owner}/{repo}/commits/{}",
            self.web_url,
            http::path_segment(value)
        );
        let page = http::get_text(&self.client, &url)
            .await
            .map_err(|e| ProviderError::lookup(import_path, format!("fail to get revision: {e}")))?;
        let revision = REVISION_PATTERN
            .captures(&page)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| ProviderError::lookup(import_path, "cannot find revision in page"))?;

        Ok(Resolution {
            import_path: import_path.clone(),
            value: value.to_string(),
            revision,
            download_path: import_path.truncated(DEFAULT_ROOT_SEGMENTS),
        })
    }

    fn archive_url(&self, resolution: &Resolution) -> ProviderResult<String> {
        let (owner, repo) = owner_and_repo(&resolution.download_path).ok_or_else(|| {
            ProviderError::download(&resolution.import_path, "download path has no repository")
        })?;
        Ok(format!(
            "{}/{owner}/{repo}/get/{}.zip",
            self.web_url, resolution.revision
        ))
    }
}
