//! code.google.com project hosting.

use crate::error::{ProviderError, ProviderResult};
use crate::http;
use crate::traits::{Provider, Resolution, default_tag};
use async_trait::async_trait;
use depot_core::ImportPath;
use regex::Regex;
use std::sync::LazyLock;

static PATH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^code\.google\.com/p/(?P<repo>[a-z0-9\-]+)(?:\.(?P<subrepo>[a-z0-9\-]+))?")
        .expect("path pattern is valid")
});

static VCS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"id="checkoutcmd">(hg|git|svn)"#).expect("vcs pattern is valid")
});

static REVISION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"_setViewedRevision\('([a-zA-Z0-9]+)").expect("revision pattern is valid")
});

struct Project<'a> {
    repo: &'a str,
    subrepo: Option<&'a str>,
}

impl<'a> Project<'a> {
    fn parse(path: &'a ImportPath) -> Option<Self> {
        let caps = PATH_PATTERN.captures(path.as_str())?;
        Some(Self {
            repo: caps.name("repo")?.as_str(),
            subrepo: caps.name("subrepo").map(|m| m.as_str()),
        })
    }

    fn archive_host(&self) -> String {
        match self.subrepo {
            Some(sub) => format!("{sub}.{}.googlecode.com", self.repo),
            None => format!("{}.googlecode.com", self.repo),
        }
    }
}

/// `code.google.com/p/{repo}[.{subrepo}]`.
pub struct GoogleCodeProvider {
    client: reqwest::Client,
    web_url: String,
    archive_url: Option<String>,
}

impl GoogleCodeProvider {
    pub fn new(client: reqwest::Client, web_url: &str, archive_url: Option<&str>) -> Self {
        Self {
            client,
            web_url: http::base(web_url),
            archive_url: archive_url.map(http::base),
        }
    }

    async fn detect_default_tag(
        &self,
        import_path: &ImportPath,
        project: &Project<'_>,
    ) -> ProviderResult<&'static str> {
        let url = format!("{}/p/{}/source/checkout", self.web_url, project.repo);
        let page = http::get_text(&self.client, &url)
            .await
            .map_err(|e| ProviderError::lookup(import_path, format!("fail to fetch page: {e}")))?;
        let vcs = VCS_PATTERN
            .captures(&page)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .ok_or_else(|| ProviderError::lookup(import_path, "cannot find VCS on project page"))?;
        default_tag(vcs).ok_or_else(|| {
            ProviderError::lookup(import_path, format!("{vcs} repositories are not supported"))
        })
    }
}

#[async_trait]
impl Provider for GoogleCodeProvider {
    fn name(&self) -> &'static str {
        "google"
    }

    fn prefix(&self) -> &'static str {
        "code.google.com/"
    }

    async fn resolve_revision(
        &self,
        import_path: &ImportPath,
        value: &str,
    ) -> ProviderResult<Resolution> {
        let project = Project::parse(import_path)
            .ok_or_else(|| ProviderError::lookup(import_path, "not a project path"))?;
        let value = if value.is_empty() {
            self.detect_default_tag(import_path, &project).await?
        } else {
            value
        };

        let url = format!(
            "{}/p/{}/source/browse/?repo={}&r={value}",
            self.web_url,
            project.repo,
            project.subrepo.unwrap_or_default()
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
            download_path: import_path.clone(),
        })
    }

    fn archive_url(&self, resolution: &Resolution) -> ProviderResult<String> {
        let project = Project::parse(&resolution.download_path).ok_or_else(|| {
            ProviderError::download(&resolution.import_path, "not a project path")
        })?;
        let host = project.archive_host();
        Ok(match &self.archive_url {
            Some(base) => format!("{base}/{host}/archive/{}.zip", resolution.revision),
            None => format!("http://{host}/archive/{}.zip", resolution.revision),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolution(path: &str) -> Resolution {
        let path = ImportPath::parse(path).unwrap();
        Resolution {
            import_path: path.clone(),
            value: "default".to_string(),
            revision: "a1b2c3".to_string(),
            download_path: path,
        }
    }

    #[test]
    fn archive_host_includes_subrepo() {
        let provider = GoogleCodeProvider::new(reqwest::Client::new(), "http://code.google.com", None);
        assert_eq!(
            provider
                .archive_url(&resolution("code.google.com/p/go.net"))
                .unwrap(),
            "http://net.go.googlecode.com/archive/a1b2c3.zip"
        );
        assert_eq!(
            provider
                .archive_url(&resolution("code.google.com/p/goprotobuf"))
                .unwrap(),
            "http://goprotobuf.googlecode.com/archive/a1b2c3.zip"
        );
    }

    #[test]
    fn archive_url_through_configured_base() {
        let provider = GoogleCodeProvider::new(
            reqwest::Client::new(),
            "http://code.google.com",
            Some("http://mirror.local/"),
        );
        assert_eq!(
            provider
                .archive_url(&resolution("code.google.com/p/repo.sub"))
                .unwrap(),
            "http://mirror.local/sub.repo.googlecode.com/archive/a1b2c3.zip"
        );
    }
}
