//! Ordered provider registry.

use crate::bitbucket::BitbucketProvider;
use crate::error::{ProviderError, ProviderResult};
use crate::github::{GithubProvider, GolangProvider};
use crate::google::GoogleCodeProvider;
use crate::gopkg::GopkgProvider;
use crate::traits::Provider;
use depot_core::config::ProviderConfig;
use depot_core::{DEFAULT_ARCHIVE_EXTENSION, ImportPath};
use std::sync::Arc;

/// Providers in match order. The first entry whose prefix matches an import
/// path owns it.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Create a registry from an explicit, ordered provider list.
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Self {
        Self { providers }
    }

    /// The standard provider set, sharing one HTTP client.
    pub fn with_defaults(client: reqwest::Client, config: &ProviderConfig) -> Self {
        Self::new(vec![
            Arc::new(GithubProvider::new(client.clone(), &config.github_url)),
            Arc::new(GolangProvider::new(client.clone(), &config.github_url)),
            Arc::new(GoogleCodeProvider::new(
                client.clone(),
                &config.google_code_url,
                config.google_code_archive_url.as_deref(),
            )),
            Arc::new(BitbucketProvider::new(
                client.clone(),
                &config.bitbucket_url,
                &config.bitbucket_api_url,
            )),
            Arc::new(GopkgProvider::new(client, &config.github_url)),
        ])
    }

    /// All providers in match order.
    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    /// Find the provider owning `import_path`.
    pub fn find_provider(&self, import_path: &ImportPath) -> ProviderResult<Arc<dyn Provider>> {
        self.providers
            .iter()
            .find(|p| import_path.has_prefix(p.prefix()))
            .cloned()
            .ok_or_else(|| ProviderError::NoMatchingProvider(import_path.to_string()))
    }

    /// Rewrite `import_path` to its package root. Paths no provider owns are
    /// returned unchanged.
    pub fn normalize(&self, import_path: &ImportPath) -> ImportPath {
        match self.find_provider(import_path) {
            Ok(provider) => provider.normalize(import_path),
            Err(_) => import_path.clone(),
        }
    }

    /// Archive extension for `import_path`, defaulting to `.zip`.
    pub fn archive_extension(&self, import_path: &ImportPath) -> &'static str {
        match self.find_provider(import_path) {
            Ok(provider) => provider.extension(),
            Err(_) => DEFAULT_ARCHIVE_EXTENSION,
        }
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.providers.iter().map(|p| p.name()))
            .finish()
    }
}
