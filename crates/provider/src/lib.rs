//! Upstream providers for the depot revision cache.
//!
//! This crate provides:
//! - The ordered provider registry and import path normalization
//! - Per-provider revision lookups (GitHub, golang.org/x, Google Code,
//!   Bitbucket, gopkg.in)
//! - The archive fetcher that streams archives into the hot tier

pub mod bitbucket;
pub mod error;
pub mod fetch;
pub mod github;
pub mod google;
pub mod gopkg;
pub mod http;
pub mod registry;
pub mod traits;

pub use error::{ProviderError, ProviderResult};
pub use fetch::{ArchiveFetcher, FetchOutcome};
pub use registry::ProviderRegistry;
pub use traits::{DEFAULT_ROOT_SEGMENTS, Provider, Resolution};

use depot_core::config::ProviderConfig;

/// Build the default registry and a fetcher sharing one HTTP client.
pub fn from_config(config: &ProviderConfig) -> ProviderResult<(ProviderRegistry, ArchiveFetcher)> {
    config.validate().map_err(ProviderError::Client)?;
    let client = http::build_client(config)?;
    Ok((
        ProviderRegistry::with_defaults(client.clone(), config),
        ArchiveFetcher::new(client, config.download_timeout()),
    ))
}
