//! Downloader repository trait.

use crate::error::MetadataResult;
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for distinct downloading clients.
#[async_trait]
pub trait DownloaderRepo: Send + Sync {
    /// Insert or refresh the row for `ip`.
    async fn record_downloader(&self, ip: &str, at: OffsetDateTime) -> MetadataResult<()>;

    /// Number of distinct downloaders.
    async fn count_downloaders(&self) -> MetadataResult<u64>;
}
