//! Aggregate download statistics, recomputed periodically and shared through
//! a watch channel.

use depot_metadata::models::{PackageOrder, PackageRow};
use depot_metadata::{MetadataResult, MetadataStore};
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::watch;

/// Entries kept in each top-N list.
pub const TOP_N: u64 = 10;

#[derive(Clone, Debug, Serialize)]
pub struct PackageSummary {
    pub import_path: String,
    pub download_count: i64,
    pub recent_download: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<PackageRow> for PackageSummary {
    fn from(row: PackageRow) -> Self {
        Self {
            import_path: row.import_path,
            download_count: row.download_count,
            recent_download: row.recent_download,
            created_at: row.created_at,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct StatsSnapshot {
    pub package_count: u64,
    pub downloader_count: u64,
    pub total_downloads: u64,
    pub trending: Vec<PackageSummary>,
    pub newest: Vec<PackageSummary>,
    pub popular: Vec<PackageSummary>,
    /// `None` until the first refresh completes.
    #[serde(with = "time::serde::rfc3339::option")]
    pub refreshed_at: Option<OffsetDateTime>,
}

impl StatsSnapshot {
    pub fn empty() -> Self {
        Self {
            package_count: 0,
            downloader_count: 0,
            total_downloads: 0,
            trending: Vec::new(),
            newest: Vec::new(),
            popular: Vec::new(),
            refreshed_at: None,
        }
    }
}

async fn top(
    metadata: &dyn MetadataStore,
    order: PackageOrder,
) -> MetadataResult<Vec<PackageSummary>> {
    Ok(metadata
        .top_packages(order, TOP_N)
        .await?
        .into_iter()
        .map(PackageSummary::from)
        .collect())
}

pub async fn compute_snapshot(metadata: &dyn MetadataStore) -> MetadataResult<StatsSnapshot> {
    Ok(StatsSnapshot {
        package_count: metadata.count_packages().await?,
        downloader_count: metadata.count_downloaders().await?,
        total_downloads: metadata.total_downloads().await?,
        trending: top(metadata, PackageOrder::Trending).await?,
        newest: top(metadata, PackageOrder::Newest).await?,
        popular: top(metadata, PackageOrder::Popular).await?,
        refreshed_at: Some(OffsetDateTime::now_utc()),
    })
}

/// Owns the sending half of the snapshot channel.
pub struct StatsPublisher {
    metadata: Arc<dyn MetadataStore>,
    tx: watch::Sender<Arc<StatsSnapshot>>,
}

impl StatsPublisher {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> (Self, watch::Receiver<Arc<StatsSnapshot>>) {
        let (tx, rx) = watch::channel(Arc::new(StatsSnapshot::empty()));
        (Self { metadata, tx }, rx)
    }

    /// Recompute and publish. On failure the previous snapshot stays visible.
    pub async fn refresh(&self) -> MetadataResult<()> {
        let snapshot = compute_snapshot(self.metadata.as_ref()).await?;
        tracing::debug!(
            packages = snapshot.package_count,
            downloads = snapshot.total_downloads,
            "statistics refreshed"
        );
        self.tx.send_replace(Arc::new(snapshot));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::ImportPath;
    use depot_metadata::SqliteStore;

    #[tokio::test]
    async fn refresh_publishes_counts_and_rankings() {
        let temp = tempfile::tempdir().unwrap();
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(temp.path().join("depot.db"), None)
                .await
                .unwrap(),
        );
        let now = OffsetDateTime::now_utc();
        let quiet = PackageRow::new(&ImportPath::parse("github.com/a/quiet").unwrap(), now);
        let busy = PackageRow::new(&ImportPath::parse("github.com/a/busy").unwrap(), now);
        metadata.insert_package(&quiet).await.unwrap();
        metadata.insert_package(&busy).await.unwrap();
        for _ in 0..3 {
            metadata.record_download(busy.package_id).await.unwrap();
        }
        metadata.record_downloader("10.0.0.1", now).await.unwrap();

        let (publisher, rx) = StatsPublisher::new(metadata);
        assert!(rx.borrow().refreshed_at.is_none());

        publisher.refresh().await.unwrap();
        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.package_count, 2);
        assert_eq!(snapshot.downloader_count, 1);
        assert_eq!(snapshot.total_downloads, 3);
        assert_eq!(snapshot.popular[0].import_path, "github.com/a/busy");
        assert_eq!(snapshot.trending[0].import_path, "github.com/a/busy");
        assert!(snapshot.refreshed_at.is_some());
    }
}
