//! Revision resolution and archive caching on the request path.
//!
//! `resolve_and_fetch` runs block check, provider lookup, archive fetch and
//! record bookkeeping for one request. A hint that names an already cached
//! revision is answered from the records without touching the network.

use crate::blocking::{BlockDecision, BlockEngine};
use crate::metrics;
use depot_core::{ArchiveLayout, ImportPath, StorageTier, validate_revision};
use depot_metadata::models::{PackageRow, RevisionRow};
use depot_metadata::{MetadataError, MetadataStore};
use depot_provider::{
    ArchiveFetcher, FetchOutcome, Provider, ProviderError, ProviderRegistry, Resolution,
};
use depot_storage::{FilesystemBackend, ObjectStore, StorageError};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::instrument;

/// Request path failures.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Invalid(#[from] depot_core::Error),

    #[error("package is blocked: {0}")]
    Blocked(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A concurrent insert won and its row could not be re-read.
    #[error("record conflict: {0}")]
    RecordConflict(String),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type ResolveResult<T> = std::result::Result<T, ResolveError>;

/// A resolved and cached revision.
#[derive(Clone, Debug)]
pub struct Resolved {
    /// Normalized import path.
    pub import_path: ImportPath,
    pub package: PackageRow,
    pub revision: RevisionRow,
    pub tier: StorageTier,
    pub extension: &'static str,
    /// Answered from an existing record.
    pub cache_hit: bool,
}

impl Resolved {
    /// Key of the archive on the hot tier.
    pub fn local_key(&self) -> String {
        ArchiveLayout::local_key(&self.import_path, &self.revision.revision, self.extension)
    }

    /// Key of the archive on the cold tier.
    pub fn remote_key(&self) -> String {
        ArchiveLayout::remote_key(&self.import_path, &self.revision.revision, self.extension)
    }

    /// File name offered to clients.
    pub fn download_name(&self) -> String {
        ArchiveLayout::download_name(&self.import_path, &self.revision.revision, self.extension)
    }
}

/// Resolves import paths to cached revisions.
pub struct Resolver {
    metadata: Arc<dyn MetadataStore>,
    hot: Arc<FilesystemBackend>,
    registry: ProviderRegistry,
    fetcher: ArchiveFetcher,
    blocks: Arc<BlockEngine>,
}

impl Resolver {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        hot: Arc<FilesystemBackend>,
        registry: ProviderRegistry,
        fetcher: ArchiveFetcher,
        blocks: Arc<BlockEngine>,
    ) -> Self {
        Self {
            metadata,
            hot,
            registry,
            fetcher,
            blocks,
        }
    }

    /// Resolve `raw` at `hint` (tag, branch or revision; empty for the
    /// provider default) and make sure its archive is cached.
    #[instrument(skip(self))]
    pub async fn resolve_and_fetch(&self, raw: &str, hint: &str) -> ResolveResult<Resolved> {
        let raw_path = ImportPath::parse(raw)?;
        let import_path = self.registry.normalize(&raw_path);
        self.ensure_allowed(&raw_path).await?;
        if import_path != raw_path {
            self.ensure_allowed(&import_path).await?;
        }

        let provider = self.registry.find_provider(&import_path)?;
        let extension = provider.extension();
        let existing = self
            .metadata
            .get_package_by_path(import_path.as_str())
            .await?;

        if let Some(package) = &existing
            && !hint.is_empty()
            && let Some(revision) = self.metadata.get_revision(package.package_id, hint).await?
            && self.is_usable(&import_path, &revision, extension).await?
        {
            return self
                .cache_hit(import_path, package.clone(), revision, extension)
                .await;
        }

        let resolution = self.lookup(provider.as_ref(), &import_path, hint).await?;
        validate_revision(&resolution.revision)?;

        let package = match existing {
            Some(package) => package,
            None => self.ensure_package(&import_path).await?,
        };

        let cached = self
            .metadata
            .get_revision(package.package_id, &resolution.revision)
            .await?;
        if let Some(revision) = cached
            && self.is_usable(&import_path, &revision, extension).await?
        {
            return self
                .cache_hit(import_path, package, revision, extension)
                .await;
        }

        let key = ArchiveLayout::local_key(&import_path, &resolution.revision, extension);
        let size = match self
            .fetcher
            .fetch(provider.as_ref(), &resolution, self.hot.as_ref(), &key)
            .await
        {
            Ok(FetchOutcome::Downloaded(size)) => {
                metrics::ARCHIVE_DOWNLOADS.inc();
                size
            }
            Ok(FetchOutcome::AlreadyPresent) => self.hot.head(&key).await?.size,
            Err(e) => {
                metrics::ARCHIVE_DOWNLOAD_FAILURES.inc();
                return Err(e.into());
            }
        };

        let revision = self
            .record_revision(&package, &resolution.revision, size)
            .await?;
        Ok(Resolved {
            import_path,
            package,
            revision,
            tier: StorageTier::Local,
            extension,
            cache_hit: false,
        })
    }

    async fn ensure_allowed(&self, import_path: &ImportPath) -> ResolveResult<()> {
        if let BlockDecision::Blocked(note) = self.blocks.check(import_path).await? {
            metrics::BLOCKED_REQUESTS.inc();
            tracing::info!(import_path = %import_path, note = %note, "request blocked");
            return Err(ResolveError::Blocked(note));
        }
        Ok(())
    }

    async fn lookup(
        &self,
        provider: &dyn Provider,
        import_path: &ImportPath,
        hint: &str,
    ) -> ResolveResult<Resolution> {
        let timer = metrics::REVISION_LOOKUP_DURATION
            .with_label_values(&[provider.name()])
            .start_timer();
        let result = provider.resolve_revision(import_path, hint).await;
        timer.observe_duration();

        match &result {
            Ok(resolution) => {
                metrics::record_lookup(provider.name(), "ok");
                tracing::debug!(
                    import_path = %import_path,
                    value = %resolution.value,
                    revision = %resolution.revision,
                    "revision resolved"
                );
            }
            Err(e) => {
                metrics::record_lookup(provider.name(), "error");
                tracing::warn!(import_path = %import_path, error = %e, "revision lookup failed");
            }
        }
        result.map_err(Into::into)
    }

    /// A record is usable when its archive is on the cold tier, or present
    /// on the hot tier.
    async fn is_usable(
        &self,
        import_path: &ImportPath,
        revision: &RevisionRow,
        extension: &str,
    ) -> ResolveResult<bool> {
        match revision.storage_tier()? {
            StorageTier::Remote => Ok(true),
            StorageTier::Local => {
                let key = ArchiveLayout::local_key(import_path, &revision.revision, extension);
                Ok(self.hot.exists(&key).await?)
            }
        }
    }

    async fn cache_hit(
        &self,
        import_path: ImportPath,
        package: PackageRow,
        mut revision: RevisionRow,
        extension: &'static str,
    ) -> ResolveResult<Resolved> {
        let now = OffsetDateTime::now_utc();
        self.metadata
            .touch_revision(revision.revision_id, now)
            .await?;
        revision.updated_at = now;
        metrics::CACHE_HITS.inc();

        let tier = revision.storage_tier()?;
        Ok(Resolved {
            import_path,
            package,
            revision,
            tier,
            extension,
            cache_hit: true,
        })
    }

    async fn ensure_package(&self, import_path: &ImportPath) -> ResolveResult<PackageRow> {
        let package = PackageRow::new(import_path, OffsetDateTime::now_utc());
        match self.metadata.insert_package(&package).await {
            Ok(()) => Ok(package),
            Err(MetadataError::AlreadyExists(_)) => self
                .metadata
                .get_package_by_path(import_path.as_str())
                .await?
                .ok_or_else(|| ResolveError::RecordConflict(format!("package {import_path}"))),
            Err(e) => Err(e.into()),
        }
    }

    async fn record_revision(
        &self,
        package: &PackageRow,
        revision: &str,
        size: u64,
    ) -> ResolveResult<RevisionRow> {
        let now = OffsetDateTime::now_utc();

        // The record exists but its hot tier file was missing and was fetched again.
        if let Some(mut existing) = self
            .metadata
            .get_revision(package.package_id, revision)
            .await?
        {
            existing.tier = StorageTier::Local.as_str().to_string();
            existing.size = i64::try_from(size).unwrap_or(i64::MAX);
            existing.updated_at = now;
            self.metadata.update_revision(&existing).await?;
            return Ok(existing);
        }

        let row = RevisionRow::new_local(package.package_id, revision, size, now);
        match self.metadata.insert_revision(&row).await {
            Ok(()) => Ok(row),
            Err(MetadataError::AlreadyExists(_)) => {
                tracing::debug!(
                    package_id = %package.package_id,
                    revision,
                    "revision inserted concurrently, re-reading"
                );
                self.metadata
                    .get_revision(package.package_id, revision)
                    .await?
                    .ok_or_else(|| {
                        ResolveError::RecordConflict(format!(
                            "revision {revision} of {}",
                            package.import_path
                        ))
                    })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use depot_core::config::ProviderConfig;
    use depot_metadata::SqliteStore;
    use depot_metadata::models::BlockRuleRow;
    use depot_provider::ProviderResult;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct FakeProvider {
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl Provider for FakeProvider {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn prefix(&self) -> &'static str {
            "provider.example/"
        }

        async fn resolve_revision(
            &self,
            import_path: &ImportPath,
            value: &str,
        ) -> ProviderResult<Resolution> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(Resolution {
                import_path: import_path.clone(),
                value: value.to_string(),
                revision: "abc123".to_string(),
                download_path: import_path.clone(),
            })
        }

        fn archive_url(&self, resolution: &Resolution) -> ProviderResult<String> {
            Ok(format!("http://127.0.0.1:9/{}.zip", resolution.revision))
        }
    }

    struct Fixture {
        resolver: Resolver,
        provider: Arc<FakeProvider>,
        metadata: Arc<dyn MetadataStore>,
        hot: Arc<FilesystemBackend>,
        _temp: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let temp = tempfile::tempdir().unwrap();
        let hot = Arc::new(FilesystemBackend::new(temp.path().join("hot")).await.unwrap());
        let cold: Arc<dyn ObjectStore> =
            Arc::new(FilesystemBackend::new(temp.path().join("cold")).await.unwrap());
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(temp.path().join("depot.db"), None)
                .await
                .unwrap(),
        );
        let provider = Arc::new(FakeProvider {
            lookups: AtomicUsize::new(0),
        });
        let registry = ProviderRegistry::new(vec![provider.clone() as Arc<dyn Provider>]);
        let (_, fetcher) = depot_provider::from_config(&ProviderConfig::default()).unwrap();
        let blocks = Arc::new(BlockEngine::new(
            metadata.clone(),
            hot.clone(),
            cold,
            registry.clone(),
            false,
        ));
        let resolver = Resolver::new(metadata.clone(), hot.clone(), registry, fetcher, blocks);
        Fixture {
            resolver,
            provider,
            metadata,
            hot,
            _temp: temp,
        }
    }

    /// Place the archive so the fetch is skipped.
    async fn seed_archive(hot: &FilesystemBackend) {
        hot.put(
            "provider.example/owner/repo/abc123.zip",
            bytes::Bytes::from_static(b"PK\x03\x04"),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn unknown_prefix_is_no_matching_provider() {
        let f = fixture().await;
        let err = f
            .resolver
            .resolve_and_fetch("example.com/pkgA", "")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Provider(ProviderError::NoMatchingProvider(_))
        ));
    }

    #[tokio::test]
    async fn first_resolution_creates_records() {
        let f = fixture().await;
        seed_archive(&f.hot).await;

        let resolved = f
            .resolver
            .resolve_and_fetch("provider.example/owner/repo/sub", "v1.0")
            .await
            .unwrap();
        assert!(!resolved.cache_hit);
        assert_eq!(resolved.import_path.as_str(), "provider.example/owner/repo");
        assert_eq!(resolved.revision.revision, "abc123");
        assert_eq!(resolved.tier, StorageTier::Local);
        assert_eq!(resolved.revision.size, 4);
        assert_eq!(resolved.local_key(), "provider.example/owner/repo/abc123.zip");
        assert!(
            f.hot
                .root()
                .join("provider.example/owner/repo/abc123.zip")
                .is_file()
        );

        let package = f
            .metadata
            .get_package_by_path("provider.example/owner/repo")
            .await
            .unwrap()
            .unwrap();
        let revisions = f
            .metadata
            .list_revisions_for_package(package.package_id)
            .await
            .unwrap();
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].tier, "local");
    }

    #[tokio::test]
    async fn cached_revision_hint_skips_lookup() {
        let f = fixture().await;
        seed_archive(&f.hot).await;

        f.resolver
            .resolve_and_fetch("provider.example/owner/repo", "v1.0")
            .await
            .unwrap();
        assert_eq!(f.provider.lookups.load(Ordering::SeqCst), 1);

        let again = f
            .resolver
            .resolve_and_fetch("provider.example/owner/repo", "abc123")
            .await
            .unwrap();
        assert!(again.cache_hit);
        assert_eq!(again.revision.revision, "abc123");
        assert_eq!(f.provider.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_local_file_is_fetched_again() {
        let f = fixture().await;
        seed_archive(&f.hot).await;
        f.resolver
            .resolve_and_fetch("provider.example/owner/repo", "")
            .await
            .unwrap();

        f.hot
            .delete("provider.example/owner/repo/abc123.zip")
            .await
            .unwrap();
        // The fake archive URL is unreachable, so the re-fetch must fail
        // rather than answer from the stale record.
        let err = f
            .resolver
            .resolve_and_fetch("provider.example/owner/repo", "abc123")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Provider(ProviderError::ArchiveDownloadFailed { .. })
        ));
    }

    #[tokio::test]
    async fn blocked_path_never_reaches_provider() {
        let f = fixture().await;
        f.metadata
            .insert_block_rule(&BlockRuleRow {
                rule_id: Uuid::new_v4(),
                rule: r"^provider\.example/owner/".to_string(),
                note: "reason".to_string(),
                created_at: OffsetDateTime::now_utc(),
            })
            .await
            .unwrap();

        let err = f
            .resolver
            .resolve_and_fetch("provider.example/owner/repo", "")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Blocked(note) if note == "reason"));
        assert_eq!(f.provider.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn duplicate_package_insert_re_reads() {
        let f = fixture().await;
        let path = ImportPath::parse("provider.example/owner/repo").unwrap();
        let first = f.resolver.ensure_package(&path).await.unwrap();
        let second = f.resolver.ensure_package(&path).await.unwrap();
        assert_eq!(first.package_id, second.package_id);
    }
}
