//! Hot to cold tier migration and retention expiry.
//!
//! Both sweeps walk the records in keyset batches. A failure on one revision
//! is logged and counted; the pass always runs to the end.

use crate::error::ApiResult;
use crate::metrics;
use depot_core::config::TieringConfig;
use depot_core::{ArchiveLayout, ImportPath, StorageTier};
use depot_metadata::models::RevisionRow;
use depot_metadata::{MetadataError, MetadataStore};
use depot_provider::ProviderRegistry;
use depot_storage::{FilesystemBackend, ObjectStore, StorageError};
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

/// Counters for one sweep pass.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SweepStats {
    pub items_processed: u64,
    /// Revisions moved to the cold tier.
    pub items_moved: u64,
    /// Records deleted: expired revisions, or stale records with no archive.
    pub items_deleted: u64,
    /// Revisions left alone this pass (over the upload ceiling).
    pub items_skipped: u64,
    pub bytes_moved: u64,
    pub errors: u64,
}

enum UploadOutcome {
    Moved(u64),
    Skipped,
    Stale,
}

/// Runs the upload and expiration sweeps.
pub struct TierManager {
    metadata: Arc<dyn MetadataStore>,
    hot: Arc<FilesystemBackend>,
    cold: Arc<dyn ObjectStore>,
    registry: ProviderRegistry,
    config: TieringConfig,
    production: bool,
}

impl TierManager {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        hot: Arc<FilesystemBackend>,
        cold: Arc<dyn ObjectStore>,
        registry: ProviderRegistry,
        config: TieringConfig,
        production: bool,
    ) -> Self {
        Self {
            metadata,
            hot,
            cold,
            registry,
            config,
            production,
        }
    }

    pub fn config(&self) -> &TieringConfig {
        &self.config
    }

    /// Move hot tier revisions under the size ceiling to the cold tier.
    pub async fn upload_sweep(&self) -> ApiResult<SweepStats> {
        let mut stats = SweepStats::default();
        let ceiling = self.config.max_upload_size_bytes();
        let batch_size = u64::from(self.config.batch_size);
        let mut after = Uuid::nil();

        loop {
            let batch = self
                .metadata
                .list_local_revisions(after, batch_size)
                .await?;
            let Some(last) = batch.last() else {
                break;
            };
            after = last.revision_id;
            let fetched = batch.len() as u64;

            for revision in batch {
                stats.items_processed += 1;
                match self.upload_one(&revision, ceiling).await {
                    Ok(UploadOutcome::Moved(bytes)) => {
                        stats.items_moved += 1;
                        stats.bytes_moved += bytes;
                        metrics::TIER_UPLOADS.inc();
                    }
                    Ok(UploadOutcome::Skipped) => stats.items_skipped += 1,
                    Ok(UploadOutcome::Stale) => stats.items_deleted += 1,
                    Err(e) => {
                        tracing::warn!(
                            revision_id = %revision.revision_id,
                            revision = %revision.revision,
                            error = %e,
                            "failed to upload archive, will retry"
                        );
                        stats.errors += 1;
                        metrics::TIER_UPLOAD_FAILURES.inc();
                    }
                }
            }

            if fetched < batch_size {
                break;
            }
        }

        tracing::info!(
            processed = stats.items_processed,
            moved = stats.items_moved,
            skipped = stats.items_skipped,
            stale = stats.items_deleted,
            errors = stats.errors,
            "upload sweep finished"
        );
        Ok(stats)
    }

    async fn upload_one(&self, revision: &RevisionRow, ceiling: u64) -> ApiResult<UploadOutcome> {
        let Some(package) = self.metadata.get_package(revision.package_id).await? else {
            self.delete_stale(revision).await?;
            return Ok(UploadOutcome::Stale);
        };
        let import_path = ImportPath::parse(&package.import_path)?;
        let extension = self.registry.archive_extension(&import_path);
        let local_key = ArchiveLayout::local_key(&import_path, &revision.revision, extension);

        let meta = match self.hot.head(&local_key).await {
            Ok(meta) => meta,
            Err(e) if e.is_not_found() => {
                self.delete_stale(revision).await?;
                return Ok(UploadOutcome::Stale);
            }
            Err(e) => return Err(e.into()),
        };
        if meta.size > ceiling {
            tracing::debug!(
                import_path = %import_path,
                revision = %revision.revision,
                size = meta.size,
                "archive over upload ceiling, keeping it local"
            );
            return Ok(UploadOutcome::Skipped);
        }

        let remote_key = ArchiveLayout::remote_key(&import_path, &revision.revision, extension);
        let local_path = self.hot.local_path(&local_key).await?;
        match self.cold.put_file(&remote_key, &local_path).await {
            Ok(()) => {}
            Err(StorageError::AlreadyExists(_)) => {
                tracing::debug!(key = %remote_key, "archive already on cold tier");
            }
            Err(e) => return Err(e.into()),
        }

        // The local copy goes only once the record points at the cold tier.
        self.metadata
            .set_revision_tier(revision.revision_id, StorageTier::Remote)
            .await?;
        if let Err(e) = self.hot.delete(&local_key).await {
            tracing::warn!(key = %local_key, error = %e, "failed to remove uploaded local archive");
        }

        tracing::info!(
            import_path = %import_path,
            revision = %revision.revision,
            bytes = meta.size,
            "archive moved to cold tier"
        );
        Ok(UploadOutcome::Moved(meta.size))
    }

    async fn delete_stale(&self, revision: &RevisionRow) -> ApiResult<()> {
        tracing::info!(
            revision_id = %revision.revision_id,
            revision = %revision.revision,
            "deleting revision record without local archive"
        );
        match self.metadata.delete_revision(revision.revision_id).await {
            Ok(()) | Err(MetadataError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete revisions last used strictly before `now - retention`, then
    /// reset the recent download counters.
    pub async fn expire_sweep(&self, now: OffsetDateTime) -> ApiResult<SweepStats> {
        let mut stats = SweepStats::default();
        let cutoff = now - self.config.retention();
        let batch_size = u64::from(self.config.batch_size);
        let mut after = Uuid::nil();

        loop {
            let batch = self
                .metadata
                .list_revisions_touched_before(cutoff, after, batch_size)
                .await?;
            let Some(last) = batch.last() else {
                break;
            };
            after = last.revision_id;
            let fetched = batch.len() as u64;

            for revision in batch {
                stats.items_processed += 1;
                match self.expire_one(&revision).await {
                    Ok(()) => {
                        stats.items_deleted += 1;
                        metrics::REVISIONS_EXPIRED.inc();
                    }
                    Err(e) => {
                        tracing::warn!(
                            revision_id = %revision.revision_id,
                            revision = %revision.revision,
                            error = %e,
                            "failed to expire revision"
                        );
                        stats.errors += 1;
                    }
                }
            }

            if fetched < batch_size {
                break;
            }
        }

        match self.metadata.reset_recent_downloads().await {
            Ok(reset) => tracing::debug!(packages = reset, "recent download counters reset"),
            Err(e) => {
                tracing::warn!(error = %e, "failed to reset recent download counters");
                stats.errors += 1;
            }
        }

        tracing::info!(
            cutoff = %cutoff,
            processed = stats.items_processed,
            deleted = stats.items_deleted,
            errors = stats.errors,
            "expiration sweep finished"
        );
        Ok(stats)
    }

    async fn expire_one(&self, revision: &RevisionRow) -> ApiResult<()> {
        let package = self.metadata.get_package(revision.package_id).await?;
        match self.metadata.delete_revision(revision.revision_id).await {
            Ok(()) | Err(MetadataError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        let Some(package) = package else {
            return Ok(());
        };

        let import_path = ImportPath::parse(&package.import_path)?;
        let extension = self.registry.archive_extension(&import_path);
        let result = match revision.storage_tier()? {
            StorageTier::Local => {
                let key = ArchiveLayout::local_key(&import_path, &revision.revision, extension);
                self.hot.delete(&key).await
            }
            StorageTier::Remote if self.production => {
                let key = ArchiveLayout::remote_key(&import_path, &revision.revision, extension);
                self.cold.delete(&key).await
            }
            StorageTier::Remote => {
                tracing::debug!(
                    import_path = %import_path,
                    revision = %revision.revision,
                    "not in production, keeping remote archive"
                );
                Ok(())
            }
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
