//! Revision repository trait.

use crate::error::MetadataResult;
use crate::models::RevisionRow;
use async_trait::async_trait;
use depot_core::StorageTier;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for revision records.
///
/// Batch listings use keyset pagination on `revision_id`: pass `Uuid::nil()`
/// to start and the last returned ID to continue. Rows deleted or updated
/// between pages are never revisited.
#[async_trait]
pub trait RevisionRepo: Send + Sync {
    /// Insert a revision. Fails with `AlreadyExists` when
    /// (package_id, revision) is already recorded.
    async fn insert_revision(&self, revision: &RevisionRow) -> MetadataResult<()>;

    /// Get a revision by ID.
    async fn get_revision_by_id(&self, revision_id: Uuid) -> MetadataResult<Option<RevisionRow>>;

    /// Get the revision of a package by revision string.
    async fn get_revision(
        &self,
        package_id: Uuid,
        revision: &str,
    ) -> MetadataResult<Option<RevisionRow>>;

    /// Overwrite tier, size and `updated_at`.
    async fn update_revision(&self, revision: &RevisionRow) -> MetadataResult<()>;

    /// Change only the storage tier, leaving `updated_at` alone so tier
    /// migration does not extend retention.
    async fn set_revision_tier(&self, revision_id: Uuid, tier: StorageTier)
    -> MetadataResult<()>;

    /// Mark a revision as used at `at`.
    async fn touch_revision(&self, revision_id: Uuid, at: OffsetDateTime) -> MetadataResult<()>;

    /// Delete a revision.
    async fn delete_revision(&self, revision_id: Uuid) -> MetadataResult<()>;

    /// Delete every revision of a package. Returns rows deleted.
    async fn delete_revisions_for_package(&self, package_id: Uuid) -> MetadataResult<u64>;

    /// All revisions of a package, most recently used first.
    async fn list_revisions_for_package(&self, package_id: Uuid)
    -> MetadataResult<Vec<RevisionRow>>;

    /// Next batch of hot-tier revisions after `after`.
    async fn list_local_revisions(&self, after: Uuid, limit: u64)
    -> MetadataResult<Vec<RevisionRow>>;

    /// Next batch of revisions last used strictly before `cutoff`.
    async fn list_revisions_touched_before(
        &self,
        cutoff: OffsetDateTime,
        after: Uuid,
        limit: u64,
    ) -> MetadataResult<Vec<RevisionRow>>;

    /// Hot-tier revisions larger than `min_size` bytes, largest first.
    async fn list_large_local_revisions(
        &self,
        min_size: u64,
        limit: u64,
    ) -> MetadataResult<Vec<RevisionRow>>;
}
