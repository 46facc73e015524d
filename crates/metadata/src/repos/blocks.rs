//! Block list repository trait.

use crate::error::MetadataResult;
use crate::models::{BlockEntryRow, BlockPackageOutcome, BlockRuleRow};
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for block entries and block rules.
#[async_trait]
pub trait BlockRepo: Send + Sync {
    /// Get the exact block entry for an import path.
    async fn get_block_entry_by_path(
        &self,
        import_path: &str,
    ) -> MetadataResult<Option<BlockEntryRow>>;

    /// Page through block entries, newest first.
    async fn list_block_entries(&self, offset: u64, limit: u64)
    -> MetadataResult<Vec<BlockEntryRow>>;

    /// Insert an entry. Fails with `AlreadyExists` for a duplicate path.
    async fn insert_block_entry(&self, entry: &BlockEntryRow) -> MetadataResult<()>;

    /// Delete an entry (unblock).
    async fn delete_block_entry(&self, entry_id: Uuid) -> MetadataResult<()>;

    /// All rules in evaluation order (creation time, then ID).
    async fn list_block_rules(&self) -> MetadataResult<Vec<BlockRuleRow>>;

    /// Get a rule by ID.
    async fn get_block_rule(&self, rule_id: Uuid) -> MetadataResult<Option<BlockRuleRow>>;

    /// Insert a rule. Fails with `AlreadyExists` for a duplicate expression.
    async fn insert_block_rule(&self, rule: &BlockRuleRow) -> MetadataResult<()>;

    /// Delete a rule.
    async fn delete_block_rule(&self, rule_id: Uuid) -> MetadataResult<()>;

    /// In one transaction: delete the package at `import_path` with all its
    /// revisions, then insert a block entry with `note`.
    ///
    /// A no-op returning `already_blocked` when an entry for the path exists,
    /// including when a concurrent caller inserts it first. Any other failure
    /// rolls the deletions back.
    async fn block_package(&self, import_path: &str, note: &str)
    -> MetadataResult<BlockPackageOutcome>;
}
