//! Package repository trait.

use crate::error::MetadataResult;
use crate::models::{PackageOrder, PackageRow};
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for package records.
#[async_trait]
pub trait PackageRepo: Send + Sync {
    /// Insert a package. Fails with `AlreadyExists` when the import path is taken.
    async fn insert_package(&self, package: &PackageRow) -> MetadataResult<()>;

    /// Get a package by ID.
    async fn get_package(&self, package_id: Uuid) -> MetadataResult<Option<PackageRow>>;

    /// Get a package by normalized import path.
    async fn get_package_by_path(&self, import_path: &str) -> MetadataResult<Option<PackageRow>>;

    /// Overwrite counters, validity and `updated_at` of an existing package.
    async fn update_package(&self, package: &PackageRow) -> MetadataResult<()>;

    /// Delete a package and, through the foreign key, its revisions.
    async fn delete_package(&self, package_id: Uuid) -> MetadataResult<()>;

    /// Page through packages ordered by import path.
    async fn list_packages(&self, offset: u64, limit: u64) -> MetadataResult<Vec<PackageRow>>;

    /// Count one served download against the package.
    async fn record_download(&self, package_id: Uuid) -> MetadataResult<()>;

    /// Zero every package's recent download counter. Returns rows changed.
    async fn reset_recent_downloads(&self) -> MetadataResult<u64>;

    /// Number of packages.
    async fn count_packages(&self) -> MetadataResult<u64>;

    /// Sum of all packages' download counters.
    async fn total_downloads(&self) -> MetadataResult<u64>;

    /// Top `limit` packages in the given order.
    async fn top_packages(&self, order: PackageOrder, limit: u64)
    -> MetadataResult<Vec<PackageRow>>;
}
