//! Database models mapping to the record schema.

use depot_core::{ImportPath, StorageTier};
use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Packages
// =============================================================================

/// A package, keyed by its normalized import path.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PackageRow {
    pub package_id: Uuid,
    pub import_path: String,
    pub download_count: i64,
    /// Downloads since the last expiration pass.
    pub recent_download: i64,
    pub is_valid: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl PackageRow {
    /// A fresh package row for a first successful resolution.
    pub fn new(import_path: &ImportPath, now: OffsetDateTime) -> Self {
        Self {
            package_id: Uuid::new_v4(),
            import_path: import_path.as_str().to_string(),
            download_count: 0,
            recent_download: 0,
            is_valid: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Orderings for package listings shown in statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageOrder {
    /// Most downloads since the last expiration pass.
    Trending,
    /// Most recently created.
    Newest,
    /// Most downloads overall.
    Popular,
}

// =============================================================================
// Revisions
// =============================================================================

/// A cached archive of one resolved revision of a package.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RevisionRow {
    pub revision_id: Uuid,
    pub package_id: Uuid,
    pub revision: String,
    /// `local` or `remote`; see [`StorageTier`].
    pub tier: String,
    pub size: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last time this revision was resolved or served. Expiration counts from here.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl RevisionRow {
    /// A new hot-tier revision row.
    pub fn new_local(package_id: Uuid, revision: &str, size: u64, now: OffsetDateTime) -> Self {
        Self {
            revision_id: Uuid::new_v4(),
            package_id,
            revision: revision.to_string(),
            tier: StorageTier::Local.as_str().to_string(),
            size: i64::try_from(size).unwrap_or(i64::MAX),
            created_at: now,
            updated_at: now,
        }
    }

    /// Parsed storage tier.
    pub fn storage_tier(&self) -> depot_core::Result<StorageTier> {
        self.tier.parse()
    }
}

// =============================================================================
// Block list
// =============================================================================

/// Exact import-path block.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BlockEntryRow {
    pub entry_id: Uuid,
    pub import_path: String,
    pub note: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Regular-expression block rule. Rules are evaluated in creation order.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BlockRuleRow {
    pub rule_id: Uuid,
    pub rule: String,
    pub note: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// What a `block_package` transaction did.
#[derive(Debug, Clone, Default)]
pub struct BlockPackageOutcome {
    /// An entry for the path already existed; nothing was changed.
    pub already_blocked: bool,
    /// The package row that was deleted, if one existed.
    pub package: Option<PackageRow>,
    /// Revision rows deleted along with the package.
    pub revisions: Vec<RevisionRow>,
}

// =============================================================================
// Downloaders
// =============================================================================

/// A distinct client address that downloaded at least one archive.
#[derive(Debug, Clone, FromRow)]
pub struct DownloaderRow {
    pub ip: String,
    pub created_at: OffsetDateTime,
    pub last_seen: OffsetDateTime,
}
