//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{BlockRepo, DownloaderRepo, PackageRepo, RevisionRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined record store trait.
#[async_trait]
pub trait MetadataStore:
    PackageRepo + RevisionRepo + BlockRepo + DownloaderRepo + Send + Sync
{
    /// Apply the schema. Idempotent.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// Clamp a count or limit into SQL's signed 64-bit range.
pub(crate) fn sql_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Convert a non-negative SQL count back to `u64`.
pub(crate) fn sql_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

const SQL_TIMESTAMP: &[time::format_description::BorrowedFormatItem<'static>] = time::macros::format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:9]Z"
);

/// Fixed-width UTC text for SQLite timestamp columns.
///
/// SQLite compares these columns as strings, so every value carries all nine
/// fractional digits and the same offset. Text order is then time order.
pub(crate) fn sql_timestamp(at: time::OffsetDateTime) -> MetadataResult<String> {
    at.to_offset(time::UtcOffset::UTC)
        .format(SQL_TIMESTAMP)
        .map_err(|e| MetadataError::Internal(format!("timestamp {at} not encodable: {e}")))
}

/// SQLite-based record store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if missing) a SQLite database and apply the schema.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // A single connection avoids "database is locked" under concurrent writers.
        let mut pool_options = SqlitePoolOptions::new().max_connections(1);
        if let Some(secs) = query_timeout_secs {
            pool_options = pool_options.acquire_timeout(Duration::from_secs(secs));
        }
        let pool = pool_options.connect_with(opts).await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::debug!(path = %path.display(), "SQLite record store ready");

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::error::{is_unique_violation, map_insert_error};
    use crate::models::*;
    use depot_core::StorageTier;
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[async_trait]
    impl PackageRepo for SqliteStore {
        async fn insert_package(&self, package: &PackageRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO packages (package_id, import_path, download_count, recent_download, is_valid, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(package.package_id)
            .bind(&package.import_path)
            .bind(package.download_count)
            .bind(package.recent_download)
            .bind(package.is_valid)
            .bind(sql_timestamp(package.created_at)?)
            .bind(sql_timestamp(package.updated_at)?)
            .execute(&self.pool)
            .await
            .map_err(|e| map_insert_error(e, || format!("package {}", package.import_path)))?;
            Ok(())
        }

        async fn get_package(&self, package_id: Uuid) -> MetadataResult<Option<PackageRow>> {
            let row = sqlx::query_as::<_, PackageRow>("SELECT * FROM packages WHERE package_id = ?")
                .bind(package_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_package_by_path(
            &self,
            import_path: &str,
        ) -> MetadataResult<Option<PackageRow>> {
            let row =
                sqlx::query_as::<_, PackageRow>("SELECT * FROM packages WHERE import_path = ?")
                    .bind(import_path)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn update_package(&self, package: &PackageRow) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE packages SET download_count = ?, recent_download = ?, is_valid = ?, updated_at = ? WHERE package_id = ?",
            )
            .bind(package.download_count)
            .bind(package.recent_download)
            .bind(package.is_valid)
            .bind(sql_timestamp(package.updated_at)?)
            .bind(package.package_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "package {} not found",
                    package.package_id
                )));
            }
            Ok(())
        }

        async fn delete_package(&self, package_id: Uuid) -> MetadataResult<()> {
            let result = sqlx::query("DELETE FROM packages WHERE package_id = ?")
                .bind(package_id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "package {package_id} not found"
                )));
            }
            Ok(())
        }

        async fn list_packages(&self, offset: u64, limit: u64) -> MetadataResult<Vec<PackageRow>> {
            let rows = sqlx::query_as::<_, PackageRow>(
                "SELECT * FROM packages ORDER BY import_path LIMIT ? OFFSET ?",
            )
            .bind(sql_i64(limit))
            .bind(sql_i64(offset))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn record_download(&self, package_id: Uuid) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE packages SET download_count = download_count + 1, recent_download = recent_download + 1 WHERE package_id = ?",
            )
            .bind(package_id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "package {package_id} not found"
                )));
            }
            Ok(())
        }

        async fn reset_recent_downloads(&self) -> MetadataResult<u64> {
            let result =
                sqlx::query("UPDATE packages SET recent_download = 0 WHERE recent_download <> 0")
                    .execute(&self.pool)
                    .await?;
            Ok(result.rows_affected())
        }

        async fn count_packages(&self) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM packages")
                .fetch_one(&self.pool)
                .await?;
            Ok(sql_u64(count))
        }

        async fn total_downloads(&self) -> MetadataResult<u64> {
            let total: i64 =
                sqlx::query_scalar("SELECT COALESCE(SUM(download_count), 0) FROM packages")
                    .fetch_one(&self.pool)
                    .await?;
            Ok(sql_u64(total))
        }

        async fn top_packages(
            &self,
            order: PackageOrder,
            limit: u64,
        ) -> MetadataResult<Vec<PackageRow>> {
            let sql = match order {
                PackageOrder::Trending => {
                    "SELECT * FROM packages ORDER BY recent_download DESC, import_path LIMIT ?"
                }
                PackageOrder::Newest => {
                    "SELECT * FROM packages ORDER BY created_at DESC, import_path LIMIT ?"
                }
                PackageOrder::Popular => {
                    "SELECT * FROM packages ORDER BY download_count DESC, import_path LIMIT ?"
                }
            };
            let rows = sqlx::query_as::<_, PackageRow>(sql)
                .bind(sql_i64(limit))
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl RevisionRepo for SqliteStore {
        async fn insert_revision(&self, revision: &RevisionRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO revisions (revision_id, package_id, revision, tier, size, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(revision.revision_id)
            .bind(revision.package_id)
            .bind(&revision.revision)
            .bind(&revision.tier)
            .bind(revision.size)
            .bind(sql_timestamp(revision.created_at)?)
            .bind(sql_timestamp(revision.updated_at)?)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                map_insert_error(e, || {
                    format!(
                        "revision {} of package {}",
                        revision.revision, revision.package_id
                    )
                })
            })?;
            Ok(())
        }

        async fn get_revision_by_id(
            &self,
            revision_id: Uuid,
        ) -> MetadataResult<Option<RevisionRow>> {
            let row =
                sqlx::query_as::<_, RevisionRow>("SELECT * FROM revisions WHERE revision_id = ?")
                    .bind(revision_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn get_revision(
            &self,
            package_id: Uuid,
            revision: &str,
        ) -> MetadataResult<Option<RevisionRow>> {
            let row = sqlx::query_as::<_, RevisionRow>(
                "SELECT * FROM revisions WHERE package_id = ? AND revision = ?",
            )
            .bind(package_id)
            .bind(revision)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn update_revision(&self, revision: &RevisionRow) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE revisions SET tier = ?, size = ?, updated_at = ? WHERE revision_id = ?",
            )
            .bind(&revision.tier)
            .bind(revision.size)
            .bind(sql_timestamp(revision.updated_at)?)
            .bind(revision.revision_id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "revision {} not found",
                    revision.revision_id
                )));
            }
            Ok(())
        }

        async fn set_revision_tier(
            &self,
            revision_id: Uuid,
            tier: StorageTier,
        ) -> MetadataResult<()> {
            let result = sqlx::query("UPDATE revisions SET tier = ? WHERE revision_id = ?")
                .bind(tier.as_str())
                .bind(revision_id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "revision {revision_id} not found"
                )));
            }
            Ok(())
        }

        async fn touch_revision(
            &self,
            revision_id: Uuid,
            at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result = sqlx::query("UPDATE revisions SET updated_at = ? WHERE revision_id = ?")
                .bind(sql_timestamp(at)?)
                .bind(revision_id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "revision {revision_id} not found"
                )));
            }
            Ok(())
        }

        async fn delete_revision(&self, revision_id: Uuid) -> MetadataResult<()> {
            let result = sqlx::query("DELETE FROM revisions WHERE revision_id = ?")
                .bind(revision_id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "revision {revision_id} not found"
                )));
            }
            Ok(())
        }

        async fn delete_revisions_for_package(&self, package_id: Uuid) -> MetadataResult<u64> {
            let result = sqlx::query("DELETE FROM revisions WHERE package_id = ?")
                .bind(package_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        }

        async fn list_revisions_for_package(
            &self,
            package_id: Uuid,
        ) -> MetadataResult<Vec<RevisionRow>> {
            let rows = sqlx::query_as::<_, RevisionRow>(
                "SELECT * FROM revisions WHERE package_id = ? ORDER BY updated_at DESC, revision",
            )
            .bind(package_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn list_local_revisions(
            &self,
            after: Uuid,
            limit: u64,
        ) -> MetadataResult<Vec<RevisionRow>> {
            let rows = sqlx::query_as::<_, RevisionRow>(
                "SELECT * FROM revisions WHERE tier = 'local' AND revision_id > ? ORDER BY revision_id LIMIT ?",
            )
            .bind(after)
            .bind(sql_i64(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn list_revisions_touched_before(
            &self,
            cutoff: OffsetDateTime,
            after: Uuid,
            limit: u64,
        ) -> MetadataResult<Vec<RevisionRow>> {
            let rows = sqlx::query_as::<_, RevisionRow>(
                "SELECT * FROM revisions WHERE updated_at < ? AND revision_id > ? ORDER BY revision_id LIMIT ?",
            )
            .bind(sql_timestamp(cutoff)?)
            .bind(after)
            .bind(sql_i64(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn list_large_local_revisions(
            &self,
            min_size: u64,
            limit: u64,
        ) -> MetadataResult<Vec<RevisionRow>> {
            let rows = sqlx::query_as::<_, RevisionRow>(
                "SELECT * FROM revisions WHERE tier = 'local' AND size > ? ORDER BY size DESC LIMIT ?",
            )
            .bind(sql_i64(min_size))
            .bind(sql_i64(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl BlockRepo for SqliteStore {
        async fn get_block_entry_by_path(
            &self,
            import_path: &str,
        ) -> MetadataResult<Option<BlockEntryRow>> {
            let row = sqlx::query_as::<_, BlockEntryRow>(
                "SELECT * FROM block_entries WHERE import_path = ?",
            )
            .bind(import_path)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_block_entries(
            &self,
            offset: u64,
            limit: u64,
        ) -> MetadataResult<Vec<BlockEntryRow>> {
            let rows = sqlx::query_as::<_, BlockEntryRow>(
                "SELECT * FROM block_entries ORDER BY created_at DESC, import_path LIMIT ? OFFSET ?",
            )
            .bind(sql_i64(limit))
            .bind(sql_i64(offset))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn insert_block_entry(&self, entry: &BlockEntryRow) -> MetadataResult<()> {
            sqlx::query(
                "INSERT INTO block_entries (entry_id, import_path, note, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(entry.entry_id)
            .bind(&entry.import_path)
            .bind(&entry.note)
            .bind(sql_timestamp(entry.created_at)?)
            .execute(&self.pool)
            .await
            .map_err(|e| map_insert_error(e, || format!("block entry {}", entry.import_path)))?;
            Ok(())
        }

        async fn delete_block_entry(&self, entry_id: Uuid) -> MetadataResult<()> {
            let result = sqlx::query("DELETE FROM block_entries WHERE entry_id = ?")
                .bind(entry_id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "block entry {entry_id} not found"
                )));
            }
            Ok(())
        }

        async fn list_block_rules(&self) -> MetadataResult<Vec<BlockRuleRow>> {
            let rows = sqlx::query_as::<_, BlockRuleRow>(
                "SELECT * FROM block_rules ORDER BY created_at, rule_id",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn get_block_rule(&self, rule_id: Uuid) -> MetadataResult<Option<BlockRuleRow>> {
            let row =
                sqlx::query_as::<_, BlockRuleRow>("SELECT * FROM block_rules WHERE rule_id = ?")
                    .bind(rule_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn insert_block_rule(&self, rule: &BlockRuleRow) -> MetadataResult<()> {
            sqlx::query(
                "INSERT INTO block_rules (rule_id, rule, note, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(rule.rule_id)
            .bind(&rule.rule)
            .bind(&rule.note)
            .bind(sql_timestamp(rule.created_at)?)
            .execute(&self.pool)
            .await
            .map_err(|e| map_insert_error(e, || format!("block rule {}", rule.rule)))?;
            Ok(())
        }

        async fn delete_block_rule(&self, rule_id: Uuid) -> MetadataResult<()> {
            let result = sqlx::query("DELETE FROM block_rules WHERE rule_id = ?")
                .bind(rule_id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "block rule {rule_id} not found"
                )));
            }
            Ok(())
        }

        async fn block_package(
            &self,
            import_path: &str,
            note: &str,
        ) -> MetadataResult<BlockPackageOutcome> {
            let mut tx = self.pool.begin().await?;

            let existing: Option<Uuid> =
                sqlx::query_scalar("SELECT entry_id FROM block_entries WHERE import_path = ?")
                    .bind(import_path)
                    .fetch_optional(&mut *tx)
                    .await?;
            if existing.is_some() {
                return Ok(BlockPackageOutcome {
                    already_blocked: true,
                    ..Default::default()
                });
            }

            let package =
                sqlx::query_as::<_, PackageRow>("SELECT * FROM packages WHERE import_path = ?")
                    .bind(import_path)
                    .fetch_optional(&mut *tx)
                    .await?;

            let mut revisions = Vec::new();
            if let Some(package) = &package {
                revisions = sqlx::query_as::<_, RevisionRow>(
                    "SELECT * FROM revisions WHERE package_id = ? ORDER BY updated_at DESC",
                )
                .bind(package.package_id)
                .fetch_all(&mut *tx)
                .await?;

                sqlx::query("DELETE FROM revisions WHERE package_id = ?")
                    .bind(package.package_id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM packages WHERE package_id = ?")
                    .bind(package.package_id)
                    .execute(&mut *tx)
                    .await?;
            }

            let inserted = sqlx::query(
                "INSERT INTO block_entries (entry_id, import_path, note, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4())
            .bind(import_path)
            .bind(note)
            .bind(sql_timestamp(OffsetDateTime::now_utc())?)
            .execute(&mut *tx)
            .await;

            match inserted {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    tx.rollback().await?;
                    return Ok(BlockPackageOutcome {
                        already_blocked: true,
                        ..Default::default()
                    });
                }
                Err(e) => return Err(e.into()),
            }

            tx.commit().await?;

            Ok(BlockPackageOutcome {
                already_blocked: false,
                package,
                revisions,
            })
        }
    }

    #[async_trait]
    impl DownloaderRepo for SqliteStore {
        async fn record_downloader(&self, ip: &str, at: OffsetDateTime) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO downloaders (ip, created_at, last_seen) VALUES (?, ?, ?)
                ON CONFLICT(ip) DO UPDATE SET last_seen = excluded.last_seen
                "#,
            )
            .bind(ip)
            .bind(sql_timestamp(at)?)
            .bind(sql_timestamp(at)?)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn count_downloaders(&self) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM downloaders")
                .fetch_one(&self.pool)
                .await?;
            Ok(sql_u64(count))
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- Packages, keyed by normalized import path
CREATE TABLE IF NOT EXISTS packages (
    package_id BLOB PRIMARY KEY,
    import_path TEXT NOT NULL UNIQUE,
    download_count INTEGER NOT NULL DEFAULT 0,
    recent_download INTEGER NOT NULL DEFAULT 0,
    is_valid INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_packages_created ON packages(created_at);
CREATE INDEX IF NOT EXISTS idx_packages_recent ON packages(recent_download);
CREATE INDEX IF NOT EXISTS idx_packages_downloads ON packages(download_count);

-- Cached revisions; tier is 'local' (hot) or 'remote' (cold)
CREATE TABLE IF NOT EXISTS revisions (
    revision_id BLOB PRIMARY KEY,
    package_id BLOB NOT NULL REFERENCES packages(package_id) ON DELETE CASCADE,
    revision TEXT NOT NULL,
    tier TEXT NOT NULL DEFAULT 'local' CHECK (tier IN ('local', 'remote')),
    size INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(package_id, revision)
);
CREATE INDEX IF NOT EXISTS idx_revisions_tier ON revisions(tier, revision_id);
CREATE INDEX IF NOT EXISTS idx_revisions_updated ON revisions(updated_at);

-- Exact import path blocks
CREATE TABLE IF NOT EXISTS block_entries (
    entry_id BLOB PRIMARY KEY,
    import_path TEXT NOT NULL UNIQUE,
    note TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);

-- Regular expression blocks, evaluated in creation order
CREATE TABLE IF NOT EXISTS block_rules (
    rule_id BLOB PRIMARY KEY,
    rule TEXT NOT NULL UNIQUE,
    note TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_block_rules_created ON block_rules(created_at);

-- Distinct downloading clients
CREATE TABLE IF NOT EXISTS downloaders (
    ip TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    last_seen TEXT NOT NULL
);
"#;
