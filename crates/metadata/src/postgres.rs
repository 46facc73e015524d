//! PostgreSQL-based record store implementation.

use crate::error::{MetadataError, MetadataResult, is_unique_violation, map_insert_error};
use crate::models::*;
use crate::repos::{BlockRepo, DownloaderRepo, PackageRepo, RevisionRepo};
use crate::store::{MetadataStore, sql_i64, sql_u64};
use async_trait::async_trait;
use depot_core::StorageTier;
use depot_core::config::PgSslMode;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Connect using a full connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Connect using individual parameters, so the password can come from
    /// the environment rather than a URL in the config file.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{timeout_ms}ms"))]);
            tracing::info!(timeout_ms, "PostgreSQL statement_timeout set");
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // Prepared statements hold one statement each.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl PackageRepo for PostgresStore {
    async fn insert_package(&self, package: &PackageRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO packages (package_id, import_path, download_count, recent_download, is_valid, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(package.package_id)
        .bind(&package.import_path)
        .bind(package.download_count)
        .bind(package.recent_download)
        .bind(package.is_valid)
        .bind(package.created_at)
        .bind(package.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, || format!("package {}", package.import_path)))?;
        Ok(())
    }

    async fn get_package(&self, package_id: Uuid) -> MetadataResult<Option<PackageRow>> {
        let row = sqlx::query_as::<_, PackageRow>("SELECT * FROM packages WHERE package_id = $1")
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
            sqlx::query_as::<_, PackageRow>("SELECT * FROM packages WHERE import_path = $1")
                .bind(import_path)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    async fn update_package(&self, package: &PackageRow) -> MetadataResult<()> {
        let result = sqlx::query(
            "UPDATE packages SET download_count = $1, recent_download = $2, is_valid = $3, updated_at = $4 WHERE package_id = $5",
        )
        .bind(package.download_count)
        .bind(package.recent_download)
        .bind(package.is_valid)
        .bind(package.updated_at)
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
        let result = sqlx::query("DELETE FROM packages WHERE package_id = $1")
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
            "SELECT * FROM packages ORDER BY import_path LIMIT $1 OFFSET $2",
        )
        .bind(sql_i64(limit))
        .bind(sql_i64(offset))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn record_download(&self, package_id: Uuid) -> MetadataResult<()> {
        let result = sqlx::query(
            "UPDATE packages SET download_count = download_count + 1, recent_download = recent_download + 1 WHERE package_id = $1",
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
            sqlx::query_scalar("SELECT CAST(COALESCE(SUM(download_count), 0) AS BIGINT) FROM packages")
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
                "SELECT * FROM packages ORDER BY recent_download DESC, import_path LIMIT $1"
            }
            PackageOrder::Newest => {
                "SELECT * FROM packages ORDER BY created_at DESC, import_path LIMIT $1"
            }
            PackageOrder::Popular => {
                "SELECT * FROM packages ORDER BY download_count DESC, import_path LIMIT $1"
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
impl RevisionRepo for PostgresStore {
    async fn insert_revision(&self, revision: &RevisionRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO revisions (revision_id, package_id, revision, tier, size, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(revision.revision_id)
        .bind(revision.package_id)
        .bind(&revision.revision)
        .bind(&revision.tier)
        .bind(revision.size)
        .bind(revision.created_at)
        .bind(revision.updated_at)
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
            sqlx::query_as::<_, RevisionRow>("SELECT * FROM revisions WHERE revision_id = $1")
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
            "SELECT * FROM revisions WHERE package_id = $1 AND revision = $2",
        )
        .bind(package_id)
        .bind(revision)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_revision(&self, revision: &RevisionRow) -> MetadataResult<()> {
        let result = sqlx::query(
            "UPDATE revisions SET tier = $1, size = $2, updated_at = $3 WHERE revision_id = $4",
        )
        .bind(&revision.tier)
        .bind(revision.size)
        .bind(revision.updated_at)
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
        let result = sqlx::query("UPDATE revisions SET tier = $1 WHERE revision_id = $2")
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
        let result = sqlx::query("UPDATE revisions SET updated_at = $1 WHERE revision_id = $2")
            .bind(at)
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
        let result = sqlx::query("DELETE FROM revisions WHERE revision_id = $1")
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
        let result = sqlx::query("DELETE FROM revisions WHERE package_id = $1")
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
            "SELECT * FROM revisions WHERE package_id = $1 ORDER BY updated_at DESC, revision",
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
            "SELECT * FROM revisions WHERE tier = 'local' AND revision_id > $1 ORDER BY revision_id LIMIT $2",
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
            "SELECT * FROM revisions WHERE updated_at < $1 AND revision_id > $2 ORDER BY revision_id LIMIT $3",
        )
        .bind(cutoff)
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
            "SELECT * FROM revisions WHERE tier = 'local' AND size > $1 ORDER BY size DESC LIMIT $2",
        )
        .bind(sql_i64(min_size))
        .bind(sql_i64(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl BlockRepo for PostgresStore {
    async fn get_block_entry_by_path(
        &self,
        import_path: &str,
    ) -> MetadataResult<Option<BlockEntryRow>> {
        let row = sqlx::query_as::<_, BlockEntryRow>(
            "SELECT * FROM block_entries WHERE import_path = $1",
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
            "SELECT * FROM block_entries ORDER BY created_at DESC, import_path LIMIT $1 OFFSET $2",
        )
        .bind(sql_i64(limit))
        .bind(sql_i64(offset))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_block_entry(&self, entry: &BlockEntryRow) -> MetadataResult<()> {
        sqlx::query(
            "INSERT INTO block_entries (entry_id, import_path, note, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(entry.entry_id)
        .bind(&entry.import_path)
        .bind(&entry.note)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, || format!("block entry {}", entry.import_path)))?;
        Ok(())
    }

    async fn delete_block_entry(&self, entry_id: Uuid) -> MetadataResult<()> {
        let result = sqlx::query("DELETE FROM block_entries WHERE entry_id = $1")
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
            sqlx::query_as::<_, BlockRuleRow>("SELECT * FROM block_rules WHERE rule_id = $1")
                .bind(rule_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    async fn insert_block_rule(&self, rule: &BlockRuleRow) -> MetadataResult<()> {
        sqlx::query(
            "INSERT INTO block_rules (rule_id, rule, note, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(rule.rule_id)
        .bind(&rule.rule)
        .bind(&rule.note)
        .bind(rule.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, || format!("block rule {}", rule.rule)))?;
        Ok(())
    }

    async fn delete_block_rule(&self, rule_id: Uuid) -> MetadataResult<()> {
        let result = sqlx::query("DELETE FROM block_rules WHERE rule_id = $1")
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
            sqlx::query_scalar("SELECT entry_id FROM block_entries WHERE import_path = $1")
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
            sqlx::query_as::<_, PackageRow>("SELECT * FROM packages WHERE import_path = $1")
                .bind(import_path)
                .fetch_optional(&mut *tx)
                .await?;

        let mut revisions = Vec::new();
        if let Some(package) = &package {
            revisions = sqlx::query_as::<_, RevisionRow>(
                "SELECT * FROM revisions WHERE package_id = $1 ORDER BY updated_at DESC",
            )
            .bind(package.package_id)
            .fetch_all(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM revisions WHERE package_id = $1")
                .bind(package.package_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM packages WHERE package_id = $1")
                .bind(package.package_id)
                .execute(&mut *tx)
                .await?;
        }

        let inserted = sqlx::query(
            "INSERT INTO block_entries (entry_id, import_path, note, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4())
        .bind(import_path)
        .bind(note)
        .bind(OffsetDateTime::now_utc())
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
impl DownloaderRepo for PostgresStore {
    async fn record_downloader(&self, ip: &str, at: OffsetDateTime) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO downloaders (ip, created_at, last_seen) VALUES ($1, $2, $3)
            ON CONFLICT(ip) DO UPDATE SET last_seen = excluded.last_seen
            "#,
        )
        .bind(ip)
        .bind(at)
        .bind(at)
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
