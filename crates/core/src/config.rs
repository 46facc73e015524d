//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Deployment mode.
///
/// Destructive calls against the cold tier only happen in `Prod`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Dev,
    Prod,
}

impl RunMode {
    pub fn is_production(self) -> bool {
        matches!(self, Self::Prod)
    }
}

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Deployment mode.
    #[serde(default)]
    pub run_mode: RunMode,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// The endpoint is unauthenticated; restrict it at the network level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            run_mode: RunMode::default(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Admin access configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminConfig {
    /// SHA256 hex of the admin access token.
    /// Generate with: `echo -n "your-secret-token" | sha256sum`
    pub token_hash: String,
}

impl AdminConfig {
    /// Create a test configuration.
    ///
    /// **For testing only.** The hash is the SHA256 of `test-admin-token`.
    pub fn for_testing() -> Self {
        Self {
            token_hash: "17d6bfe05d1b1fb7bc499f8e3f639c7b3eda4c40f321eef8887a0c04c89a99c5"
                .to_string(),
        }
    }

    /// Validate the configured hash shape.
    pub fn validate(&self) -> Result<(), String> {
        let hash = self
            .token_hash
            .strip_prefix("sha256:")
            .unwrap_or(&self.token_hash);
        if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err("admin.token_hash must be a 64 character SHA256 hex digest".to_string());
        }
        Ok(())
    }
}

/// Hot-tier archive configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Root directory of the hot tier.
    #[serde(default = "default_archive_path")]
    pub path: PathBuf,
    /// Public base URL of the cold tier (e.g. a CDN in front of the bucket).
    /// Remote revisions are served by redirecting to `<remote_base_url>/<key>`.
    #[serde(default)]
    pub remote_base_url: Option<String>,
}

fn default_archive_path() -> PathBuf {
    PathBuf::from("./data/archives")
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            path: default_archive_path(),
            remote_base_url: None,
        }
    }
}

/// Cold-tier storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage (development and single-host setups).
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// Access key ID. Falls back to the ambient AWS credential chain if unset.
        access_key_id: Option<String>,
        /// Secret access key. Prefer DEPOT_STORAGE__SECRET_ACCESS_KEY over the file.
        secret_access_key: Option<String>,
        /// Use path-style URLs (`endpoint/bucket/key`). Needed for MinIO.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/remote"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.trim().is_empty() {
                    return Err("s3 config requires a bucket name".to_string());
                }
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ),
                }
            }
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    Disable,
    #[default]
    Prefer,
    Require,
}

/// Record store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (single-host deployments and tests).
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Advisory query timeout in seconds. SQLite cannot cancel statements.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL. Takes precedence over the individual fields.
        url: Option<String>,
        host: Option<String>,
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        username: Option<String>,
        /// Prefer DEPOT_METADATA__PASSWORD over storing it in the file.
        password: Option<String>,
        database: Option<String>,
        ssl_mode: Option<PgSslMode>,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Server side statement timeout in milliseconds.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(30_000)
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(60)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/depot.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate record store configuration.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                ..
            } => match (url.as_ref(), host.as_ref(), database.as_ref()) {
                (Some(_), _, _) | (None, Some(_), Some(_)) => Ok(()),
                (None, None, _) => {
                    Err("postgres config requires either 'url' or 'host' + 'database'".to_string())
                }
                (None, Some(_), None) => Err(
                    "postgres config requires 'database' when using individual fields".to_string(),
                ),
            },
        }
    }
}

/// Upstream provider configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Timeout for revision lookups, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Timeout for a whole archive download, in seconds.
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    /// TCP connect timeout, in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// User-Agent sent to providers.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Base URL of github.com pages and archives.
    #[serde(default = "default_github_url")]
    pub github_url: String,
    /// Base URL of bitbucket.org pages and archives.
    #[serde(default = "default_bitbucket_url")]
    pub bitbucket_url: String,
    /// Base URL of the bitbucket repository API.
    #[serde(default = "default_bitbucket_api_url")]
    pub bitbucket_api_url: String,
    /// Base URL of code.google.com project pages.
    #[serde(default = "default_google_code_url")]
    pub google_code_url: String,
    /// Base URL that `<repo>.googlecode.com` archive requests are routed
    /// through as `{base}/{host}/archive/..`. `None` contacts the per-project
    /// host directly.
    #[serde(default)]
    pub google_code_archive_url: Option<String>,
}

fn default_request_timeout_secs() -> u64 {
    20
}

fn default_download_timeout_secs() -> u64 {
    300
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    concat!("depot/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_github_url() -> String {
    "https://github.com".to_string()
}

fn default_bitbucket_url() -> String {
    "https://bitbucket.org".to_string()
}

fn default_bitbucket_api_url() -> String {
    "https://api.bitbucket.org/1.0".to_string()
}

fn default_google_code_url() -> String {
    "http://code.google.com".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            download_timeout_secs: default_download_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            user_agent: default_user_agent(),
            github_url: default_github_url(),
            bitbucket_url: default_bitbucket_url(),
            bitbucket_api_url: default_bitbucket_api_url(),
            google_code_url: default_google_code_url(),
            google_code_archive_url: None,
        }
    }
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }

    pub fn download_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.download_timeout_secs)
    }

    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.connect_timeout_secs)
    }

    /// Every outbound call must be bounded.
    pub fn validate(&self) -> Result<(), String> {
        if self.request_timeout_secs == 0
            || self.download_timeout_secs == 0
            || self.connect_timeout_secs == 0
        {
            return Err("providers timeouts must be at least 1 second".to_string());
        }
        Ok(())
    }
}

/// Tiered storage and background job configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TieringConfig {
    /// Run the upload sweep (hot tier to cold tier).
    #[serde(default = "default_upload_enabled")]
    pub upload_enabled: bool,
    /// Seconds between upload sweeps (default: 1 hour).
    #[serde(default = "default_upload_interval_secs")]
    pub upload_interval_secs: u64,
    /// Seconds between expiration sweeps (default: 1 day).
    #[serde(default = "default_expire_interval_secs")]
    pub expire_interval_secs: u64,
    /// Revisions untouched for longer than this are expired (default: 30 days).
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Archives larger than this stay in the hot tier (default: 20 MiB).
    #[serde(default = "default_max_upload_size_mb")]
    pub max_upload_size_mb: u64,
    /// Seconds between statistics refreshes (default: 5 minutes).
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
    /// Rows fetched per record store page during sweeps.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Run every periodic job once at startup.
    #[serde(default = "default_run_at_startup")]
    pub run_at_startup: bool,
}

fn default_upload_enabled() -> bool {
    true
}

fn default_upload_interval_secs() -> u64 {
    3600
}

fn default_expire_interval_secs() -> u64 {
    86400
}

fn default_retention_secs() -> u64 {
    30 * 86400
}

fn default_max_upload_size_mb() -> u64 {
    20
}

fn default_stats_interval_secs() -> u64 {
    300
}

fn default_batch_size() -> u32 {
    500
}

fn default_run_at_startup() -> bool {
    true
}

impl Default for TieringConfig {
    fn default() -> Self {
        Self {
            upload_enabled: default_upload_enabled(),
            upload_interval_secs: default_upload_interval_secs(),
            expire_interval_secs: default_expire_interval_secs(),
            retention_secs: default_retention_secs(),
            max_upload_size_mb: default_max_upload_size_mb(),
            stats_interval_secs: default_stats_interval_secs(),
            batch_size: default_batch_size(),
            run_at_startup: default_run_at_startup(),
        }
    }
}

impl TieringConfig {
    pub fn upload_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.upload_interval_secs)
    }

    pub fn expire_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.expire_interval_secs)
    }

    pub fn stats_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.stats_interval_secs)
    }

    /// Retention window as a signed duration for timestamp arithmetic.
    pub fn retention(&self) -> Duration {
        Duration::seconds(i64::try_from(self.retention_secs).unwrap_or(i64::MAX))
    }

    /// Upload ceiling in bytes.
    pub fn max_upload_size_bytes(&self) -> u64 {
        self.max_upload_size_mb.saturating_mul(1024 * 1024)
    }

    /// Validate intervals (zero would panic `tokio::time::interval`).
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("tiering.upload_interval_secs", self.upload_interval_secs),
            ("tiering.expire_interval_secs", self.expire_interval_secs),
            ("tiering.stats_interval_secs", self.stats_interval_secs),
        ] {
            if value == 0 {
                return Err(format!("{name} cannot be 0"));
            }
        }
        if self.retention_secs > i64::MAX as u64 {
            return Err(format!(
                "tiering.retention_secs {} exceeds maximum value {}",
                self.retention_secs,
                i64::MAX
            ));
        }
        if self.batch_size == 0 {
            return Err("tiering.batch_size cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// Cold-tier backend.
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub providers: ProviderConfig,
    #[serde(default)]
    pub tiering: TieringConfig,
    /// Admin access (required).
    pub admin: AdminConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.**
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            archive: ArchiveConfig::default(),
            storage: StorageConfig::default(),
            metadata: MetadataConfig::default(),
            providers: ProviderConfig::default(),
            tiering: TieringConfig::default(),
            admin: AdminConfig::for_testing(),
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.admin.validate()?;
        self.storage.validate()?;
        self.metadata.validate()?;
        self.providers.validate()?;
        self.tiering.validate()?;
        Ok(())
    }
}
