//! Server test utilities.

use super::fixtures::FakeProvider;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use bytes::Bytes;
use depot_core::config::{AppConfig, MetadataConfig, ProviderConfig, StorageConfig};
use depot_core::{ArchiveLayout, ImportPath};
use depot_metadata::{MetadataStore, SqliteStore};
use depot_provider::{Provider, ProviderRegistry};
use depot_server::{AppState, create_router};
use depot_storage::{FilesystemBackend, ObjectStore};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// Plain text admin token matching `AdminConfig::for_testing()`.
#[allow(dead_code)]
pub const ADMIN_TOKEN: &str = "test-admin-token";

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub provider: Arc<FakeProvider>,
    pub hot: Arc<FilesystemBackend>,
    pub cold: Arc<FilesystemBackend>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary hot and cold tiers. Archives
    /// are fetched from an unreachable address unless already seeded.
    pub async fn new() -> Self {
        Self::build("http://127.0.0.1:9", |_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build("http://127.0.0.1:9", modifier).await
    }

    /// Create a test server whose provider downloads archives from
    /// `archive_base`.
    pub async fn with_archive_base(archive_base: &str) -> Self {
        Self::build(archive_base, |_| {}).await
    }

    async fn build<F>(archive_base: &str, modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let hot_path = temp_dir.path().join("hot");
        let cold_path = temp_dir.path().join("cold");
        let db_path = temp_dir.path().join("metadata.db");

        let mut config = AppConfig::for_testing();
        config.archive.path = hot_path.clone();
        config.storage = StorageConfig::Filesystem {
            path: cold_path.clone(),
        };
        config.metadata = MetadataConfig::Sqlite {
            path: db_path.clone(),
            query_timeout_secs: None,
        };
        modifier(&mut config);

        let hot = Arc::new(
            FilesystemBackend::new(&hot_path)
                .await
                .expect("Failed to create hot tier"),
        );
        let cold = Arc::new(
            FilesystemBackend::new(&cold_path)
                .await
                .expect("Failed to create cold tier"),
        );
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("Failed to create metadata store"),
        );

        let provider = Arc::new(FakeProvider::new(archive_base));
        let registry = ProviderRegistry::new(vec![provider.clone() as Arc<dyn Provider>]);
        let (_, fetcher) = depot_provider::from_config(&ProviderConfig::default())
            .expect("Failed to build archive fetcher");

        let state = AppState::new(
            config,
            hot.clone(),
            cold.clone() as Arc<dyn ObjectStore>,
            metadata,
            registry,
            fetcher,
        );
        let router = create_router(state.clone());

        Self {
            router,
            state,
            provider,
            hot,
            cold,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Place an archive on the hot tier so resolution finds it without
    /// downloading.
    pub async fn seed_archive(&self, import_path: &str, revision: &str, data: Bytes) {
        let import_path = ImportPath::parse(import_path).expect("valid import path");
        self.hot
            .put(
                &ArchiveLayout::local_key(&import_path, revision, ".zip"),
                data,
            )
            .await
            .expect("Failed to seed archive");
    }

    /// Send a request and return the raw response parts.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        auth_token: Option<&str>,
    ) -> (StatusCode, axum::http::HeaderMap, Bytes) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = auth_token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(json.to_string()))
                .expect("valid request"),
            None => builder.body(Body::empty()).expect("valid request"),
        };

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read body");
        (status, headers, bytes)
    }

    /// Send a request and parse the body as JSON (`Value::Null` when empty).
    pub async fn json_request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        auth_token: Option<&str>,
    ) -> (StatusCode, Value) {
        let (status, _, bytes) = self.request(method, uri, body, auth_token).await;
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }
}
