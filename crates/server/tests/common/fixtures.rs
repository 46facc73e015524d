//! Test fixtures: a fake provider and archive payloads.

use async_trait::async_trait;
use bytes::Bytes;
use depot_core::ImportPath;
use depot_provider::{Provider, ProviderResult, Resolution};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Import path prefix served by [`FakeProvider`].
pub const FAKE_PREFIX: &str = "provider.example/";

/// Revision returned for an empty hint.
pub const DEFAULT_REVISION: &str = "abc123";

/// Whether the sandbox lets tests bind a local port for `httpmock`.
#[allow(dead_code)]
pub fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

/// Generate deterministic archive bytes based on a seed.
#[allow(dead_code)]
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Provider for `provider.example/` whose revision lookup never leaves the
/// process. The empty hint resolves to [`DEFAULT_REVISION`], any other hint
/// resolves to itself. Archives are served from `archive_base`.
pub struct FakeProvider {
    pub archive_base: String,
    pub lookups: AtomicUsize,
}

impl FakeProvider {
    pub fn new(archive_base: impl Into<String>) -> Self {
        Self {
            archive_base: archive_base.into(),
            lookups: AtomicUsize::new(0),
        }
    }

    #[allow(dead_code)]
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn prefix(&self) -> &'static str {
        FAKE_PREFIX
    }

    async fn resolve_revision(
        &self,
        import_path: &ImportPath,
        value: &str,
    ) -> ProviderResult<Resolution> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let revision = if value.is_empty() {
            DEFAULT_REVISION.to_string()
        } else {
            value.to_string()
        };
        Ok(Resolution {
            import_path: import_path.clone(),
            value: value.to_string(),
            revision,
            download_path: import_path.clone(),
        })
    }

    fn archive_url(&self, resolution: &Resolution) -> ProviderResult<String> {
        Ok(format!(
            "{}/{}/{}.zip",
            self.archive_base.trim_end_matches('/'),
            resolution.download_path,
            resolution.revision
        ))
    }
}
