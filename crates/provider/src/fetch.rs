//! Archive fetcher.

use crate::error::{ProviderError, ProviderResult};
use crate::traits::{Provider, Resolution};
use depot_storage::{ObjectStore, StreamingUpload};
use futures::StreamExt;
use std::time::Duration;
use tracing::instrument;

/// What a fetch did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The archive was downloaded; carries its size in bytes.
    Downloaded(u64),
    /// An object already existed under the key; nothing was downloaded.
    AlreadyPresent,
}

/// Downloads provider archives into the hot tier.
#[derive(Clone, Debug)]
pub struct ArchiveFetcher {
    client: reqwest::Client,
    download_timeout: Duration,
}

impl ArchiveFetcher {
    pub fn new(client: reqwest::Client, download_timeout: Duration) -> Self {
        Self {
            client,
            download_timeout,
        }
    }

    /// Fetch the archive of `resolution` into `store` under `key`.
    ///
    /// Skipped when the key already exists. The upload is only published on
    /// success, so a failed download never leaves a partial object under `key`.
    #[instrument(skip(self, provider, store), fields(provider = provider.name()))]
    pub async fn fetch(
        &self,
        provider: &dyn Provider,
        resolution: &Resolution,
        store: &dyn ObjectStore,
        key: &str,
    ) -> ProviderResult<FetchOutcome> {
        if store.exists(key).await? {
            return Ok(FetchOutcome::AlreadyPresent);
        }

        let url = provider.archive_url(resolution)?;
        let upload = store.put_stream(key).await?;
        let size = self
            .download(&url, upload)
            .await
            .map_err(|reason| ProviderError::download(&resolution.import_path, reason))?;
        tracing::info!(
            import_path = %resolution.import_path,
            revision = %resolution.revision,
            bytes = size,
            "archive downloaded"
        );
        Ok(FetchOutcome::Downloaded(size))
    }

    async fn download(
        &self,
        url: &str,
        mut upload: Box<dyn StreamingUpload>,
    ) -> Result<u64, String> {
        let result = self.copy_body(url, upload.as_mut()).await;
        match result {
            Ok(()) => upload.finish().await.map_err(|e| e.to_string()),
            Err(reason) => {
                if let Err(e) = upload.abort().await {
                    tracing::warn!(url, error = %e, "failed to discard partial download");
                }
                Err(reason)
            }
        }
    }

    async fn copy_body(&self, url: &str, upload: &mut dyn StreamingUpload) -> Result<(), String> {
        let response = self
            .client
            .get(url)
            .timeout(self.download_timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| format!("fail to download {url}: {e}"))?;

        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| format!("fail to read {url}: {e}"))?;
            upload
                .write(chunk)
                .await
                .map_err(|e| format!("fail to store archive: {e}"))?;
        }
        Ok(())
    }
}
