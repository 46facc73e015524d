//! Shared HTTP client for provider lookups and archive downloads.

use crate::error::{ProviderError, ProviderResult};
use depot_core::config::ProviderConfig;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::de::DeserializeOwned;

/// Everything but RFC 3986 unreserved characters.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Build the single outbound client shared by every provider.
///
/// Every request is bounded by the connect and request timeouts; archive
/// downloads override the request timeout per call.
pub fn build_client(config: &ProviderConfig) -> ProviderResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .connect_timeout(config.connect_timeout())
        .timeout(config.request_timeout())
        .build()
        .map_err(|e| ProviderError::Client(e.to_string()))
}

/// Fetch a page body, treating non-success statuses as errors.
pub(crate) async fn get_text(client: &reqwest::Client, url: &str) -> reqwest::Result<String> {
    tracing::debug!(url, "provider request");
    client.get(url).send().await?.error_for_status()?.text().await
}

/// Fetch and decode a JSON document.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
) -> reqwest::Result<T> {
    tracing::debug!(url, "provider request");
    client.get(url).send().await?.error_for_status()?.json().await
}

/// Encode a caller-supplied value as one URL path segment. `/`, `?`, `#`
/// and `%` are escaped, so the value cannot change the request target.
pub(crate) fn path_segment(value: &str) -> String {
    utf8_percent_encode(value, SEGMENT).to_string()
}

/// Drop a trailing slash from a configured base URL.
pub(crate) fn base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_segment_escapes_url_syntax() {
        assert_eq!(path_segment("master"), "master");
        assert_eq!(path_segment("v1.2.3-rc_1~x"), "v1.2.3-rc_1~x");
        assert_eq!(path_segment("../../evil?x=1#f"), "..%2F..%2Fevil%3Fx%3D1%23f");
        assert_eq!(path_segment("feature/a b%"), "feature%2Fa%20b%25");
    }
}
