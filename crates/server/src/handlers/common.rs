//! Shared handler helpers.

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use serde::Deserialize;
use std::convert::Infallible;
use std::net::SocketAddr;

/// Largest page a listing endpoint returns.
pub const MAX_PAGE_SIZE: u64 = 500;

fn default_limit() -> u64 {
    100
}

/// Offset pagination for listing endpoints.
#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub offset: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

impl Pagination {
    pub fn clamped_limit(&self) -> u64 {
        self.limit.clamp(1, MAX_PAGE_SIZE)
    }
}

/// `?pkgname=&revision=` as used by the download and revision endpoints.
#[derive(Debug, Deserialize)]
pub struct PackageQuery {
    pub pkgname: String,
    /// Branch, tag or commit hint. Empty means the provider default.
    #[serde(default)]
    pub revision: String,
}

/// Client address: the first `X-Forwarded-For` hop if present, otherwise the
/// peer address. `None` when neither is known.
#[derive(Debug, Clone)]
pub struct ClientIp(pub Option<String>);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        if forwarded.is_some() {
            return Ok(Self(forwarded));
        }

        Ok(Self(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string()),
        ))
    }
}
