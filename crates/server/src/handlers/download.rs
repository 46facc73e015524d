//! Public endpoints: archive download, revision lookup, package info,
//! statistics and badges.

use super::common::{ClientIp, PackageQuery};
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::resolver::Resolved;
use crate::state::AppState;
use crate::stats::StatsSnapshot;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use axum::response::{IntoResponse, Response};
use depot_core::{ImportPath, StorageTier};
use depot_metadata::models::{PackageRow, RevisionRow};
use depot_storage::ObjectStore;
use futures::StreamExt;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Characters escaped in a redirect path. `/` stays literal.
const PATH_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

const ARCHIVE_CONTENT_TYPE: &str = "application/zip";

const ROBOTS_TXT: &str = "User-agent: *\nDisallow: /api/\nDisallow: /download\n";

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /v1/health - Health check.
///
/// Unauthenticated; reports only status and version.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.metadata.health_check().await?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /robots.txt
pub async fn robots_txt() -> &'static str {
    ROBOTS_TXT
}

#[derive(Debug, Serialize)]
pub struct RevisionResponse {
    pub sha: String,
}

/// GET /api/v1/revision?pkgname=&revision= - Resolve to a commit id.
pub async fn get_revision(
    State(state): State<AppState>,
    Query(query): Query<PackageQuery>,
) -> ApiResult<Json<RevisionResponse>> {
    let resolved = state
        .resolver
        .resolve_and_fetch(&query.pkgname, &query.revision)
        .await?;
    Ok(Json(RevisionResponse {
        sha: resolved.revision.revision,
    }))
}

/// GET /api/v1/download?pkgname=&revision= - Serve the archive.
///
/// Hot tier archives are streamed with an attachment file name. Cold tier
/// archives redirect to the public cold tier URL when one is configured and
/// are streamed from the cold tier otherwise.
pub async fn download(
    State(state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    Query(query): Query<PackageQuery>,
) -> ApiResult<Response> {
    let resolved = state
        .resolver
        .resolve_and_fetch(&query.pkgname, &query.revision)
        .await?;

    record_download(&state, &resolved, client_ip.as_deref()).await;
    metrics::DOWNLOADS_SERVED
        .with_label_values(&[resolved.tier.as_str()])
        .inc();

    serve_archive(&state, &resolved).await
}

/// Build the response for a resolved revision.
///
/// An upload sweep can move a hot tier archive between resolution and
/// streaming. When the local file is gone the record is read again and a
/// revision now on the cold tier is served from there.
pub async fn serve_archive(state: &AppState, resolved: &Resolved) -> ApiResult<Response> {
    match resolved.tier {
        StorageTier::Local => {
            let streamed =
                stream_archive(state.hot.as_ref(), &resolved.local_key(), &resolved.download_name())
                    .await;
            match streamed {
                Err(ApiError::Storage(e)) if e.is_not_found() => {
                    let current = state
                        .metadata
                        .get_revision_by_id(resolved.revision.revision_id)
                        .await?;
                    match current.as_ref().map(RevisionRow::storage_tier) {
                        Some(Ok(StorageTier::Remote)) => {
                            tracing::debug!(
                                import_path = %resolved.import_path,
                                revision = %resolved.revision.revision,
                                "archive moved to cold tier during request"
                            );
                            serve_remote(state, resolved).await
                        }
                        _ => Err(ApiError::Storage(e)),
                    }
                }
                other => other,
            }
        }
        StorageTier::Remote => serve_remote(state, resolved).await,
    }
}

async fn serve_remote(state: &AppState, resolved: &Resolved) -> ApiResult<Response> {
    let key = resolved.remote_key();
    match state.config.archive.remote_base_url.as_deref() {
        Some(base) => {
            let location = format!(
                "{}/{}",
                base.trim_end_matches('/'),
                utf8_percent_encode(&key, PATH_ESCAPE)
            );
            Ok((StatusCode::FOUND, [(LOCATION, location)]).into_response())
        }
        None => stream_archive(state.cold.as_ref(), &key, &resolved.download_name()).await,
    }
}

/// Download accounting never fails the download itself.
async fn record_download(state: &AppState, resolved: &Resolved, client_ip: Option<&str>) {
    if let Err(e) = state
        .metadata
        .record_download(resolved.package.package_id)
        .await
    {
        tracing::warn!(import_path = %resolved.import_path, error = %e, "failed to count download");
    }
    if let Some(ip) = client_ip
        && let Err(e) = state
            .metadata
            .record_downloader(ip, OffsetDateTime::now_utc())
            .await
    {
        tracing::warn!(ip = %ip, error = %e, "failed to record downloader");
    }
}

async fn stream_archive(store: &dyn ObjectStore, key: &str, file_name: &str) -> ApiResult<Response> {
    let meta = store.head(key).await?;
    let stream = store
        .get_stream(key)
        .await?
        .map(|result| result.map_err(|e| std::io::Error::other(e.to_string())));

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, ARCHIVE_CONTENT_TYPE.to_string()),
            (CONTENT_LENGTH, meta.size.to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct PackageInfoQuery {
    pub pkgname: String,
}

#[derive(Debug, Serialize)]
pub struct PackageInfoResponse {
    pub package: PackageRow,
    pub revisions: Vec<RevisionRow>,
}

/// GET /api/v1/package?pkgname= - Package record with its cached revisions.
pub async fn get_package(
    State(state): State<AppState>,
    Query(query): Query<PackageInfoQuery>,
) -> ApiResult<Json<PackageInfoResponse>> {
    let import_path = state.registry.normalize(&ImportPath::parse(&query.pkgname)?);
    let package = state
        .metadata
        .get_package_by_path(import_path.as_str())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("package {import_path} not found")))?;
    let revisions = state
        .metadata
        .list_revisions_for_package(package.package_id)
        .await?;

    Ok(Json(PackageInfoResponse { package, revisions }))
}

/// GET /api/v1/stats - Latest statistics snapshot.
pub async fn get_stats(State(state): State<AppState>) -> Json<StatsSnapshot> {
    let snapshot = state.stats.borrow().clone();
    Json(snapshot.as_ref().clone())
}

/// GET /badge/{*import_path} - Redirect to a download count badge.
pub async fn badge(
    State(state): State<AppState>,
    Path(import_path): Path<String>,
) -> ApiResult<Response> {
    let import_path = ImportPath::parse(import_path.trim_end_matches(".svg"))?;
    let package = state
        .metadata
        .get_package_by_path(import_path.as_str())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("package {import_path} not found")))?;

    let location = format!(
        "https://img.shields.io/badge/downloads-{}_total-blue.svg?style=flat",
        package.download_count
    );
    Ok((StatusCode::FOUND, [(LOCATION, location)]).into_response())
}
