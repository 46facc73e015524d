//! Administrative endpoints. Every route here sits behind `require_admin`.

use super::common::Pagination;
use crate::blocking::{BlockPackageReport, RuleRunReport, validate_rule};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::tiering::SweepStats;
use axum::Json;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use depot_core::ImportPath;
use depot_metadata::models::{BlockEntryRow, BlockRuleRow};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use uuid::Uuid;

/// Maximum request body size for admin endpoints (1 MiB).
const MAX_ADMIN_BODY_SIZE: usize = 1024 * 1024;

async fn read_json<T: DeserializeOwned>(req: Request) -> ApiResult<T> {
    let bytes = axum::body::to_bytes(req.into_body(), MAX_ADMIN_BODY_SIZE)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

fn parse_id(raw: &str, what: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| ApiError::BadRequest(format!("invalid {what} ID: {e}")))
}

#[derive(Debug, Deserialize)]
pub struct BlockPackageQuery {
    pub pkgname: String,
    #[serde(default)]
    pub note: String,
}

/// POST /api/admin/package/block?pkgname=&note= - Block a package and purge
/// its archives.
pub async fn block_package(
    State(state): State<AppState>,
    Query(query): Query<BlockPackageQuery>,
) -> ApiResult<Json<BlockPackageReport>> {
    let import_path = ImportPath::parse(&query.pkgname)?;
    let report = state.blocks.block_package(&import_path, &query.note).await?;
    Ok(Json(report))
}

#[derive(Debug, Serialize)]
pub struct LargeRevision {
    pub revision_id: Uuid,
    /// `None` when the package record is gone.
    pub import_path: Option<String>,
    pub revision: String,
    pub size: i64,
}

#[derive(Debug, Serialize)]
pub struct LargeRevisionsResponse {
    pub min_size: u64,
    pub revisions: Vec<LargeRevision>,
}

/// GET /api/admin/package/revision/large - Hot tier revisions the upload
/// sweep will not move.
pub async fn list_large_revisions(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<LargeRevisionsResponse>> {
    let min_size = state.config.tiering.max_upload_size_bytes();
    let rows = state
        .metadata
        .list_large_local_revisions(min_size, page.clamped_limit())
        .await?;

    let mut revisions = Vec::with_capacity(rows.len());
    for row in rows {
        let import_path = state
            .metadata
            .get_package(row.package_id)
            .await?
            .map(|p| p.import_path);
        revisions.push(LargeRevision {
            revision_id: row.revision_id,
            import_path,
            revision: row.revision,
            size: row.size,
        });
    }

    Ok(Json(LargeRevisionsResponse {
        min_size,
        revisions,
    }))
}

#[derive(Debug, Serialize)]
pub struct ListBlockEntriesResponse {
    pub entries: Vec<BlockEntryRow>,
}

/// GET /api/admin/block/entries
pub async fn list_block_entries(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<ListBlockEntriesResponse>> {
    let entries = state
        .metadata
        .list_block_entries(page.offset, page.clamped_limit())
        .await?;
    Ok(Json(ListBlockEntriesResponse { entries }))
}

#[derive(Debug, Deserialize)]
pub struct CreateBlockEntryRequest {
    pub import_path: String,
    #[serde(default)]
    pub note: String,
}

/// POST /api/admin/block/entries - Block an exact path without purging.
///
/// The path need not be cached yet, so paths can be blocked ahead of use.
pub async fn create_block_entry(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<BlockEntryRow>)> {
    let body: CreateBlockEntryRequest = read_json(req).await?;
    let import_path = state.registry.normalize(&ImportPath::parse(&body.import_path)?);

    let entry = BlockEntryRow {
        entry_id: Uuid::new_v4(),
        import_path: import_path.as_str().to_string(),
        note: body.note,
        created_at: OffsetDateTime::now_utc(),
    };
    state.metadata.insert_block_entry(&entry).await?;
    tracing::info!(import_path = %import_path, "block entry added");

    Ok((StatusCode::CREATED, Json(entry)))
}

/// DELETE /api/admin/block/entries/{entry_id} - Unblock.
pub async fn delete_block_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<String>,
) -> ApiResult<StatusCode> {
    let entry_id = parse_id(&entry_id, "entry")?;
    state.metadata.delete_block_entry(entry_id).await?;
    tracing::info!(entry_id = %entry_id, "block entry removed");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct ListBlockRulesResponse {
    pub rules: Vec<BlockRuleRow>,
}

/// GET /api/admin/block/rules
pub async fn list_block_rules(
    State(state): State<AppState>,
) -> ApiResult<Json<ListBlockRulesResponse>> {
    let rules = state.metadata.list_block_rules().await?;
    Ok(Json(ListBlockRulesResponse { rules }))
}

#[derive(Debug, Deserialize)]
pub struct CreateBlockRuleRequest {
    pub rule: String,
    #[serde(default)]
    pub note: String,
}

/// POST /api/admin/block/rules - Add a rule. Malformed expressions are
/// rejected here so they never reach the request path.
pub async fn create_block_rule(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<BlockRuleRow>)> {
    let body: CreateBlockRuleRequest = read_json(req).await?;
    validate_rule(&body.rule)?;

    let rule = BlockRuleRow {
        rule_id: Uuid::new_v4(),
        rule: body.rule,
        note: body.note,
        created_at: OffsetDateTime::now_utc(),
    };
    state.metadata.insert_block_rule(&rule).await?;
    tracing::info!(rule_id = %rule.rule_id, rule = %rule.rule, "block rule added");

    Ok((StatusCode::CREATED, Json(rule)))
}

/// DELETE /api/admin/block/rules/{rule_id}
pub async fn delete_block_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<String>,
) -> ApiResult<StatusCode> {
    let rule_id = parse_id(&rule_id, "rule")?;
    state.metadata.delete_block_rule(rule_id).await?;
    state.blocks.forget(rule_id);
    tracing::info!(rule_id = %rule_id, "block rule removed");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/admin/block/rules/{rule_id}/run - Purge every cached package
/// the rule matches.
pub async fn run_block_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<String>,
) -> ApiResult<Json<RuleRunReport>> {
    let rule_id = parse_id(&rule_id, "rule")?;
    let report = state.blocks.run_block_rule(rule_id).await?;
    Ok(Json(report))
}

/// POST /api/admin/tiering/upload - Run an upload sweep now.
pub async fn trigger_upload(State(state): State<AppState>) -> ApiResult<Json<SweepStats>> {
    Ok(Json(state.tiers.upload_sweep().await?))
}

/// POST /api/admin/tiering/expire - Run an expiration sweep now.
pub async fn trigger_expire(State(state): State<AppState>) -> ApiResult<Json<SweepStats>> {
    Ok(Json(
        state.tiers.expire_sweep(OffsetDateTime::now_utc()).await?,
    ))
}
