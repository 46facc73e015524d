//! Block list evaluation and enforcement.
//!
//! A path is blocked by an exact entry or by the first matching rule in
//! creation order. Rule expressions are compiled once and cached by rule id.
//! An expression that fails to compile is reported once and then skipped, so
//! a broken rule never decides the outcome for unrelated paths.

use crate::error::{ApiError, ApiResult};
use depot_core::{ArchiveLayout, ImportPath, StorageTier};
use depot_metadata::{MetadataResult, MetadataStore};
use depot_metadata::models::{BlockRuleRow, PackageRow, RevisionRow};
use depot_provider::ProviderRegistry;
use depot_storage::{FilesystemBackend, ObjectStore};
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Page size when scanning packages for a rule run.
const PACKAGE_PAGE_SIZE: u64 = 500;

/// Outcome of a block check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockDecision {
    Allowed,
    /// Blocked; carries the note of the entry or rule that matched.
    Blocked(String),
}

/// Result of blocking one package.
#[derive(Debug, Default, Serialize)]
pub struct BlockPackageReport {
    pub import_path: String,
    /// The path was already blocked and nothing changed.
    pub already_blocked: bool,
    pub revisions_deleted: usize,
    pub remote_keys: Vec<String>,
    pub remote_deleted: usize,
}

/// Result of applying one rule to every stored package.
#[derive(Debug, Default, Serialize)]
pub struct RuleRunReport {
    pub rule_id: Uuid,
    pub packages_affected: u64,
    pub remote_keys: Vec<String>,
    pub remote_deleted: usize,
    pub errors: u64,
    /// First per-package failure; later packages were still processed.
    pub first_error: Option<String>,
}

/// Compile a rule expression, mapping failures to a configuration error.
pub fn validate_rule(expr: &str) -> depot_core::Result<Regex> {
    Regex::new(expr).map_err(|e| {
        depot_core::Error::Configuration(format!("invalid block rule {expr:?}: {e}"))
    })
}

/// Block list engine shared by the request path and admin handlers.
pub struct BlockEngine {
    metadata: Arc<dyn MetadataStore>,
    hot: Arc<FilesystemBackend>,
    cold: Arc<dyn ObjectStore>,
    registry: ProviderRegistry,
    production: bool,
    /// `None` marks a rule that failed to compile and was already reported.
    compiled: RwLock<HashMap<Uuid, Option<Arc<Regex>>>>,
}

impl BlockEngine {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        hot: Arc<FilesystemBackend>,
        cold: Arc<dyn ObjectStore>,
        registry: ProviderRegistry,
        production: bool,
    ) -> Self {
        Self {
            metadata,
            hot,
            cold,
            registry,
            production,
            compiled: RwLock::new(HashMap::new()),
        }
    }

    /// Decide whether `import_path` may be resolved. No network calls.
    pub async fn check(&self, import_path: &ImportPath) -> MetadataResult<BlockDecision> {
        if let Some(entry) = self
            .metadata
            .get_block_entry_by_path(import_path.as_str())
            .await?
        {
            return Ok(BlockDecision::Blocked(entry.note));
        }

        for rule in self.metadata.list_block_rules().await? {
            let Some(regex) = self.compiled_rule(&rule) else {
                continue;
            };
            if regex.is_match(import_path.as_str()) {
                tracing::debug!(
                    rule_id = %rule.rule_id,
                    import_path = %import_path,
                    "block rule matched"
                );
                return Ok(BlockDecision::Blocked(rule.note));
            }
        }
        Ok(BlockDecision::Allowed)
    }

    /// Drop the cached compilation of a deleted rule.
    pub fn forget(&self, rule_id: Uuid) {
        self.compiled
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&rule_id);
    }

    fn compiled_rule(&self, rule: &BlockRuleRow) -> Option<Arc<Regex>> {
        if let Some(cached) = self
            .compiled
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&rule.rule_id)
        {
            return cached.clone();
        }

        let compiled = match validate_rule(&rule.rule) {
            Ok(regex) => Some(Arc::new(regex)),
            Err(e) => {
                tracing::error!(
                    rule_id = %rule.rule_id,
                    error = %e,
                    "skipping malformed block rule"
                );
                None
            }
        };
        self.compiled
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(rule.rule_id, compiled.clone());
        compiled
    }

    /// Delete a package with its revisions and record a block entry for it.
    ///
    /// The record change is one transaction. Archives of the deleted revisions
    /// are removed afterwards: hot tier files always, cold tier objects only in
    /// production. Paths with no stored package are blocked all the same and
    /// leave every archive in place.
    pub async fn block_package(
        &self,
        import_path: &ImportPath,
        note: &str,
    ) -> ApiResult<BlockPackageReport> {
        let import_path = self.registry.normalize(import_path);
        let outcome = self
            .metadata
            .block_package(import_path.as_str(), note)
            .await?;

        let mut report = BlockPackageReport {
            import_path: import_path.to_string(),
            already_blocked: outcome.already_blocked,
            revisions_deleted: outcome.revisions.len(),
            ..Default::default()
        };
        if outcome.already_blocked {
            return Ok(report);
        }

        self.remove_local_archives(&import_path, &outcome.revisions)
            .await;
        report.remote_keys = self.remote_keys(&import_path, &outcome.revisions);
        let (deleted, _) = self.delete_remote(&report.remote_keys).await;
        report.remote_deleted = deleted;

        tracing::info!(
            import_path = %import_path,
            revisions = report.revisions_deleted,
            "package blocked"
        );
        Ok(report)
    }

    /// Apply a stored rule to every package.
    ///
    /// Matching packages lose their revisions and hot tier archives. Package
    /// rows and cold tier objects are deleted only in production. A failure on
    /// one package is recorded and the run moves on to the next.
    pub async fn run_block_rule(&self, rule_id: Uuid) -> ApiResult<RuleRunReport> {
        let rule = self
            .metadata
            .get_block_rule(rule_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("block rule {rule_id}")))?;
        let regex = validate_rule(&rule.rule)?;

        let matches = self.matching_packages(&regex).await?;
        let mut report = RuleRunReport {
            rule_id,
            ..Default::default()
        };

        for package in matches {
            match self.apply_to_package(&package).await {
                Ok(keys) => {
                    report.packages_affected += 1;
                    report.remote_keys.extend(keys);
                    tracing::info!(
                        rule_id = %rule_id,
                        import_path = %package.import_path,
                        "package blocked by rule"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        rule_id = %rule_id,
                        import_path = %package.import_path,
                        error = %e,
                        "failed to apply block rule to package"
                    );
                    report.errors += 1;
                    report
                        .first_error
                        .get_or_insert_with(|| format!("{}: {e}", package.import_path));
                }
            }
        }

        let (deleted, errors) = self.delete_remote(&report.remote_keys).await;
        report.remote_deleted = deleted;
        report.errors += errors;

        tracing::info!(
            rule_id = %rule_id,
            packages = report.packages_affected,
            errors = report.errors,
            "block rule run finished"
        );
        Ok(report)
    }

    async fn matching_packages(&self, regex: &Regex) -> ApiResult<Vec<PackageRow>> {
        let mut matches = Vec::new();
        let mut offset = 0;
        loop {
            let page = self
                .metadata
                .list_packages(offset, PACKAGE_PAGE_SIZE)
                .await?;
            let fetched = page.len() as u64;
            matches.extend(
                page.into_iter()
                    .filter(|p| regex.is_match(&p.import_path)),
            );
            if fetched < PACKAGE_PAGE_SIZE {
                break;
            }
            offset += fetched;
        }
        Ok(matches)
    }

    async fn apply_to_package(&self, package: &PackageRow) -> ApiResult<Vec<String>> {
        let import_path = ImportPath::parse(&package.import_path)?;
        let revisions = self
            .metadata
            .list_revisions_for_package(package.package_id)
            .await?;
        let keys = self.remote_keys(&import_path, &revisions);

        self.metadata
            .delete_revisions_for_package(package.package_id)
            .await?;
        self.remove_local_archives(&import_path, &revisions).await;

        if self.production {
            self.metadata.delete_package(package.package_id).await?;
        }
        Ok(keys)
    }

    fn remote_keys(&self, import_path: &ImportPath, revisions: &[RevisionRow]) -> Vec<String> {
        let extension = self.registry.archive_extension(import_path);
        revisions
            .iter()
            .filter(|r| matches!(r.storage_tier(), Ok(StorageTier::Remote)))
            .map(|r| ArchiveLayout::remote_key(import_path, &r.revision, extension))
            .collect()
    }

    /// Delete the hot tier files of the given revisions, then the package
    /// directory if that left it empty. Nothing outside those keys is touched.
    async fn remove_local_archives(&self, import_path: &ImportPath, revisions: &[RevisionRow]) {
        let extension = self.registry.archive_extension(import_path);
        for revision in revisions
            .iter()
            .filter(|r| matches!(r.storage_tier(), Ok(StorageTier::Local)))
        {
            let key = ArchiveLayout::local_key(import_path, &revision.revision, extension);
            match self.hot.delete(&key).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "failed to remove local archive");
                }
            }
        }
        if !revisions.is_empty()
            && let Err(e) = self.hot.remove_empty_dir(import_path.as_str()).await
        {
            tracing::warn!(
                import_path = %import_path,
                error = %e,
                "failed to remove package directory"
            );
        }
    }

    /// Delete cold tier objects. Returns (deleted, errors).
    async fn delete_remote(&self, keys: &[String]) -> (usize, u64) {
        if keys.is_empty() {
            return (0, 0);
        }
        if !self.production {
            tracing::info!(keys = keys.len(), "not in production, keeping remote archives");
            return (0, 0);
        }

        let mut deleted = 0;
        let mut errors = 0;
        for key in keys {
            match self.cold.delete(key).await {
                Ok(()) => deleted += 1,
                Err(e) if e.is_not_found() => deleted += 1,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "failed to delete remote archive");
                    errors += 1;
                }
            }
        }
        (deleted, errors)
    }
}
