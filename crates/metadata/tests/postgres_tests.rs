//! PostgreSQL integration tests using testcontainers.
//!
//! These require Docker. Set SKIP_POSTGRES_TESTS=1 to skip.

use depot_core::{ImportPath, StorageTier};
use depot_metadata::models::{BlockRuleRow, PackageRow, RevisionRow};
use depot_metadata::repos::{BlockRepo, DownloaderRepo, PackageRepo, RevisionRepo};
use depot_metadata::{MetadataError, MetadataStore, PostgresStore};
use std::time::Duration;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::{ContainerAsync, GenericImage, ImageExt, runners::AsyncRunner};
use time::OffsetDateTime;
use uuid::Uuid;

const POSTGRES_IMAGE: &str = "postgres";
const POSTGRES_TAG: &str = "16-alpine";

struct PostgresContext {
    _container: ContainerAsync<GenericImage>,
    store: PostgresStore,
}

async fn postgres_or_skip() -> Option<PostgresContext> {
    if std::env::var("SKIP_POSTGRES_TESTS").is_ok() {
        return None;
    }

    let container = match GenericImage::new(POSTGRES_IMAGE, POSTGRES_TAG)
        .with_exposed_port(5432.tcp())
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .start()
        .await
    {
        Ok(container) => container,
        Err(e) => {
            eprintln!("Skipping PostgreSQL test (Docker unavailable): {e}");
            return None;
        }
    };

    let host = container.get_host().await.expect("container host");
    let port = container
        .get_host_port_ipv4(5432.tcp())
        .await
        .expect("container port");
    let url = format!("postgres://postgres:postgres@{host}:{port}/postgres");

    // The server restarts once after init; retry until it accepts connections.
    let mut last_err = None;
    for _ in 0..30 {
        match PostgresStore::from_url(&url, 5, None).await {
            Ok(store) => {
                return Some(PostgresContext {
                    _container: container,
                    store,
                });
            }
            Err(e) => {
                last_err = Some(e);
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }
    panic!("PostgreSQL test setup failed: {last_err:?}");
}

fn path(s: &str) -> ImportPath {
    ImportPath::parse(s).unwrap()
}

#[tokio::test]
async fn test_postgres_package_and_revision_lifecycle() {
    let Some(ctx) = postgres_or_skip().await else {
        return;
    };
    let store = &ctx.store;
    let now = OffsetDateTime::now_utc();

    let package = PackageRow::new(&path("github.com/owner/repo"), now);
    store.insert_package(&package).await.unwrap();
    assert!(matches!(
        store.insert_package(&package).await,
        Err(MetadataError::AlreadyExists(_))
    ));

    let revision = RevisionRow::new_local(package.package_id, "abc123", 42, now);
    store.insert_revision(&revision).await.unwrap();
    assert!(matches!(
        store.insert_revision(&revision).await,
        Err(MetadataError::AlreadyExists(_))
    ));

    store
        .set_revision_tier(revision.revision_id, StorageTier::Remote)
        .await
        .unwrap();
    let stored = store
        .get_revision(package.package_id, "abc123")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.tier, "remote");

    let local = store.list_local_revisions(Uuid::nil(), 10).await.unwrap();
    assert!(local.is_empty());

    store.record_download(package.package_id).await.unwrap();
    store.record_download(package.package_id).await.unwrap();
    assert_eq!(store.total_downloads().await.unwrap(), 2);
    assert_eq!(store.reset_recent_downloads().await.unwrap(), 1);
    let reloaded = store.get_package(package.package_id).await.unwrap().unwrap();
    assert_eq!(reloaded.download_count, 2);
    assert_eq!(reloaded.recent_download, 0);

    store.delete_revision(revision.revision_id).await.unwrap();
    assert!(matches!(
        store.delete_revision(revision.revision_id).await,
        Err(MetadataError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_postgres_touched_before_keeps_boundary() {
    let Some(ctx) = postgres_or_skip().await else {
        return;
    };
    let store = &ctx.store;
    let cutoff = OffsetDateTime::now_utc() - time::Duration::days(30);

    let package = PackageRow::new(&path("github.com/owner/old"), cutoff);
    store.insert_package(&package).await.unwrap();

    let mut at_cutoff = RevisionRow::new_local(package.package_id, "edge", 1, cutoff);
    at_cutoff.updated_at = cutoff;
    store.insert_revision(&at_cutoff).await.unwrap();
    let older = RevisionRow::new_local(
        package.package_id,
        "older",
        1,
        cutoff - time::Duration::seconds(1),
    );
    store.insert_revision(&older).await.unwrap();

    let expired = store
        .list_revisions_touched_before(cutoff, Uuid::nil(), 10)
        .await
        .unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].revision, "older");
}

#[tokio::test]
async fn test_postgres_block_package_is_atomic() {
    let Some(ctx) = postgres_or_skip().await else {
        return;
    };
    let store = &ctx.store;
    let now = OffsetDateTime::now_utc();

    let package = PackageRow::new(&path("github.com/bad/pkg"), now);
    store.insert_package(&package).await.unwrap();
    store
        .insert_revision(&RevisionRow::new_local(package.package_id, "r1", 1, now))
        .await
        .unwrap();

    let outcome = store.block_package("github.com/bad/pkg", "abuse").await.unwrap();
    assert!(!outcome.already_blocked);
    assert_eq!(outcome.revisions.len(), 1);
    assert!(
        store
            .get_package_by_path("github.com/bad/pkg")
            .await
            .unwrap()
            .is_none()
    );
    let entry = store
        .get_block_entry_by_path("github.com/bad/pkg")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.note, "abuse");

    let again = store.block_package("github.com/bad/pkg", "abuse").await.unwrap();
    assert!(again.already_blocked);
}

#[tokio::test]
async fn test_postgres_rules_and_downloaders() {
    let Some(ctx) = postgres_or_skip().await else {
        return;
    };
    let store = &ctx.store;
    let now = OffsetDateTime::now_utc();

    let rule = BlockRuleRow {
        rule_id: Uuid::new_v4(),
        rule: "^github\\.com/spam/".to_string(),
        note: "spam".to_string(),
        created_at: now,
    };
    store.insert_block_rule(&rule).await.unwrap();
    assert_eq!(store.list_block_rules().await.unwrap().len(), 1);
    store.delete_block_rule(rule.rule_id).await.unwrap();
    assert!(store.get_block_rule(rule.rule_id).await.unwrap().is_none());

    store.record_downloader("10.0.0.1", now).await.unwrap();
    store.record_downloader("10.0.0.1", now).await.unwrap();
    store.record_downloader("10.0.0.2", now).await.unwrap();
    assert_eq!(store.count_downloaders().await.unwrap(), 2);
}
