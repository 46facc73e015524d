//! Integration tests for the admin endpoints.

mod common;

use axum::http::{Method, StatusCode};
use bytes::Bytes;
use common::{ADMIN_TOKEN, DEFAULT_REVISION, TestServer};
use depot_core::config::RunMode;
use depot_storage::ObjectStore;
use serde_json::json;

const PKG: &str = "provider.example/owner/repo";

async fn cache_package(server: &TestServer, import_path: &str) {
    server
        .seed_archive(import_path, DEFAULT_REVISION, Bytes::from_static(b"zip"))
        .await;
    let (status, _) = server
        .json_request(
            Method::GET,
            &format!("/api/v1/revision?pkgname={import_path}"),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn admin_routes_require_token() {
    let server = TestServer::new().await;

    let (status, body) = server
        .json_request(Method::GET, "/api/admin/block/rules", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");

    let (status, _) = server
        .json_request(Method::GET, "/api/admin/block/rules", None, Some("wrong"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = server
        .json_request(Method::GET, "/api/admin/block/rules", None, Some(ADMIN_TOKEN))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = server
        .json_request(
            Method::GET,
            &format!("/api/admin/block/rules?access_token={ADMIN_TOKEN}"),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn public_routes_need_no_token() {
    let server = TestServer::new().await;
    let (status, _) = server
        .json_request(Method::GET, "/api/v1/stats", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn block_package_purges_and_blocks() {
    let server = TestServer::new().await;
    cache_package(&server, PKG).await;

    let (status, body) = server
        .json_request(
            Method::POST,
            &format!("/api/admin/package/block?pkgname={PKG}/sub&note=license"),
            None,
            Some(ADMIN_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["import_path"], PKG);
    assert_eq!(body["already_blocked"], false);
    assert_eq!(body["revisions_deleted"], 1);

    assert!(server.metadata().get_package_by_path(PKG).await.unwrap().is_none());
    assert!(
        !server
            .hot
            .exists("provider.example/owner/repo/abc123.zip")
            .await
            .unwrap()
    );

    let (status, body) = server
        .json_request(
            Method::GET,
            &format!("/api/v1/download?pkgname={PKG}"),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["message"].as_str().unwrap().contains("license"));
    assert_eq!(server.provider.lookups(), 1);

    let (status, body) = server
        .json_request(
            Method::POST,
            &format!("/api/admin/package/block?pkgname={PKG}"),
            None,
            Some(ADMIN_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["already_blocked"], true);
}

#[tokio::test]
async fn block_entries_crud_and_unblock() {
    let server = TestServer::new().await;

    let (status, created) = server
        .json_request(
            Method::POST,
            "/api/admin/block/entries",
            Some(json!({ "import_path": "provider.example/evil/pkg", "note": "malware" })),
            Some(ADMIN_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let entry_id = created["entry_id"].as_str().unwrap().to_string();

    let (status, _) = server
        .json_request(
            Method::POST,
            "/api/admin/block/entries",
            Some(json!({ "import_path": "provider.example/evil/pkg" })),
            Some(ADMIN_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, listed) = server
        .json_request(Method::GET, "/api/admin/block/entries", None, Some(ADMIN_TOKEN))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["entries"].as_array().unwrap().len(), 1);

    let (status, _) = server
        .json_request(
            Method::GET,
            "/api/v1/revision?pkgname=provider.example/evil/pkg",
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = server
        .json_request(
            Method::DELETE,
            &format!("/api/admin/block/entries/{entry_id}"),
            None,
            Some(ADMIN_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = server
        .json_request(
            Method::DELETE,
            &format!("/api/admin/block/entries/{entry_id}"),
            None,
            Some(ADMIN_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    cache_package(&server, "provider.example/evil/pkg").await;
}

#[tokio::test]
async fn malformed_rule_is_rejected() {
    let server = TestServer::new().await;
    let (status, body) = server
        .json_request(
            Method::POST,
            "/api/admin/block/rules",
            Some(json!({ "rule": "([unclosed", "note": "bad" })),
            Some(ADMIN_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("invalid block rule"));

    let (status, _) = server
        .json_request(
            Method::POST,
            "/api/admin/block/rules",
            Some(json!({ "note": "missing rule" })),
            Some(ADMIN_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rule_blocks_requests_until_deleted() {
    let server = TestServer::new().await;
    let (status, rule) = server
        .json_request(
            Method::POST,
            "/api/admin/block/rules",
            Some(json!({ "rule": "^provider\\.example/spam/", "note": "spam" })),
            Some(ADMIN_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let rule_id = rule["rule_id"].as_str().unwrap().to_string();

    let (status, body) = server
        .json_request(
            Method::GET,
            "/api/v1/revision?pkgname=provider.example/spam/one",
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "blocked");

    let (status, _) = server
        .json_request(
            Method::DELETE,
            &format!("/api/admin/block/rules/{rule_id}"),
            None,
            Some(ADMIN_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    cache_package(&server, "provider.example/spam/one").await;
}

#[tokio::test]
async fn run_rule_purges_matching_packages() {
    let server = TestServer::with_config(|config| config.server.run_mode = RunMode::Prod).await;
    cache_package(&server, "provider.example/spam/one").await;
    cache_package(&server, "provider.example/spam/two").await;
    cache_package(&server, PKG).await;
    let stats = server.state.tiers.upload_sweep().await.unwrap();
    assert_eq!(stats.items_moved, 3);

    let (_, rule) = server
        .json_request(
            Method::POST,
            "/api/admin/block/rules",
            Some(json!({ "rule": "^provider\\.example/spam/", "note": "spam" })),
            Some(ADMIN_TOKEN),
        )
        .await;
    let rule_id = rule["rule_id"].as_str().unwrap();

    let (status, report) = server
        .json_request(
            Method::POST,
            &format!("/api/admin/block/rules/{rule_id}/run"),
            None,
            Some(ADMIN_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["packages_affected"], 2);
    assert_eq!(report["remote_deleted"], 2);
    assert_eq!(report["errors"], 0);

    assert!(
        !server
            .cold
            .exists("provider.example/spam/one-abc123.zip")
            .await
            .unwrap()
    );
    assert!(
        server
            .cold
            .exists("provider.example/owner/repo-abc123.zip")
            .await
            .unwrap()
    );
    assert!(server.metadata().get_package_by_path(PKG).await.unwrap().is_some());

    let (status, _) = server
        .json_request(
            Method::POST,
            "/api/admin/block/rules/00000000-0000-0000-0000-000000000000/run",
            None,
            Some(ADMIN_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = server
        .json_request(
            Method::POST,
            "/api/admin/block/rules/not-a-uuid/run",
            None,
            Some(ADMIN_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn tiering_endpoints_run_sweeps() {
    let server = TestServer::new().await;
    cache_package(&server, PKG).await;

    let (status, stats) = server
        .json_request(Method::POST, "/api/admin/tiering/upload", None, Some(ADMIN_TOKEN))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["items_moved"], 1);
    assert_eq!(stats["errors"], 0);

    let (status, stats) = server
        .json_request(Method::POST, "/api/admin/tiering/expire", None, Some(ADMIN_TOKEN))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["items_deleted"], 0);
}

#[tokio::test]
async fn large_revisions_are_listed() {
    let server = TestServer::with_config(|config| config.tiering.max_upload_size_mb = 0).await;
    cache_package(&server, PKG).await;

    let (status, body) = server
        .json_request(
            Method::GET,
            "/api/admin/package/revision/large",
            None,
            Some(ADMIN_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let revisions = body["revisions"].as_array().unwrap();
    assert_eq!(revisions.len(), 1);
    assert_eq!(revisions[0]["import_path"], PKG);
    assert_eq!(revisions[0]["revision"], DEFAULT_REVISION);
}
