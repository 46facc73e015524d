//! End-to-end download tests against a mock archive host.

mod common;

use axum::http::{Method, StatusCode};
use common::{TestServer, can_bind_localhost, seeded_bytes};
use depot_storage::ObjectStore;
use httpmock::Method::GET;
use httpmock::MockServer;

const PKG: &str = "provider.example/owner/repo";

#[tokio::test]
async fn first_download_fetches_then_serves_from_cache() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let upstream = MockServer::start();
    let payload = seeded_bytes(42, 10_000);
    let archive = upstream.mock(|when, then| {
        when.method(GET).path(format!("/{PKG}/abc123.zip"));
        then.status(200).body(payload.to_vec());
    });

    let server = TestServer::with_archive_base(&upstream.base_url()).await;
    let uri = format!("/api/v1/download?pkgname={PKG}");

    let (status, _, body) = server.request(Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, payload);
    archive.assert_hits(1);

    let package = server
        .metadata()
        .get_package_by_path(PKG)
        .await
        .unwrap()
        .unwrap();
    let revision = server
        .metadata()
        .get_revision(package.package_id, "abc123")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(revision.tier, "local");
    assert_eq!(revision.size, 10_000);

    let (status, _, body) = server
        .request(
            Method::GET,
            &format!("{uri}&revision=abc123"),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, payload);
    archive.assert_hits(1);
    assert_eq!(server.provider.lookups(), 1);
}

#[tokio::test]
async fn missing_local_file_is_fetched_again() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let upstream = MockServer::start();
    let archive = upstream.mock(|when, then| {
        when.method(GET).path(format!("/{PKG}/abc123.zip"));
        then.status(200).body("PK-bytes");
    });

    let server = TestServer::with_archive_base(&upstream.base_url()).await;
    let uri = format!("/api/v1/download?pkgname={PKG}&revision=abc123");

    let (status, _, _) = server.request(Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    server
        .hot
        .delete(&format!("{PKG}/abc123.zip"))
        .await
        .unwrap();

    let (status, _, body) = server.request(Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"PK-bytes");
    archive.assert_hits(2);
}

#[tokio::test]
async fn upstream_error_leaves_no_revision() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let upstream = MockServer::start();
    upstream.mock(|when, then| {
        when.method(GET).path(format!("/{PKG}/abc123.zip"));
        then.status(503);
    });

    let server = TestServer::with_archive_base(&upstream.base_url()).await;
    let (status, body) = server
        .json_request(
            Method::GET,
            &format!("/api/v1/download?pkgname={PKG}"),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["message"].as_str().unwrap().contains("retry later"));
    assert!(
        !server
            .hot
            .exists(&format!("{PKG}/abc123.zip"))
            .await
            .unwrap()
    );
}
