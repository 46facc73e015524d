//! Provider lookups and archive downloads against a mock upstream.

use depot_core::config::ProviderConfig;
use depot_core::{ArchiveLayout, ImportPath};
use depot_provider::{FetchOutcome, ProviderError, ProviderRegistry, from_config};
use depot_storage::{FilesystemBackend, ObjectStore};
use httpmock::Method::GET;
use httpmock::MockServer;
use std::net::TcpListener;

const SHA: &str = "0123abcdef0123abcdef0123abcdef0123abcdef";

fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

fn config_for(server: &MockServer) -> ProviderConfig {
    ProviderConfig {
        github_url: server.base_url(),
        bitbucket_url: server.base_url(),
        bitbucket_api_url: server.url("/api/1.0"),
        google_code_url: server.base_url(),
        google_code_archive_url: Some(server.url("/gc")),
        request_timeout_secs: 5,
        download_timeout_secs: 5,
        ..ProviderConfig::default()
    }
}

fn registry_for(server: &MockServer) -> (ProviderRegistry, depot_provider::ArchiveFetcher) {
    from_config(&config_for(server)).unwrap()
}

fn path(s: &str) -> ImportPath {
    ImportPath::parse(s).unwrap()
}

fn commits_page(sha: &str) -> String {
    format!(
        r#"<html><div class="commit-links-group BtnGroup"><clipboard-copy value="{sha}"></clipboard-copy></div></html>"#
    )
}

#[tokio::test]
async fn github_resolves_and_fetches_once() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }
    let server = MockServer::start();
    let commits = server.mock(|when, then| {
        when.method(GET).path("/owner/repo/commits/v1.0");
        then.status(200).body(commits_page(SHA));
    });
    let archive = server.mock(|when, then| {
        when.method(GET).path(format!("/owner/repo/archive/{SHA}.zip"));
        then.status(200).body("PK-archive-bytes");
    });

    let (registry, fetcher) = registry_for(&server);
    let import_path = registry.normalize(&path("github.com/owner/repo/sub"));
    let provider = registry.find_provider(&import_path).unwrap();
    let resolution = provider.resolve_revision(&import_path, "v1.0").await.unwrap();
    assert_eq!(resolution.revision, SHA);
    assert_eq!(resolution.import_path.as_str(), "github.com/owner/repo");
    commits.assert();

    let dir = tempfile::tempdir().unwrap();
    let hot = FilesystemBackend::new(dir.path()).await.unwrap();
    let key = ArchiveLayout::local_key(&import_path, SHA, provider.extension());

    let outcome = fetcher
        .fetch(provider.as_ref(), &resolution, &hot, &key)
        .await
        .unwrap();
    assert_eq!(outcome, FetchOutcome::Downloaded(16));
    assert_eq!(hot.get(&key).await.unwrap().as_ref(), b"PK-archive-bytes");
    assert!(
        dir.path()
            .join(format!("github.com/owner/repo/{SHA}.zip"))
            .is_file()
    );

    let again = fetcher
        .fetch(provider.as_ref(), &resolution, &hot, &key)
        .await
        .unwrap();
    assert_eq!(again, FetchOutcome::AlreadyPresent);
    archive.assert_hits(1);
}

#[tokio::test]
async fn github_default_branch_and_missing_locator() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }
    let server = MockServer::start();
    let master = server.mock(|when, then| {
        when.method(GET).path("/owner/repo/commits/master");
        then.status(200).body(r#"<p value="deadbeef"></p>"#);
    });

    let (registry, _) = registry_for(&server);
    let import_path = path("github.com/owner/repo");
    let provider = registry.find_provider(&import_path).unwrap();
    let err = provider.resolve_revision(&import_path, "").await.unwrap_err();
    assert!(matches!(err, ProviderError::RevisionLookupFailed { .. }));
    assert!(err.is_transient());
    master.assert();
}

#[tokio::test]
async fn github_value_stays_inside_commits_path() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }
    let server = MockServer::start();
    let escaped = server.mock(|when, then| {
        when.method(GET).path("/evil");
        then.status(200).body(commits_page(SHA));
    });

    let (registry, _) = registry_for(&server);
    let import_path = path("github.com/owner/repo");
    let provider = registry.find_provider(&import_path).unwrap();
    let err = provider
        .resolve_revision(&import_path, "../../../evil?x=1#frag")
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::RevisionLookupFailed { .. }));
    escaped.assert_hits(0);
}

#[tokio::test]
async fn golang_redirects_to_github_golang() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/golang/net/commits/master");
        then.status(200).body(commits_page(SHA));
    });

    let (registry, _) = registry_for(&server);
    let import_path = registry.normalize(&path("golang.org/x/net/html"));
    assert_eq!(import_path.as_str(), "golang.org/x/net");
    let provider = registry.find_provider(&import_path).unwrap();
    let resolution = provider.resolve_revision(&import_path, "").await.unwrap();
    assert_eq!(resolution.revision, SHA);
    assert_eq!(resolution.download_path.as_str(), "github.com/golang/net");
    assert_eq!(
        provider.archive_url(&resolution).unwrap(),
        format!("{}/golang/net/archive/{SHA}.zip", server.base_url())
    );
}

#[tokio::test]
async fn bitbucket_uses_scm_default_tag() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }
    let server = MockServer::start();
    let api = server.mock(|when, then| {
        when.method(GET).path("/api/1.0/repositories/owner/repo");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"scm": "hg", "name": "repo"}"#);
    });
    server.mock(|when, then| {
        when.method(GET).path("/owner/repo/commits/default");
        then.status(200)
            .body(r#"<tr data-revision="a1b2c3d4e5f6"><td>"#);
    });

    let (registry, _) = registry_for(&server);
    let import_path = path("bitbucket.org/owner/repo");
    let provider = registry.find_provider(&import_path).unwrap();
    let resolution = provider.resolve_revision(&import_path, "").await.unwrap();
    api.assert();
    assert_eq!(resolution.value, "default");
    assert_eq!(resolution.revision, "a1b2c3d4e5f6");
}

#[tokio::test]
async fn google_code_rejects_svn() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/p/oldproj/source/checkout");
        then.status(200)
            .body(r#"<tt id="checkoutcmd">svn checkout http://oldproj.googlecode.com/svn/trunk/</tt>"#);
    });
    server.mock(|when, then| {
        when.method(GET).path("/p/newproj/source/checkout");
        then.status(200)
            .body(r#"<tt id="checkoutcmd">git clone https://code.google.com/p/newproj/</tt>"#);
    });
    server.mock(|when, then| {
        when.method(GET)
            .path("/p/newproj/source/browse/")
            .query_param("r", "master");
        then.status(200)
            .body("<script>_setViewedRevision('f00dfeed');</script>");
    });

    let (registry, _) = registry_for(&server);

    let svn = path("code.google.com/p/oldproj");
    let provider = registry.find_provider(&svn).unwrap();
    let err = provider.resolve_revision(&svn, "").await.unwrap_err();
    assert!(err.to_string().contains("svn"));

    let git = path("code.google.com/p/newproj");
    let resolution = provider.resolve_revision(&git, "").await.unwrap();
    assert_eq!(resolution.revision, "f00dfeed");
    assert_eq!(
        provider.archive_url(&resolution).unwrap(),
        format!("{}/gc/newproj.googlecode.com/archive/f00dfeed.zip", server.base_url())
    );
}

#[tokio::test]
async fn gopkg_selects_greatest_matching_ref() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }
    let refs = [
        "001e# service=git-upload-pack\n0000",
        "003f1111111111111111111111111111111111111111 refs/heads/master\n",
        "003b2222222222222222222222222222222222222222 refs/heads/v2\n",
        "003f3333333333333333333333333333333333333333 refs/tags/v2.0.1\n",
        "003f4444444444444444444444444444444444444444 refs/tags/v2.1.0\n",
        "0000",
    ]
    .concat();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET)
            .path("/go-yaml/yaml.git/info/refs")
            .query_param("service", "git-upload-pack");
        then.status(200).body(refs);
    });

    let (registry, _) = registry_for(&server);
    let import_path = registry.normalize(&path("gopkg.in/yaml.v2/sub"));
    assert_eq!(import_path.as_str(), "gopkg.in/go-yaml/yaml.v2");
    let provider = registry.find_provider(&import_path).unwrap();
    let resolution = provider.resolve_revision(&import_path, "").await.unwrap();
    assert_eq!(resolution.revision, "4444444444444444444444444444444444444444");
    assert_eq!(resolution.download_path.as_str(), "github.com/go-yaml/yaml");
}

#[tokio::test]
async fn failed_download_leaves_no_object() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/owner/repo/commits/master");
        then.status(200).body(commits_page(SHA));
    });
    server.mock(|when, then| {
        when.method(GET).path(format!("/owner/repo/archive/{SHA}.zip"));
        then.status(502).body("bad gateway");
    });

    let (registry, fetcher) = registry_for(&server);
    let import_path = path("github.com/owner/repo");
    let provider = registry.find_provider(&import_path).unwrap();
    let resolution = provider.resolve_revision(&import_path, "").await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let hot = FilesystemBackend::new(dir.path()).await.unwrap();
    let key = ArchiveLayout::local_key(&import_path, SHA, ".zip");
    let err = fetcher
        .fetch(provider.as_ref(), &resolution, &hot, &key)
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::ArchiveDownloadFailed { .. }));
    assert!(!hot.exists(&key).await.unwrap());

    let package_dir = dir.path().join("github.com/owner/repo");
    let leftovers = std::fs::read_dir(&package_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}
