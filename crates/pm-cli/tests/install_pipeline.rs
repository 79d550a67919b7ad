//! End-to-end install batches against a mock package server.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{Fixture, archive, archive_with, sha256_hex, signing_key, transcript};
use pm_cli::ops::{Context, InstallError, InstallOptions, InstallReport, PackageStatus, install};
use pm_core::catalog::{AvailableDb, Catalog, ResolveError};
use pm_core::io::download::{FetchOptions, Fetcher};
use pm_core::store::Store;
use pm_core::trust::Keyring;
use pm_core::verify::VerifyError;
use pm_core::{ErrorKind, NullReporter, Reporter, Stage};
use pm_schema::{PackageId, PackageMeta, PackageName, Version};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct CountingReporter {
    digests: AtomicUsize,
}

impl Reporter for CountingReporter {
    fn resolved(&self, _: &[PackageMeta]) {}
    fn stage(&self, _: &PackageId, _: Stage) {}
    fn downloading(&self, _: &PackageId, _: u64, _: Option<u64>) {}
    fn digesting(&self, _: &PackageId, _: &str) {
        self.digests.fetch_add(1, Ordering::SeqCst);
    }
    fn done(&self, _: &PackageId, _: &str) {}
    fn failed(&self, _: &PackageId, _: &str) {}
    fn warning(&self, _: &str) {}
    fn summary(&self, _: usize, _: usize, _: f64) {}
}

fn context(fixture: &Fixture, reporter: Arc<dyn Reporter>) -> Context {
    let catalog = AvailableDb::load(&fixture.layout().available_db()).unwrap();
    context_with(fixture, Arc::new(catalog), reporter)
}

fn context_with(
    fixture: &Fixture,
    catalog: Arc<dyn Catalog>,
    reporter: Arc<dyn Reporter>,
) -> Context {
    let layout = fixture.layout();
    let keyring = Keyring::load(&layout.keyring_dir()).unwrap();
    let fetcher = Fetcher::with_timeout(
        Duration::from_secs(10),
        FetchOptions {
            retries: 0,
            backoff: Duration::from_millis(1),
            ..FetchOptions::default()
        },
    )
    .unwrap();
    Context::new(layout, catalog, Arc::new(keyring), fetcher, reporter)
}

fn requests(names: &[&str]) -> Vec<String> {
    names.iter().map(ToString::to_string).collect()
}

const FOO: &[u8] = b"#!/bin/sh\necho foo\n";

#[tokio::test]
async fn installs_trusted_package() {
    let mut server = mockito::Server::new_async().await;
    let fixture = Fixture::new();
    let body = archive(&fixture.key, &[("bin/foo", FOO)]);
    let mock = server
        .mock("GET", "/foo-1.0.tar")
        .with_body(body)
        .expect(1)
        .create_async()
        .await;
    fixture.write_available(&[("foo", "1.0", format!("{}/foo-1.0.tar", server.url()))]);

    let ctx = context(&fixture, Arc::new(NullReporter));
    let report = install(
        &ctx,
        &requests(&["foo"]),
        InstallOptions::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    mock.assert_async().await;
    assert!(report.is_success());
    assert_eq!(report.installed_count(), 1);
    match &report.outcomes[0].status {
        PackageStatus::Installed(record) => {
            assert_eq!(record.id.as_str(), "foo-1.0");
            assert_eq!(record.generation, 1);
            assert_eq!(record.files, 1);
        }
        other => panic!("unexpected status: {other:?}"),
    }

    let live = fixture.layout().installed_dir().join("foo-1.0").join("bin/foo");
    assert_eq!(std::fs::read(live).unwrap(), FOO);
}

#[tokio::test]
async fn reinstall_creates_new_generation() {
    let mut server = mockito::Server::new_async().await;
    let fixture = Fixture::new();
    let body = archive(&fixture.key, &[("bin/foo", FOO)]);
    let _mock = server
        .mock("GET", "/foo-1.0.tar")
        .with_body(body)
        .expect(2)
        .create_async()
        .await;
    fixture.write_available(&[("foo", "1.0", format!("{}/foo-1.0.tar", server.url()))]);

    let ctx = context(&fixture, Arc::new(NullReporter));
    let cancel = CancellationToken::new();
    for _ in 0..2 {
        let report = install(&ctx, &requests(&["foo"]), InstallOptions::default(), &cancel)
            .await
            .unwrap();
        assert!(report.is_success());
    }

    let store = Store::new(fixture.layout());
    let id = PackageId::parse("foo-1.0").unwrap();
    assert_eq!(store.live_generation(&id), Some(2));
}

#[tokio::test]
async fn tampered_content_is_not_committed() {
    let mut server = mockito::Server::new_async().await;
    let fixture = Fixture::new();
    // Manifest and signature describe FOO, the archive carries something else.
    let body = archive_with(
        &fixture.key,
        &transcript(&[("bin/foo", FOO)]),
        &[("bin/foo", b"#!/bin/sh\nrm -rf ~\n")],
    );
    let _mock = server
        .mock("GET", "/foo-1.0.tar")
        .with_body(body)
        .create_async()
        .await;
    fixture.write_available(&[("foo", "1.0", format!("{}/foo-1.0.tar", server.url()))]);

    let ctx = context(&fixture, Arc::new(NullReporter));
    let report = install(
        &ctx,
        &requests(&["foo"]),
        InstallOptions::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.failed_count(), 1);
    let err = report.failures().next().unwrap();
    assert_eq!(err.kind(), ErrorKind::Content);
    assert_eq!(err.stage(), Stage::VerifyingContent);
    assert_eq!(err.package().map(PackageId::as_str), Some("foo-1.0"));
    assert!(!err.is_retryable());

    assert!(!fixture.layout().installed_dir().join("foo-1.0").exists());
}

#[tokio::test]
async fn untrusted_signer_stops_before_hashing() {
    let mut server = mockito::Server::new_async().await;
    let fixture = Fixture::new();
    let body = archive(&signing_key(9), &[("bin/foo", FOO)]);
    let _mock = server
        .mock("GET", "/foo-1.0.tar")
        .with_body(body)
        .create_async()
        .await;
    fixture.write_available(&[("foo", "1.0", format!("{}/foo-1.0.tar", server.url()))]);

    let reporter = Arc::new(CountingReporter::default());
    let ctx = context(&fixture, reporter.clone());
    let report = install(
        &ctx,
        &requests(&["foo"]),
        InstallOptions::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let err = report.failures().next().unwrap();
    assert_eq!(err.kind(), ErrorKind::Trust);
    assert_eq!(err.stage(), Stage::VerifyingTrust);
    assert_eq!(reporter.digests.load(Ordering::SeqCst), 0);
    assert!(!fixture.layout().installed_dir().join("foo-1.0").exists());
}

#[tokio::test]
async fn keeps_going_past_failed_download() {
    let mut server = mockito::Server::new_async().await;
    let fixture = Fixture::new();
    let _foo = server
        .mock("GET", "/foo-1.0.tar")
        .with_body(archive(&fixture.key, &[("bin/foo", FOO)]))
        .create_async()
        .await;
    let _bar = server
        .mock("GET", "/bar-2.0.tar")
        .with_status(404)
        .create_async()
        .await;
    fixture.write_available(&[
        ("foo", "1.0", format!("{}/foo-1.0.tar", server.url())),
        ("bar", "2.0", format!("{}/bar-2.0.tar", server.url())),
    ]);

    let ctx = context(&fixture, Arc::new(NullReporter));
    let report = install(
        &ctx,
        &requests(&["foo", "bar"]),
        InstallOptions::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.installed_count(), 1);
    assert!(matches!(report.outcomes[0].status, PackageStatus::Installed(_)));

    let err = report.failures().next().unwrap();
    assert_eq!(err.package().map(PackageId::as_str), Some("bar-2.0"));
    assert_eq!(err.stage(), Stage::Fetching);
    assert_eq!(err.kind(), ErrorKind::Transport);
}

#[tokio::test]
async fn fail_fast_returns_first_failure() {
    let mut server = mockito::Server::new_async().await;
    let fixture = Fixture::new();
    let _foo = server
        .mock("GET", "/foo-1.0.tar")
        .with_body(archive(&fixture.key, &[("bin/foo", FOO)]))
        .create_async()
        .await;
    let _bar = server
        .mock("GET", "/bar-2.0.tar")
        .with_status(404)
        .create_async()
        .await;
    fixture.write_available(&[
        ("foo", "1.0", format!("{}/foo-1.0.tar", server.url())),
        ("bar", "2.0", format!("{}/bar-2.0.tar", server.url())),
    ]);

    let ctx = context(&fixture, Arc::new(NullReporter));
    let options = InstallOptions {
        fail_fast: true,
        ..InstallOptions::default()
    };
    let err = install(&ctx, &requests(&["foo", "bar"]), options, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.package().map(PackageId::as_str), Some("bar-2.0"));
    assert_eq!(err.kind(), ErrorKind::Transport);
}

#[tokio::test]
async fn unknown_package_aborts_before_network() {
    let mut server = mockito::Server::new_async().await;
    let fixture = Fixture::new();
    let mock = server
        .mock("GET", "/foo-1.0.tar")
        .expect(0)
        .create_async()
        .await;
    fixture.write_available(&[("foo", "1.0", format!("{}/foo-1.0.tar", server.url()))]);

    let ctx = context(&fixture, Arc::new(NullReporter));
    let err = install(
        &ctx,
        &requests(&["foo", "nope"]),
        InstallOptions::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Resolution);
    assert_eq!(err.stage(), Stage::Resolving);
    assert!(err.to_string().contains("nope"));
    mock.assert_async().await;
    assert!(!fixture.layout().cache_dir().exists());
}

#[tokio::test]
async fn dry_run_only_plans() {
    let mut server = mockito::Server::new_async().await;
    let fixture = Fixture::new();
    let mock = server
        .mock("GET", "/foo-1.0.tar")
        .expect(0)
        .create_async()
        .await;
    fixture.write_available(&[("foo", "1.0", format!("{}/foo-1.0.tar", server.url()))]);

    let ctx = context(&fixture, Arc::new(NullReporter));
    let options = InstallOptions {
        dry_run: true,
        ..InstallOptions::default()
    };
    let report = install(&ctx, &requests(&["foo"]), options, &CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(report.outcomes[0].status, PackageStatus::Planned));
    mock.assert_async().await;
    assert!(!fixture.layout().cache_dir().exists());
    assert!(!fixture.layout().installed_dir().exists());
}

#[tokio::test]
async fn cancelled_batch_commits_nothing() {
    let mut server = mockito::Server::new_async().await;
    let fixture = Fixture::new();
    let _mock = server
        .mock("GET", "/foo-1.0.tar")
        .with_body(archive(&fixture.key, &[("bin/foo", FOO)]))
        .create_async()
        .await;
    fixture.write_available(&[("foo", "1.0", format!("{}/foo-1.0.tar", server.url()))]);

    let ctx = context(&fixture, Arc::new(NullReporter));
    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = install(&ctx, &requests(&["foo"]), InstallOptions::default(), &cancel)
        .await
        .unwrap();

    let err = report.failures().next().unwrap();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(!fixture.layout().installed_dir().join("foo-1.0").exists());
}

/// Serve `body` as foo-1.0 and install it.
async fn install_foo(fixture: &Fixture, body: Vec<u8>) -> InstallReport {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/foo-1.0.tar")
        .with_body(body)
        .create_async()
        .await;
    fixture.write_available(&[("foo", "1.0", format!("{}/foo-1.0.tar", server.url()))]);

    let ctx = context(fixture, Arc::new(NullReporter));
    install(
        &ctx,
        &requests(&["foo"]),
        InstallOptions::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap()
}

/// The content-stage cause of foo-1.0's failure, after checking that
/// nothing went live.
fn content_failure(fixture: &Fixture, report: InstallReport) -> VerifyError {
    let id = PackageId::parse("foo-1.0").unwrap();
    assert_eq!(Store::new(fixture.layout()).live_generation(&id), None);
    assert!(!fixture.layout().installed_dir().join("foo-1.0").exists());

    let err = match report.outcomes.into_iter().next().unwrap().status {
        PackageStatus::Failed(err) => err,
        other => panic!("unexpected status: {other:?}"),
    };
    assert_eq!(err.stage(), Stage::VerifyingContent);
    assert_eq!(err.kind(), ErrorKind::Content);
    match err {
        InstallError::Content { source, .. } => source,
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn flipped_manifest_digest_is_rejected() {
    let fixture = Fixture::new();
    let mut digest = sha256_hex(FOO);
    let flipped = if digest.starts_with('0') { "1" } else { "0" };
    digest.replace_range(..1, flipped);
    let manifest = format!("{digest}\tbin/foo\n");
    let body = archive_with(&fixture.key, manifest.as_bytes(), &[("bin/foo", FOO)]);

    let report = install_foo(&fixture, body).await;
    match content_failure(&fixture, report) {
        VerifyError::ChecksumMismatch { path, .. } => assert_eq!(path, "bin/foo"),
        other => panic!("unexpected cause: {other}"),
    }
}

#[tokio::test]
async fn removed_declared_file_is_rejected() {
    let fixture = Fixture::new();
    let body = archive_with(&fixture.key, &transcript(&[("bin/foo", FOO)]), &[]);

    let report = install_foo(&fixture, body).await;
    match content_failure(&fixture, report) {
        VerifyError::MissingDeclaredFile { paths } => assert_eq!(paths, vec!["bin/foo"]),
        other => panic!("unexpected cause: {other}"),
    }
}

#[tokio::test]
async fn extra_file_is_rejected() {
    let fixture = Fixture::new();
    let body = archive_with(
        &fixture.key,
        &transcript(&[("bin/foo", FOO)]),
        &[("bin/foo", FOO), ("bin/bar", b"#!/bin/sh\necho bar\n")],
    );

    let report = install_foo(&fixture, body).await;
    match content_failure(&fixture, report) {
        VerifyError::UndeclaredFile { path } => assert_eq!(path, "bin/bar"),
        other => panic!("unexpected cause: {other}"),
    }
}

/// Catalog that hands back a fixed batch, whatever was requested.
struct FixedCatalog(Vec<PackageMeta>);

impl Catalog for FixedCatalog {
    fn installable(&self, _: &[String]) -> Result<Vec<PackageMeta>, ResolveError> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn colliding_ids_abort_before_network() {
    let mut server = mockito::Server::new_async().await;
    let fixture = Fixture::new();
    let mock = server
        .mock("GET", mockito::Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let meta = |url: &str| {
        PackageMeta::new(
            PackageName::new("foo-bar").unwrap(),
            Version::new("1").unwrap(),
            format!("{}/{url}", server.url()),
        )
    };
    let catalog = FixedCatalog(vec![meta("a.tar"), meta("b.tar")]);
    let ctx = context_with(&fixture, Arc::new(catalog), Arc::new(NullReporter));

    let err = install(
        &ctx,
        &requests(&["foo-bar", "foo-bar"]),
        InstallOptions::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        &err,
        InstallError::Resolution(ResolveError::DuplicateId { id }) if id.as_str() == "foo-bar-1"
    ));
    assert_eq!(err.kind(), ErrorKind::Resolution);
    mock.assert_async().await;
    assert!(!fixture.layout().cache_dir().exists());
}

#[tokio::test]
async fn dashed_version_request_is_invalid() {
    let fixture = Fixture::new();
    fixture.write_available(&[("foo-bar", "1", "https://example.invalid/a".to_string())]);

    let ctx = context(&fixture, Arc::new(NullReporter));
    let err = install(
        &ctx,
        &requests(&["foo@bar-1"]),
        InstallOptions::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        InstallError::Resolution(ResolveError::InvalidRequest { .. })
    ));
}
