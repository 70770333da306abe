use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use otapkg_client::error::TransferError;
use otapkg_client::transfer::{BoxFuture, Credentials, ResourceFetcher, TransferListener, TransferRequest};
use otapkg_core::types::{SuiteName, SuiteVersion, VendorName};
use otapkg_installer::archive::{write_archive, MANIFEST_PATH};
use otapkg_installer::error::InstallError;
use otapkg_installer::installer::{Installer, InstallerConfig};
use otapkg_installer::listener::{AcceptAllListener, Advisory, DownloadSummary, InstallListener};
use otapkg_installer::request::{InstallRequest, InstallSource};
use otapkg_installer::store::{InMemoryPackageStore, PackageStore};
use otapkg_notify::queue::{NotificationQueue, StatusPoster};
use otapkg_x509::store::InMemoryTrustStore;

const DESCRIPTOR_URL: &str = "http://pkg.example.com/chess.odd";
const ARCHIVE_URL: &str = "http://pkg.example.com/chess.pkg";
const NOTIFY_URL: &str = "http://pkg.example.com/notify";

/// Serves canned bodies by URL and records every fetch.
#[derive(Default)]
struct FakeFetcher {
    responses: HashMap<String, Vec<u8>>,
    fetched: Mutex<Vec<String>>,
}

impl FakeFetcher {
    fn with(mut self, url: &str, body: Vec<u8>) -> Self {
        self.responses.insert(url.to_owned(), body);
        self
    }

    fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

impl ResourceFetcher for FakeFetcher {
    fn fetch<'a>(
        &'a self,
        request: &'a TransferRequest,
        _listener: &'a dyn TransferListener,
        _cancel: &'a AtomicBool,
    ) -> BoxFuture<'a, Result<Vec<u8>, TransferError>> {
        self.fetched.lock().unwrap().push(request.url.clone());
        let body = self.responses.get(&request.url).cloned();
        Box::pin(async move { body.ok_or_else(|| TransferError::ResourceNotFound(request.url.clone())) })
    }
}

/// Records every posted body and always succeeds.
#[derive(Default)]
struct RecordingPoster {
    bodies: Mutex<Vec<(String, String)>>,
}

impl RecordingPoster {
    fn bodies(&self) -> Vec<(String, String)> {
        self.bodies.lock().unwrap().clone()
    }
}

impl StatusPoster for RecordingPoster {
    fn post<'a>(&'a self, url: &'a str, body: &'a str) -> BoxFuture<'a, Result<(), TransferError>> {
        self.bodies.lock().unwrap().push((url.to_owned(), body.to_owned()));
        Box::pin(async { Ok(()) })
    }
}

/// Approves everything except the archive-download confirmation.
#[derive(Default)]
struct DenyDownloadListener;

impl InstallListener for DenyDownloadListener {
    fn warn<'a>(&'a self, _advisory: &'a Advisory) -> BoxFuture<'a, bool> {
        Box::pin(async { true })
    }
    fn confirm_download<'a>(&'a self, _summary: &'a DownloadSummary) -> BoxFuture<'a, bool> {
        Box::pin(async { false })
    }
    fn confirm_auth_path<'a>(&'a self, _names: &'a [String]) -> BoxFuture<'a, bool> {
        Box::pin(async { true })
    }
    fn confirm_redirect<'a>(&'a self, _from: &'a str, _to: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async { true })
    }
    fn keep_data<'a>(&'a self, _suite: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async { true })
    }
    fn provide_credentials<'a>(
        &'a self,
        _url: &'a str,
        _proxy: bool,
    ) -> BoxFuture<'a, Option<Credentials>> {
        Box::pin(async { None })
    }
}

/// Records advisories and rejects them.
#[derive(Default)]
struct RejectingListener {
    warned: Mutex<Vec<Advisory>>,
}

impl InstallListener for RejectingListener {
    fn warn<'a>(&'a self, advisory: &'a Advisory) -> BoxFuture<'a, bool> {
        self.warned.lock().unwrap().push(advisory.clone());
        Box::pin(async { false })
    }
    fn confirm_download<'a>(&'a self, _summary: &'a DownloadSummary) -> BoxFuture<'a, bool> {
        Box::pin(async { true })
    }
    fn confirm_auth_path<'a>(&'a self, _names: &'a [String]) -> BoxFuture<'a, bool> {
        Box::pin(async { true })
    }
    fn confirm_redirect<'a>(&'a self, _from: &'a str, _to: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async { true })
    }
    fn keep_data<'a>(&'a self, _suite: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async { true })
    }
    fn provide_credentials<'a>(
        &'a self,
        _url: &'a str,
        _proxy: bool,
    ) -> BoxFuture<'a, Option<Credentials>> {
        Box::pin(async { None })
    }
}

fn archive_bytes(manifest: &str) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.pkg");
    write_archive(
        &path,
        &[
            (MANIFEST_PATH, manifest.as_bytes()),
            ("bin/chess", b"\0\0\0\0".as_slice()),
        ],
    )
    .unwrap();
    std::fs::read(&path).unwrap()
}

fn manifest_text(version: &str) -> String {
    format!("Suite-Name: Chess\nSuite-Vendor: Acme\nSuite-Version: {version}\nEntry-1: Main, bin/chess\n")
}

fn descriptor_text(version: &str, archive_len: usize) -> String {
    format!(
        "Suite-Name: Chess\n\
         Suite-Vendor: Acme\n\
         Suite-Version: {version}\n\
         Suite-Archive-URL: {ARCHIVE_URL}\n\
         Suite-Archive-Size: {archive_len}\n\
         Suite-Notify-URL: {NOTIFY_URL}\n\
         Entry-1: Main, bin/chess\n"
    )
}

struct Fixture {
    installer: Installer,
    fetcher: Arc<FakeFetcher>,
    store: Arc<InMemoryPackageStore>,
    poster: Arc<RecordingPoster>,
    #[allow(dead_code)]
    queue_dir: tempfile::TempDir,
}

fn fixture(fetcher: FakeFetcher, listener: Arc<dyn InstallListener>) -> Fixture {
    let queue_dir = tempfile::tempdir().unwrap();
    let queue = NotificationQueue::open(queue_dir.path().join("queue.json"), 3).unwrap();
    let fetcher = Arc::new(fetcher);
    let store = Arc::new(InMemoryPackageStore::new(1024 * 1024));
    let poster = Arc::new(RecordingPoster::default());
    let config = InstallerConfig {
        min_install_secs: 0,
        ..InstallerConfig::default()
    };
    let installer = Installer::new(
        Arc::clone(&fetcher) as Arc<dyn ResourceFetcher>,
        Arc::clone(&store) as Arc<dyn PackageStore>,
        Arc::new(InMemoryTrustStore::new()),
        queue,
        Arc::clone(&poster) as Arc<dyn StatusPoster>,
        config,
    )
    .with_listener(listener);
    Fixture {
        installer,
        fetcher,
        store,
        poster,
        queue_dir,
    }
}

#[tokio::test]
async fn unsigned_install_reaches_done_and_notifies_success_once() {
    let archive = archive_bytes(&manifest_text("1.0"));
    let descriptor = descriptor_text("1.0", archive.len());
    let fetcher = FakeFetcher::default()
        .with(DESCRIPTOR_URL, descriptor.into_bytes())
        .with(ARCHIVE_URL, archive);
    let fx = fixture(fetcher, Arc::new(AcceptAllListener));

    let request = InstallRequest::new(InstallSource::Descriptor(DESCRIPTOR_URL.to_owned()));
    let suite = fx
        .installer
        .install(request, Arc::default())
        .await
        .expect("install succeeds");

    assert_eq!(suite.identity.name.as_str(), "Chess");
    assert_eq!(suite.identity.version, "1.0".parse::<SuiteVersion>().unwrap());
    assert!(!suite.trusted);
    assert_eq!(suite.permissions.len(), 0);

    let listed = fx.store.list().unwrap();
    assert_eq!(listed.len(), 1, "package identity assigned and stored");

    let bodies = fx.poster.bodies();
    assert_eq!(bodies, vec![(NOTIFY_URL.to_owned(), "900 Success".to_owned())]);
}

#[tokio::test]
async fn denied_download_confirmation_aborts_before_archive_fetch() {
    let archive = archive_bytes(&manifest_text("1.0"));
    let descriptor = descriptor_text("1.0", archive.len());
    let fetcher = FakeFetcher::default()
        .with(DESCRIPTOR_URL, descriptor.into_bytes())
        .with(ARCHIVE_URL, archive);
    let fx = fixture(fetcher, Arc::new(DenyDownloadListener));

    let request = InstallRequest::new(InstallSource::Descriptor(DESCRIPTOR_URL.to_owned()));
    let err = fx
        .installer
        .install(request, Arc::default())
        .await
        .expect_err("denied confirmation aborts");

    assert!(matches!(err, InstallError::Cancelled));
    assert_eq!(
        fx.fetcher.fetched(),
        vec![DESCRIPTOR_URL.to_owned()],
        "archive was never fetched"
    );
    assert!(fx.store.list().unwrap().is_empty(), "nothing committed");
    assert_eq!(
        fx.poster.bodies(),
        vec![(NOTIFY_URL.to_owned(), "902 User Cancelled".to_owned())]
    );
}

#[tokio::test]
async fn newer_version_over_installed_yields_advisory_before_archive_fetch() {
    let archive = archive_bytes(&manifest_text("2.0"));
    let descriptor = descriptor_text("2.0", archive.len());
    let fetcher = FakeFetcher::default()
        .with(DESCRIPTOR_URL, descriptor.into_bytes())
        .with(ARCHIVE_URL, archive);
    let listener = Arc::new(RejectingListener::default());
    let fx = fixture(fetcher, Arc::clone(&listener) as Arc<dyn InstallListener>);

    // preinstall version 1.0 of the same (name, vendor)
    let name = SuiteName::new("Chess").unwrap();
    let vendor = VendorName::new("Acme").unwrap();
    let v1: SuiteVersion = "1.0".parse().unwrap();
    let identity = fx.store.create_identity(&name, &vendor, &v1, None).unwrap();
    let previous = otapkg_installer::store::InstalledSuite {
        identity,
        domain: "unidentified".to_owned(),
        trusted: false,
        descriptor_url: Some(DESCRIPTOR_URL.to_owned()),
        archive_url: ARCHIVE_URL.to_owned(),
        properties: otapkg_core::properties::PropertySet::new(),
        permissions: Vec::new(),
        push: Vec::new(),
        signer_serial: None,
        archive_size: 10,
        installed_at: chrono::Utc::now(),
    };
    fx.store.store(&previous, Path::new("/dev/null")).unwrap();

    let request = InstallRequest::new(InstallSource::Descriptor(DESCRIPTOR_URL.to_owned()));
    let err = fx
        .installer
        .install(request, Arc::default())
        .await
        .expect_err("rejected advisory aborts");
    assert!(matches!(err, InstallError::Cancelled));

    let warned = listener.warned.lock().unwrap().clone();
    assert_eq!(warned.len(), 1);
    assert!(
        matches!(&warned[0], Advisory::NewerVersion { installed, offered }
            if *installed == v1 && *offered == "2.0".parse().unwrap()),
        "got {warned:?}"
    );
    assert_eq!(
        fx.fetcher.fetched(),
        vec![DESCRIPTOR_URL.to_owned()],
        "advisory fires before any archive download"
    );
    // the 1.0 record is untouched
    let listed = fx.store.list().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].identity.version, v1);
}

#[tokio::test]
async fn descriptor_manifest_version_mismatch_is_fatal() {
    let archive = archive_bytes(&manifest_text("1.1"));
    let descriptor = descriptor_text("1.0", archive.len());
    let fetcher = FakeFetcher::default()
        .with(DESCRIPTOR_URL, descriptor.into_bytes())
        .with(ARCHIVE_URL, archive);
    let fx = fixture(fetcher, Arc::new(AcceptAllListener));

    let request = InstallRequest::new(InstallSource::Descriptor(DESCRIPTOR_URL.to_owned()));
    let err = fx.installer.install(request, Arc::default()).await.unwrap_err();
    assert!(
        matches!(&err, InstallError::AttributeMismatch { key } if key == "Suite-Version"),
        "got {err}"
    );
    assert!(fx.store.list().unwrap().is_empty());
    assert_eq!(
        fx.poster.bodies(),
        vec![(NOTIFY_URL.to_owned(), "905 Attribute Mismatch".to_owned())]
    );
}

#[tokio::test]
async fn declared_size_mismatch_is_fatal() {
    let archive = archive_bytes(&manifest_text("1.0"));
    let descriptor = descriptor_text("1.0", archive.len() + 7);
    let fetcher = FakeFetcher::default()
        .with(DESCRIPTOR_URL, descriptor.into_bytes())
        .with(ARCHIVE_URL, archive);
    let fx = fixture(fetcher, Arc::new(AcceptAllListener));

    let request = InstallRequest::new(InstallSource::Descriptor(DESCRIPTOR_URL.to_owned()));
    let err = fx.installer.install(request, Arc::default()).await.unwrap_err();
    assert!(matches!(err, InstallError::SizeMismatch { .. }));
}

#[tokio::test]
async fn quota_shortfall_aborts_before_archive_fetch() {
    let archive = archive_bytes(&manifest_text("1.0"));
    let descriptor = descriptor_text("1.0", archive.len());
    let fetcher = FakeFetcher::default()
        .with(DESCRIPTOR_URL, descriptor.clone().into_bytes())
        .with(ARCHIVE_URL, archive);

    let queue_dir = tempfile::tempdir().unwrap();
    let queue = NotificationQueue::open(queue_dir.path().join("q.json"), 3).unwrap();
    let fetcher = Arc::new(fetcher);
    let store = Arc::new(InMemoryPackageStore::new(16)); // far too small
    let poster = Arc::new(RecordingPoster::default());
    let installer = Installer::new(
        Arc::clone(&fetcher) as Arc<dyn ResourceFetcher>,
        store,
        Arc::new(InMemoryTrustStore::new()),
        queue,
        poster,
        InstallerConfig {
            min_install_secs: 0,
            ..InstallerConfig::default()
        },
    )
    .with_listener(Arc::new(AcceptAllListener));

    let request = InstallRequest::new(InstallSource::Descriptor(DESCRIPTOR_URL.to_owned()));
    let err = installer.install(request, Arc::default()).await.unwrap_err();
    assert!(matches!(err, InstallError::InsufficientStorage { .. }));
    assert_eq!(fetcher.fetched(), vec![DESCRIPTOR_URL.to_owned()]);
}

#[tokio::test]
async fn archive_only_install_derives_identity_from_manifest() {
    let archive = archive_bytes(&manifest_text("3.1.4"));
    let fetcher = FakeFetcher::default().with(ARCHIVE_URL, archive);
    let fx = fixture(fetcher, Arc::new(AcceptAllListener));

    let mut request = InstallRequest::new(InstallSource::Archive(ARCHIVE_URL.to_owned()));
    request.provided_name = Some(SuiteName::new("Chess").unwrap());
    let suite = fx.installer.install(request, Arc::default()).await.unwrap();

    assert_eq!(suite.identity.vendor.as_str(), "Acme");
    assert_eq!(
        suite.identity.version,
        "3.1.4".parse::<SuiteVersion>().unwrap()
    );
    assert_eq!(fx.store.list().unwrap().len(), 1);
}

#[tokio::test]
async fn missing_declared_entry_file_is_an_invalid_archive() {
    let manifest = "Suite-Name: Chess\nSuite-Vendor: Acme\nSuite-Version: 1.0\nEntry-1: Main, bin/absent\n";
    let archive = archive_bytes(manifest);
    let descriptor = format!(
        "Suite-Name: Chess\nSuite-Vendor: Acme\nSuite-Version: 1.0\n\
         Suite-Archive-URL: {ARCHIVE_URL}\nSuite-Archive-Size: {}\n",
        archive.len()
    );
    let fetcher = FakeFetcher::default()
        .with(DESCRIPTOR_URL, descriptor.into_bytes())
        .with(ARCHIVE_URL, archive);
    let fx = fixture(fetcher, Arc::new(AcceptAllListener));

    let request = InstallRequest::new(InstallSource::Descriptor(DESCRIPTOR_URL.to_owned()));
    let err = fx.installer.install(request, Arc::default()).await.unwrap_err();
    assert!(matches!(err, InstallError::InvalidArchive(_)), "got {err}");
}
