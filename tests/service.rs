use async_trait::async_trait;
use skiff_core::archive::{Archive, ZIP};
use skiff_core::feature::{Compress, Headers, ListService};
use skiff_core::listener::{
    DisabledProgressListener, DisabledTranscriptListener, ProgressListener, TranscriptListener,
};
use skiff_core::metadata::MetadataOverwrite;
use skiff_core::{
    AttributedList, BackgroundError, BackgroundResult, ConnectionState, ErrorKind, Feature,
    FeatureKind, FeatureType, Host, Path, PathAttributes, PathType, Protocol, ProtocolCatalog,
    Session, SessionContext, SessionCore, SessionFactory, SessionId,
};
use skiff_lib::{SessionService, SessionServiceState};
use skiff_vault::Vault;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Calls = Arc<Mutex<Vec<String>>>;

/// Headers, listing and compression over an in-memory tree. Every call is
/// recorded as `<name>:<op>:<path>`.
struct Remote {
    name: &'static str,
    calls: Calls,
    written: Arc<Mutex<Vec<(String, BTreeMap<String, String>)>>>,
    children: HashMap<String, Vec<Path>>,
}

impl Remote {
    fn record(&self, op: &str, path: &Path) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{}:{}:{}", self.name, op, path.absolute()));
    }
}

#[async_trait]
impl Headers for Remote {
    async fn get_metadata(&self, file: &Path) -> BackgroundResult<BTreeMap<String, String>> {
        self.record("get", file);
        Ok(file.attributes().metadata.clone())
    }

    async fn set_metadata(
        &self,
        file: &Path,
        metadata: &BTreeMap<String, String>,
    ) -> BackgroundResult<()> {
        self.record("set", file);
        self.written
            .lock()
            .unwrap()
            .push((file.absolute().to_string(), metadata.clone()));
        Ok(())
    }
}

#[async_trait]
impl ListService for Remote {
    async fn list(
        &self,
        directory: &Path,
        _listener: &dyn ProgressListener,
    ) -> BackgroundResult<AttributedList> {
        self.record("list", directory);
        Ok(self
            .children
            .get(directory.absolute())
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl Compress for Remote {
    async fn archive(
        &self,
        _archive: &Archive,
        workdir: &Path,
        _files: &[Path],
        _listener: &dyn ProgressListener,
        _transcript: &dyn TranscriptListener,
    ) -> BackgroundResult<()> {
        self.record("archive", workdir);
        Ok(())
    }

    async fn unarchive(
        &self,
        _archive: &Archive,
        file: &Path,
        _listener: &dyn ProgressListener,
        _transcript: &dyn TranscriptListener,
    ) -> BackgroundResult<()> {
        self.record("unarchive", file);
        Ok(())
    }
}

struct MemorySession {
    core: SessionCore,
    remote: Arc<Remote>,
    headers: bool,
    liveness_failures: Arc<AtomicUsize>,
}

#[async_trait]
impl Session for MemorySession {
    fn core(&self) -> &SessionCore {
        &self.core
    }

    async fn connect(&self) -> BackgroundResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.core.will_open();
        self.core.did_open();
        Ok(())
    }

    async fn probe(&self) -> BackgroundResult<()> {
        let failing = self
            .liveness_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BackgroundError::transport("connection reset"));
        }
        Ok(())
    }

    async fn close(&self) {
        self.core.will_close();
        self.core.did_close();
    }

    async fn interrupt(&self) {
        self.core.interrupted();
        self.core.will_close();
        self.core.did_close();
    }

    fn lookup(&self, kind: FeatureKind) -> Option<Feature> {
        match kind {
            FeatureKind::Headers if self.headers => Some(<dyn Headers>::wrap(self.remote.clone())),
            FeatureKind::List => Some(<dyn ListService>::wrap(self.remote.clone())),
            FeatureKind::Compress => Some(<dyn Compress>::wrap(self.remote.clone())),
            _ => None,
        }
    }

    async fn workdir(&self) -> BackgroundResult<Path> {
        Ok(self.core.cached_workdir().unwrap_or_else(Path::root))
    }
}

struct MemoryFactory {
    remote: Arc<Remote>,
    headers: bool,
    liveness_failures: Arc<AtomicUsize>,
}

impl SessionFactory for MemoryFactory {
    fn create(&self, host: Host, context: SessionContext) -> BackgroundResult<Arc<dyn Session>> {
        Ok(Arc::new(MemorySession {
            core: SessionCore::new(host, context),
            remote: self.remote.clone(),
            headers: self.headers,
            liveness_failures: self.liveness_failures.clone(),
        }))
    }
}

/// Vault whose headers and compression are served by its own recorder.
#[derive(Debug)]
struct RecordingVault {
    home: Path,
    calls: Calls,
    written: Arc<Mutex<Vec<(String, BTreeMap<String, String>)>>>,
    closed: Arc<AtomicBool>,
}

impl Vault for RecordingVault {
    fn home(&self) -> &Path {
        &self.home
    }

    fn feature(&self, _session: &SessionId, kind: FeatureKind, inner: Feature) -> Feature {
        let remote = Arc::new(Remote {
            name: "vault",
            calls: self.calls.clone(),
            written: self.written.clone(),
            children: HashMap::new(),
        });
        match kind {
            FeatureKind::Headers => Feature::Headers(remote),
            FeatureKind::Compress => Feature::Compress(remote),
            _ => inner,
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct Fixture {
    service: SessionServiceState,
    liveness_failures: Arc<AtomicUsize>,
    calls: Calls,
    written: Arc<Mutex<Vec<(String, BTreeMap<String, String>)>>>,
}

fn dir(p: &str) -> Path {
    Path::new(p, PathType::DIRECTORY)
}

fn file(p: &str) -> Path {
    Path::new(p, PathType::FILE)
}

fn tree() -> HashMap<String, Vec<Path>> {
    HashMap::from([
        ("/".to_string(), vec![dir("/bucket")]),
        (
            "/bucket/dir".to_string(),
            vec![file("/bucket/dir/one.txt"), file("/bucket/dir/two.txt")],
        ),
    ])
}

fn fixture(headers: bool) -> Fixture {
    let calls = Calls::default();
    let written = Arc::new(Mutex::new(Vec::new()));
    let remote = Arc::new(Remote {
        name: "remote",
        calls: calls.clone(),
        written: written.clone(),
        children: tree(),
    });
    let liveness_failures = Arc::new(AtomicUsize::new(0));
    let mut catalog = ProtocolCatalog::new();
    catalog.register(
        Protocol::S3,
        Arc::new(MemoryFactory {
            remote,
            headers,
            liveness_failures: liveness_failures.clone(),
        }),
    );
    Fixture {
        service: SessionService::new(catalog, SessionContext::default()),
        liveness_failures,
        calls,
        written,
    }
}

fn overwrite(path: Path, values: &[(&str, &str)]) -> MetadataOverwrite {
    MetadataOverwrite::for_path(
        path,
        values
            .iter()
            .map(|(k, v)| (k.to_string(), Some(v.to_string())))
            .collect(),
    )
}

fn metadata(values: &[(&str, &str)]) -> BTreeMap<String, String> {
    values
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn connect_reports_open_session() {
    let fixture = fixture(true);
    let mut service = fixture.service.lock().await;
    let id = service
        .connect(Host::new(Protocol::S3, "memory.example"))
        .await
        .unwrap();

    let info = service.info(&id).unwrap();
    assert_eq!(info.protocol, Protocol::S3);
    assert_eq!(info.hostname, "memory.example");
    assert_eq!(info.state, ConnectionState::Open);
    assert_eq!(service.list_sessions(), vec![info]);
    assert_eq!(service.protocols(), vec![Protocol::S3]);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let fixture = fixture(true);
    let mut service = fixture.service.lock().await;
    let id = SessionId::from("nope");
    assert_eq!(service.info(&id).unwrap_err().kind, ErrorKind::NotFound);
    assert_eq!(service.close(&id).await.unwrap_err().kind, ErrorKind::NotFound);
    assert_eq!(
        service.feature(&id, FeatureKind::List).unwrap_err().kind,
        ErrorKind::NotFound
    );
}

#[tokio::test]
async fn feature_availability_follows_lookup() {
    let fixture = fixture(false);
    let mut service = fixture.service.lock().await;
    let id = service.connect(Host::new(Protocol::S3, "memory")).await.unwrap();

    assert!(service.feature(&id, FeatureKind::List).unwrap());
    assert!(service.feature(&id, FeatureKind::Compress).unwrap());
    assert!(!service.feature(&id, FeatureKind::Headers).unwrap());
    assert!(!service.feature(&id, FeatureKind::Quota).unwrap());

    let err = service
        .write_metadata(&id, overwrite(file("/bucket/a.txt"), &[("A", "1")]), false)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Unsupported);
}

#[tokio::test]
async fn list_and_workdir_pass_through_session() {
    let fixture = fixture(true);
    let mut service = fixture.service.lock().await;
    let id = service.connect(Host::new(Protocol::S3, "memory")).await.unwrap();

    let workdir = service.workdir(&id).await.unwrap();
    assert!(workdir.is_root());
    let listing = service
        .list(&id, &workdir, &DisabledProgressListener)
        .await
        .unwrap();
    assert_eq!(listing, vec![dir("/bucket")]);
    assert_eq!(*fixture.calls.lock().unwrap(), vec!["remote:list:/"]);
}

#[tokio::test]
async fn new_keys_are_written_in_one_call() {
    let fixture = fixture(true);
    let mut service = fixture.service.lock().await;
    let id = service.connect(Host::new(Protocol::S3, "memory")).await.unwrap();

    let done = service
        .write_metadata(
            &id,
            overwrite(file("/bucket/a.txt"), &[("A", "1"), ("B", "2")]),
            false,
        )
        .await
        .unwrap();

    assert!(done);
    assert_eq!(
        *fixture.written.lock().unwrap(),
        vec![("/bucket/a.txt".to_string(), metadata(&[("A", "1"), ("B", "2")]))]
    );
}

#[tokio::test]
async fn unchanged_metadata_is_not_written() {
    let fixture = fixture(true);
    let mut service = fixture.service.lock().await;
    let id = service.connect(Host::new(Protocol::S3, "memory")).await.unwrap();

    let current = file("/bucket/a.txt").with_attributes(PathAttributes {
        metadata: metadata(&[("A", "1"), ("B", "2")]),
        ..PathAttributes::default()
    });
    service
        .write_metadata(&id, overwrite(current, &[("A", "1"), ("B", "2")]), false)
        .await
        .unwrap();

    assert!(fixture.written.lock().unwrap().is_empty());
}

#[tokio::test]
async fn recursion_reaches_children_only_when_asked() {
    let fixture = fixture(true);
    let mut service = fixture.service.lock().await;
    let id = service.connect(Host::new(Protocol::S3, "memory")).await.unwrap();

    service
        .write_metadata(&id, overwrite(dir("/bucket/dir"), &[("A", "1")]), false)
        .await
        .unwrap();
    assert_eq!(fixture.written.lock().unwrap().len(), 1);

    fixture.written.lock().unwrap().clear();
    service
        .write_metadata(&id, overwrite(dir("/bucket/dir"), &[("A", "1")]), true)
        .await
        .unwrap();
    let written: Vec<String> = fixture
        .written
        .lock()
        .unwrap()
        .iter()
        .map(|(path, _)| path.clone())
        .collect();
    assert_eq!(
        written,
        vec!["/bucket/dir", "/bucket/dir/one.txt", "/bucket/dir/two.txt"]
    );
}

#[tokio::test]
async fn metadata_inside_vault_goes_to_vault() {
    let fixture = fixture(true);
    let mut service = fixture.service.lock().await;
    let id = service.connect(Host::new(Protocol::S3, "memory")).await.unwrap();
    let vault_written = Arc::new(Mutex::new(Vec::new()));
    service
        .add_vault(
            &id,
            Arc::new(RecordingVault {
                home: dir("/bucket/secret"),
                calls: fixture.calls.clone(),
                written: vault_written.clone(),
                closed: Arc::new(AtomicBool::new(false)),
            }),
        )
        .unwrap();

    service
        .write_metadata(&id, overwrite(file("/bucket/secret/doc.txt"), &[("A", "1")]), false)
        .await
        .unwrap();
    service
        .write_metadata(&id, overwrite(file("/bucket/public.txt"), &[("A", "1")]), false)
        .await
        .unwrap();

    assert_eq!(
        *vault_written.lock().unwrap(),
        vec![("/bucket/secret/doc.txt".to_string(), metadata(&[("A", "1")]))]
    );
    assert_eq!(
        *fixture.written.lock().unwrap(),
        vec![("/bucket/public.txt".to_string(), metadata(&[("A", "1")]))]
    );
}

#[tokio::test]
async fn archive_without_vaults_reaches_session() {
    let fixture = fixture(true);
    let mut service = fixture.service.lock().await;
    let id = service.connect(Host::new(Protocol::S3, "memory")).await.unwrap();
    assert!(service.registry().is_empty());

    let session = service.session(&id).unwrap();
    let compress = <dyn Compress>::unwrap(session.feature(FeatureKind::Compress).unwrap()).unwrap();
    let files = vec![file("/work/a.txt"), file("/work/b.txt")];
    compress
        .archive(
            &ZIP,
            &dir("/work"),
            &files,
            &DisabledProgressListener,
            &DisabledTranscriptListener,
        )
        .await
        .unwrap();

    assert_eq!(*fixture.calls.lock().unwrap(), vec!["remote:archive:/work"]);
}

#[tokio::test]
async fn close_deregisters_vaults() {
    let fixture = fixture(true);
    let mut service = fixture.service.lock().await;
    let first = service.connect(Host::new(Protocol::S3, "one")).await.unwrap();
    let second = service.connect(Host::new(Protocol::S3, "two")).await.unwrap();
    let closed = Arc::new(AtomicBool::new(false));
    let vault = |home: &str, closed: Arc<AtomicBool>| {
        Arc::new(RecordingVault {
            home: dir(home),
            calls: fixture.calls.clone(),
            written: Arc::new(Mutex::new(Vec::new())),
            closed,
        })
    };
    service
        .add_vault(&first, vault("/bucket/secret", closed.clone()))
        .unwrap();
    service
        .add_vault(&second, vault("/bucket/secret", Arc::new(AtomicBool::new(false))))
        .unwrap();
    assert_eq!(service.registry().len(), 2);

    let session = service.session(&first).unwrap();
    service.close(&first).await.unwrap();

    assert!(closed.load(Ordering::SeqCst));
    assert_eq!(session.state(), ConnectionState::Closed);
    assert_eq!(service.registry().len(), 1);
    assert_eq!(service.info(&first).unwrap_err().kind, ErrorKind::NotFound);

    service.close_all().await;
    assert!(service.registry().is_empty());
    assert!(service.list_sessions().is_empty());
}

#[tokio::test]
async fn vault_survives_reconnect_after_failed_check() {
    let fixture = fixture(true);
    let mut service = fixture.service.lock().await;
    let id = service.connect(Host::new(Protocol::S3, "memory")).await.unwrap();
    let vault_written = Arc::new(Mutex::new(Vec::new()));
    let closed = Arc::new(AtomicBool::new(false));
    service
        .add_vault(
            &id,
            Arc::new(RecordingVault {
                home: dir("/bucket/secret"),
                calls: fixture.calls.clone(),
                written: vault_written.clone(),
                closed: closed.clone(),
            }),
        )
        .unwrap();

    fixture.liveness_failures.store(1, Ordering::SeqCst);
    service
        .write_metadata(&id, overwrite(file("/bucket/secret/file"), &[("A", "1")]), false)
        .await
        .unwrap();

    assert_eq!(fixture.liveness_failures.load(Ordering::SeqCst), 0);
    assert_eq!(service.registry().len(), 1);
    assert!(!closed.load(Ordering::SeqCst));
    assert_eq!(
        *vault_written.lock().unwrap(),
        vec![("/bucket/secret/file".to_string(), metadata(&[("A", "1")]))]
    );
    assert!(fixture.written.lock().unwrap().is_empty());
}
