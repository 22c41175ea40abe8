//! Integration tests for the sync engine.
//!
//! These tests drive the transfer scheduler and the lifecycle engine against
//! an in-memory transport that counts requests per URL and can inject
//! latency and failures:
//! - skip-and-credit accounting and request counts
//! - ordered merge of chunks that complete out of order
//! - retry exhaustion and single attempts on not-found
//! - install / repair / update / uninstall end to end
//! - obsolete-file pruning and delta patching with fallback
//!
//! Run with: `cargo test --test sync_engine`

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;
use tempfile::TempDir;

use gamesync::checksum::{hash_bytes, hash_file};
use gamesync::config::EngineConfig;
use gamesync::lifecycle::{
    EngineServices, InstallRequest, InstallStateStore, LifecycleError, LifecycleResult,
    ManifestSource, MemoryStateStore, SyncEngine, SystemEnvironment,
};
use gamesync::manifest::{FileChunk, Manifest, ManifestEntry, PatchSource, ReleaseChannel};
use gamesync::patch::DeltaComputer;
use gamesync::transfer::{
    progress_channel, BoxFuture, FetchRequest, FetchResponse, OperationKind, OperationState,
    ProgressEvent, ProgressSink, RetryPolicy, RetryStrategy, TransferError, TransferResult,
    TransferScheduler, TransferSettings, Transport,
};

const BASE: &str = "https://cdn.test/live";

// ============================================================================
// Test doubles
// ============================================================================

/// In-memory channel content with per-URL latency and failure injection.
#[derive(Default)]
struct MockTransport {
    files: Mutex<HashMap<String, Vec<u8>>>,
    delays: Mutex<HashMap<String, Duration>>,
    timeouts: Mutex<HashSet<String>>,
    flaky: Mutex<HashMap<String, usize>>,
    requests: Mutex<HashMap<String, usize>>,
}

impl MockTransport {
    fn url(path: &str) -> String {
        format!("{}/{}", BASE, path)
    }

    fn serve(&self, path: &str, data: &[u8]) {
        self.files.lock().insert(Self::url(path), data.to_vec());
    }

    fn delay(&self, path: &str, delay: Duration) {
        self.delays.lock().insert(Self::url(path), delay);
    }

    fn always_time_out(&self, path: &str) {
        self.timeouts.lock().insert(Self::url(path));
    }

    /// Time out the next `count` requests for `path`.
    fn fail_next(&self, path: &str, count: usize) {
        self.flaky.lock().insert(Self::url(path), count);
    }

    fn requests_for(&self, path: &str) -> usize {
        self.requests
            .lock()
            .get(&Self::url(path))
            .copied()
            .unwrap_or(0)
    }

    fn total_requests(&self) -> usize {
        self.requests.lock().values().sum()
    }
}

impl Transport for MockTransport {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, TransferResult<FetchResponse>> {
        Box::pin(async move {
            *self.requests.lock().entry(request.url.clone()).or_default() += 1;

            let delay = self.delays.lock().get(&request.url).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.timeouts.lock().contains(&request.url) {
                return Err(TransferError::Timeout { url: request.url });
            }
            if let Some(remaining) = self.flaky.lock().get_mut(&request.url) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(TransferError::Timeout { url: request.url });
                }
            }

            let data = self.files.lock().get(&request.url).cloned();
            match data {
                Some(data) => Ok(FetchResponse::from_bytes(Bytes::from(data), 512)),
                None => Err(TransferError::NotFound { url: request.url }),
            }
        })
    }
}

/// Manifest source whose document can be republished between operations.
struct MockManifests {
    current: Mutex<Manifest>,
}

impl MockManifests {
    fn new(manifest: Manifest) -> Self {
        Self {
            current: Mutex::new(manifest),
        }
    }

    fn publish(&self, manifest: Manifest) {
        *self.current.lock() = manifest;
    }
}

impl ManifestSource for MockManifests {
    fn fetch(&self) -> BoxFuture<'_, LifecycleResult<Manifest>> {
        Box::pin(async move { Ok(self.current.lock().clone()) })
    }
}

struct PanickingManifests;

impl ManifestSource for PanickingManifests {
    fn fetch(&self) -> BoxFuture<'_, LifecycleResult<Manifest>> {
        Box::pin(async move { panic!("manifest backend exploded") })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn fast_settings() -> TransferSettings {
    let fast = RetryStrategy::new(RetryPolicy::fixed(3, Duration::ZERO));
    TransferSettings::default()
        .with_concurrency(4)
        .with_whole_file_retry(fast.clone())
        .with_part_retry(fast)
        .with_reporter_interval(Duration::from_millis(10))
}

fn scheduler(transport: Arc<MockTransport>, settings: TransferSettings) -> TransferScheduler {
    TransferScheduler::new(transport, ReleaseChannel::new("live", BASE), settings)
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = rand::rng();
    (0..len).map(|_| rng.random()).collect()
}

fn entry(path: &str, data: &[u8]) -> ManifestEntry {
    ManifestEntry::new(path, hash_bytes(data), data.len() as u64)
}

/// Split `data` into `count` chunks served as `<path>.partN`.
fn chunked(transport: &MockTransport, path: &str, data: &[u8], count: usize) -> ManifestEntry {
    let chunk_len = data.len().div_ceil(count);
    let parts = data
        .chunks(chunk_len)
        .enumerate()
        .map(|(i, chunk)| {
            let part_path = format!("{}.part{}", path, i);
            transport.serve(&part_path, chunk);
            FileChunk {
                path: part_path,
                checksum: hash_bytes(chunk),
                size: chunk.len() as u64,
            }
        })
        .collect();
    entry(path, data).with_parts(parts)
}

fn manifest(version: &str, files: Vec<ManifestEntry>) -> Manifest {
    let mut manifest = Manifest::from_entries(files).unwrap();
    manifest.version = Some(version.to_string());
    manifest
}

fn write(root: &Path, relative: &str, data: &[u8]) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, data).unwrap();
}

struct Harness {
    engine: SyncEngine,
    manifests: Arc<MockManifests>,
    state: Arc<MemoryStateStore>,
}

fn harness(root: &Path, transport: Arc<MockTransport>, initial: Manifest) -> Harness {
    harness_with_progress(root, transport, initial, ProgressSink::disabled())
}

fn harness_with_progress(
    root: &Path,
    transport: Arc<MockTransport>,
    initial: Manifest,
    progress: ProgressSink,
) -> Harness {
    let manifests = Arc::new(MockManifests::new(initial));
    let state = Arc::new(MemoryStateStore::default());
    let config = EngineConfig::new(root, ReleaseChannel::new("live", BASE))
        .with_transfer(fast_settings())
        .with_repair_attempts(3)
        .with_space_buffer(0);
    let services = EngineServices {
        transport,
        manifests: manifests.clone(),
        state: state.clone(),
        environment: Arc::new(SystemEnvironment::new()),
    };
    Harness {
        engine: SyncEngine::new(config, services, progress),
        manifests,
        state,
    }
}

fn drain(rx: &mut tokio::sync::mpsc::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ============================================================================
// Transfer Scheduler
// ============================================================================

/// A file that already matches is never requested but still counts as done.
#[tokio::test]
async fn test_skip_and_credit_conservation() {
    let temp = TempDir::new().unwrap();
    let transport = Arc::new(MockTransport::default());
    let data = random_bytes(3000);
    transport.serve("data/a.pak", &data);
    write(temp.path(), "data/a.pak", &data);

    let scheduler = scheduler(Arc::clone(&transport), fast_settings());
    let report = scheduler
        .run_batch(temp.path(), vec![entry("data/a.pak", &data)])
        .await;

    assert_eq!(transport.requests_for("data/a.pak"), 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.transferred_bytes, 0);
    assert_eq!(report.credited_bytes, 3000);

    let snapshot = scheduler.context().stats.snapshot();
    assert_eq!(snapshot.completed(), 3000);
    assert_eq!(snapshot.total, 3000);
}

/// Chunks finishing in reverse order still merge in manifest order.
#[tokio::test]
async fn test_part_order_survives_shuffled_completion() {
    let temp = TempDir::new().unwrap();
    let transport = Arc::new(MockTransport::default());
    let data = random_bytes(10_000);
    let big = chunked(&transport, "data/big.pak", &data, 5);

    let mut rng = rand::rng();
    for (i, part) in big.parts.iter().enumerate() {
        let reverse = (big.parts.len() - i) as u64 * 15;
        let jitter = rng.random_range(0..10);
        transport.delay(&part.path, Duration::from_millis(reverse + jitter));
    }

    let report = scheduler(Arc::clone(&transport), fast_settings().with_concurrency(8))
        .run_batch(temp.path(), vec![big.clone()])
        .await;

    assert!(report.is_clean());
    assert_eq!(report.downloaded, 1);
    let merged = temp.path().join("data/big.pak");
    assert_eq!(hash_file(&merged).unwrap(), hash_bytes(&data));
    for part in &big.parts {
        assert!(!temp.path().join(&part.path).exists(), "{} left behind", part.path);
    }
}

/// A transfer that always times out is tried exactly N times and flagged once.
#[tokio::test]
async fn test_retry_exhaustion() {
    let temp = TempDir::new().unwrap();
    let transport = Arc::new(MockTransport::default());
    transport.always_time_out("data/a.pak");

    let settings = fast_settings()
        .with_whole_file_retry(RetryStrategy::new(RetryPolicy::fixed(4, Duration::ZERO)));
    let scheduler = scheduler(Arc::clone(&transport), settings);
    let report = scheduler
        .run_batch(temp.path(), vec![entry("data/a.pak", b"alpha")])
        .await;

    assert_eq!(transport.requests_for("data/a.pak"), 4);
    assert!(report.bad_files);
    assert_eq!(report.failed, vec!["data/a.pak".to_string()]);
    assert_eq!(scheduler.context().failed_paths(), vec!["data/a.pak".to_string()]);
    assert!(!temp.path().join("data/a.pak").exists());
}

/// One failing chunk blocks the merge and keeps the chunks that did arrive.
#[tokio::test]
async fn test_failed_part_skips_merge() {
    let temp = TempDir::new().unwrap();
    let transport = Arc::new(MockTransport::default());
    let data = random_bytes(4000);
    let big = chunked(&transport, "data/big.pak", &data, 2);
    transport.always_time_out(&big.parts[1].path);

    let settings =
        fast_settings().with_part_retry(RetryStrategy::new(RetryPolicy::fixed(5, Duration::ZERO)));
    let report = scheduler(Arc::clone(&transport), settings)
        .run_batch(temp.path(), vec![big.clone()])
        .await;

    assert_eq!(transport.requests_for(&big.parts[1].path), 5);
    assert_eq!(transport.requests_for(&big.parts[0].path), 1);
    assert_eq!(report.failed, vec!["data/big.pak".to_string()]);
    assert!(!temp.path().join("data/big.pak").exists());
    assert!(temp.path().join(&big.parts[0].path).exists());
}

/// Not-found is final for the batch: one request, no retries.
#[tokio::test]
async fn test_not_found_single_attempt() {
    let temp = TempDir::new().unwrap();
    let transport = Arc::new(MockTransport::default());

    let report = scheduler(Arc::clone(&transport), fast_settings())
        .run_batch(temp.path(), vec![entry("data/gone.pak", b"gone")])
        .await;

    assert_eq!(transport.requests_for("data/gone.pak"), 1);
    assert!(report.bad_files);
}

// ============================================================================
// Lifecycle Engine
// ============================================================================

/// One skipped file, one missing file, one missing two-part file.
#[tokio::test]
async fn test_install_end_to_end() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("live");
    let transport = Arc::new(MockTransport::default());

    let present = random_bytes(1500);
    let missing = random_bytes(2500);
    let large = random_bytes(6000);
    transport.serve("data/present.pak", &present);
    transport.serve("data/missing.pak", &missing);
    let big = chunked(&transport, "data/big.pak", &large, 2);
    write(&root, "data/present.pak", &present);

    let files = vec![
        entry("data/present.pak", &present),
        entry("data/missing.pak", &missing),
        big.clone(),
    ];
    let h = harness(&root, Arc::clone(&transport), manifest("1", files.clone()));

    let report = h.engine.install(InstallRequest::accepted()).await.unwrap();

    assert_eq!(report.version.as_deref(), Some("1"));
    assert_eq!(report.repair_attempts, 0);
    assert_eq!(report.totals.skipped, 1);
    assert_eq!(report.totals.downloaded, 2);
    assert_eq!(
        report.totals.transferred_bytes,
        missing.len() as u64 + big.parts[0].size + big.parts[1].size
    );
    assert_eq!(report.totals.credited_bytes, present.len() as u64);
    assert_eq!(transport.requests_for("data/present.pak"), 0);

    for file in &files {
        assert_eq!(hash_file(&root.join(&file.path)).unwrap(), file.checksum);
    }
    for part in &big.parts {
        assert!(!root.join(&part.path).exists());
    }

    let state = h.state.load().unwrap();
    assert!(state.installed);
    assert_eq!(state.version.as_deref(), Some("1"));
}

/// A flaky file is fetched again by the bounded repair loop.
#[tokio::test]
async fn test_install_repairs_transient_failures() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("live");
    let transport = Arc::new(MockTransport::default());
    let data = random_bytes(800);
    transport.serve("a.pak", &data);
    // Exhausts the three attempts of the first batch
    transport.fail_next("a.pak", 3);
    let h = harness(&root, Arc::clone(&transport), manifest("1", vec![entry("a.pak", &data)]));

    let report = h.engine.install(InstallRequest::accepted()).await.unwrap();

    assert_eq!(report.repair_attempts, 1);
    assert_eq!(report.totals.downloaded, 1);
    assert_eq!(transport.requests_for("a.pak"), 4);
    assert_eq!(hash_file(&root.join("a.pak")).unwrap(), hash_bytes(&data));
}

/// Files missing on the server exhaust the repair cap.
#[tokio::test]
async fn test_install_gives_up_after_repair_cap() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("live");
    let transport = Arc::new(MockTransport::default());
    let h = harness(
        &root,
        Arc::clone(&transport),
        manifest("1", vec![entry("lost.pak", b"lost")]),
    );

    match h.engine.install(InstallRequest::accepted()).await {
        Err(LifecycleError::RepairFailed { attempts, failed }) => {
            assert_eq!(attempts, 3);
            assert_eq!(failed, vec!["lost.pak".to_string()]);
        }
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
    // Initial batch plus one per repair attempt, never retried within a batch
    assert_eq!(transport.requests_for("lost.pak"), 4);
    assert!(!h.state.load().unwrap().installed);
    assert!(!h.engine.is_busy());
}

/// Repairing a healthy installation twice downloads nothing.
#[tokio::test]
async fn test_repair_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("live");
    let transport = Arc::new(MockTransport::default());
    let a = random_bytes(1000);
    let large = random_bytes(3000);
    transport.serve("a.pak", &a);
    let big = chunked(&transport, "big.pak", &large, 3);
    let h = harness(
        &root,
        Arc::clone(&transport),
        manifest("1", vec![entry("a.pak", &a), big]),
    );
    h.engine.install(InstallRequest::accepted()).await.unwrap();
    let after_install = transport.total_requests();

    let first = h.engine.repair().await.unwrap();
    let second = h.engine.repair().await.unwrap();

    assert_eq!(first.mismatched, 0);
    assert_eq!(first.totals.fetched(), 0);
    assert_eq!(second.mismatched, 0);
    assert_eq!(second.totals.fetched(), 0);
    assert_eq!(second.repair_attempts, 0);
    assert_eq!(transport.total_requests(), after_install);
}

/// A corrupted file is found and replaced.
#[tokio::test]
async fn test_repair_replaces_corrupt_file() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("live");
    let transport = Arc::new(MockTransport::default());
    let a = random_bytes(1000);
    transport.serve("a.pak", &a);
    let h = harness(&root, Arc::clone(&transport), manifest("1", vec![entry("a.pak", &a)]));
    h.engine.install(InstallRequest::accepted()).await.unwrap();

    std::fs::write(root.join("a.pak"), b"bit rot").unwrap();
    let report = h.engine.repair().await.unwrap();

    assert_eq!(report.mismatched, 1);
    assert_eq!(report.totals.downloaded, 1);
    assert_eq!(std::fs::read(root.join("a.pak")).unwrap(), a);
    assert_eq!(transport.requests_for("a.pak"), 2);
}

/// Update deletes files the new manifest dropped but keeps user data.
#[tokio::test]
async fn test_update_prunes_obsolete_files() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("live");
    let transport = Arc::new(MockTransport::default());
    let a = random_bytes(500);
    let old = random_bytes(500);
    let new = random_bytes(700);
    transport.serve("a.pak", &a);
    transport.serve("old.pak", &old);
    transport.serve("new.pak", &new);

    let (sink, mut rx) = progress_channel(4096);
    let h = harness_with_progress(
        &root,
        Arc::clone(&transport),
        manifest("1", vec![entry("a.pak", &a), entry("old.pak", &old)]),
        sink,
    );
    h.engine.install(InstallRequest::accepted()).await.unwrap();
    write(&root, "saves/slot1.sav", b"progress");
    write(&root, "crash.log", b"trace");
    drain(&mut rx);

    h.manifests
        .publish(manifest("2", vec![entry("a.pak", &a), entry("new.pak", &new)]));
    let report = h.engine.update().await.unwrap();

    assert!(!report.up_to_date);
    assert_eq!(report.from_version.as_deref(), Some("1"));
    assert_eq!(report.to_version.as_deref(), Some("2"));
    assert_eq!(report.removed, 1);
    assert_eq!(report.totals.downloaded, 1);
    assert!(!root.join("old.pak").exists());
    assert!(root.join("saves/slot1.sav").exists());
    assert!(root.join("crash.log").exists());
    assert_eq!(std::fs::read(root.join("new.pak")).unwrap(), new);
    assert_eq!(h.state.load().unwrap().version.as_deref(), Some("2"));

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        ProgressEvent::Removed { path, completed: 1, total: 1 } if path == "old.pak"
    )));
}

/// Update with an unchanged version does nothing.
#[tokio::test]
async fn test_update_up_to_date() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("live");
    let transport = Arc::new(MockTransport::default());
    transport.serve("a.pak", b"alpha");
    let h = harness(&root, Arc::clone(&transport), manifest("1", vec![entry("a.pak", b"alpha")]));
    h.engine.install(InstallRequest::accepted()).await.unwrap();
    let before = transport.total_requests();

    let report = h.engine.update().await.unwrap();

    assert!(report.up_to_date);
    assert_eq!(transport.total_requests(), before);
}

fn patch_fixture(
    transport: &MockTransport,
    delta_bytes: Option<Vec<u8>>,
) -> (Vec<u8>, Vec<u8>, ManifestEntry) {
    let base = random_bytes(16 * 1024);
    let mut new = base.clone();
    new.splice(5000..5100, random_bytes(300));

    let delta = match delta_bytes {
        Some(bytes) => bytes,
        None => {
            let computer = DeltaComputer::new();
            computer
                .delta(&computer.signature(&base), &new)
                .encode()
                .unwrap()
        }
    };
    transport.serve("patches/level.pak.delta", &delta);
    let patched = entry("data/level.pak", &new).with_patch(PatchSource {
        path: "patches/level.pak.delta".to_string(),
        base_checksum: hash_bytes(&base),
    });
    (base, new, patched)
}

/// An entry whose local copy matches the delta base is patched, not downloaded.
#[tokio::test]
async fn test_update_applies_delta() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("live");
    let transport = Arc::new(MockTransport::default());
    let (base, new, patched) = patch_fixture(&transport, None);
    transport.serve("data/level.pak", &base);

    let h = harness(
        &root,
        Arc::clone(&transport),
        manifest("1", vec![entry("data/level.pak", &base)]),
    );
    h.engine.install(InstallRequest::accepted()).await.unwrap();

    transport.serve("data/level.pak", &new);
    h.manifests.publish(manifest("2", vec![patched]));
    let report = h.engine.update().await.unwrap();

    assert_eq!(report.totals.patched, 1);
    assert_eq!(report.totals.downloaded, 0);
    assert_eq!(transport.requests_for("patches/level.pak.delta"), 1);
    assert_eq!(transport.requests_for("data/level.pak"), 1);
    assert_eq!(std::fs::read(root.join("data/level.pak")).unwrap(), new);
    assert!(!root.join("data/level.pak.delta").exists());
}

/// A delta that cannot be applied falls back to a full download next pass.
#[tokio::test]
async fn test_failed_delta_falls_back_to_full_download() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("live");
    let transport = Arc::new(MockTransport::default());
    let (base, new, patched) = patch_fixture(&transport, Some(b"not a delta".to_vec()));
    transport.serve("data/level.pak", &base);

    let h = harness(
        &root,
        Arc::clone(&transport),
        manifest("1", vec![entry("data/level.pak", &base)]),
    );
    h.engine.install(InstallRequest::accepted()).await.unwrap();

    transport.serve("data/level.pak", &new);
    h.manifests.publish(manifest("2", vec![patched]));
    let report = h.engine.update().await.unwrap();

    assert_eq!(report.repair_attempts, 2);
    assert_eq!(report.totals.patched, 0);
    assert_eq!(report.totals.downloaded, 1);
    assert_eq!(transport.requests_for("patches/level.pak.delta"), 1);
    assert_eq!(transport.requests_for("data/level.pak"), 2);
    assert_eq!(std::fs::read(root.join("data/level.pak")).unwrap(), new);
}

/// Language and optional sets are installed and tracked separately.
#[tokio::test]
async fn test_install_cascades_content_sets() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("live");
    let transport = Arc::new(MockTransport::default());
    for (path, data) in [
        ("core.pak", b"core".as_slice()),
        ("lang/de.pak", b"deutsch".as_slice()),
        ("lang/fr.pak", b"francais".as_slice()),
        ("hires.pak", b"pixels".as_slice()),
    ] {
        transport.serve(path, data);
    }
    let mut doc = manifest(
        "1",
        vec![
            entry("core.pak", b"core"),
            entry("lang/de.pak", b"deutsch").with_language("de"),
            entry("lang/fr.pak", b"francais").with_language("fr"),
            entry("hires.pak", b"pixels").with_optional(true),
        ],
    );
    doc.languages = vec!["de".to_string(), "fr".to_string()];
    let h = harness(&root, Arc::clone(&transport), doc);

    let request = InstallRequest::accepted()
        .with_language("de")
        .with_optional(true);
    let report = h.engine.install(request).await.unwrap();

    assert_eq!(report.totals.downloaded, 3);
    assert!(root.join("lang/de.pak").exists());
    assert!(!root.join("lang/fr.pak").exists());
    assert!(root.join("hires.pak").exists());

    let state = h.state.load().unwrap();
    assert_eq!(state.languages, vec!["de".to_string()]);
    assert!(state.optional_installed);

    // The secondary passes of a repair cover the installed language
    std::fs::remove_file(root.join("lang/de.pak")).unwrap();
    let repair = h.engine.repair().await.unwrap();
    assert_eq!(repair.mismatched, 1);
    assert!(root.join("lang/de.pak").exists());
}

/// Uninstall removes everything, user data included, and resets state.
#[tokio::test]
async fn test_uninstall_removes_tree() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("live");
    let transport = Arc::new(MockTransport::default());
    transport.serve("a.pak", b"alpha");
    let (sink, mut rx) = progress_channel(1024);
    let h = harness_with_progress(
        &root,
        Arc::clone(&transport),
        manifest("1", vec![entry("a.pak", b"alpha")]),
        sink,
    );
    h.engine.install(InstallRequest::accepted()).await.unwrap();
    write(&root, "saves/slot1.sav", b"progress");
    drain(&mut rx);

    let report = h.engine.uninstall().await.unwrap();

    assert_eq!(report.removed, 2);
    assert!(!root.exists());
    let state = h.state.load().unwrap();
    assert!(!state.installed);
    assert!(state.version.is_none());
    assert!(state.updated_at.is_some());
    let removed = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, ProgressEvent::Removed { .. }))
        .count();
    assert_eq!(removed, 2);

    assert!(matches!(
        h.engine.uninstall().await,
        Err(LifecycleError::NotInstalled)
    ));
}

/// Verify reports damage without fetching anything.
#[tokio::test]
async fn test_verify_reports_mismatches() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("live");
    let transport = Arc::new(MockTransport::default());
    transport.serve("a.pak", b"alpha");
    transport.serve("b.pak", b"bravo");
    let h = harness(
        &root,
        Arc::clone(&transport),
        manifest("1", vec![entry("a.pak", b"alpha"), entry("b.pak", b"bravo")]),
    );
    h.engine.install(InstallRequest::accepted()).await.unwrap();
    std::fs::write(root.join("b.pak"), b"BRAVO").unwrap();
    let before = transport.total_requests();

    let report = h.engine.verify().await.unwrap();

    assert_eq!(report.checked, 2);
    assert_eq!(report.mismatches.len(), 1);
    assert_eq!(report.mismatches[0].entry.path, "b.pak");
    assert_eq!(transport.total_requests(), before);
}

/// Only one operation runs at a time.
#[tokio::test]
async fn test_operations_are_mutually_exclusive() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("live");
    let transport = Arc::new(MockTransport::default());
    transport.serve("slow.pak", b"slow");
    transport.delay("slow.pak", Duration::from_millis(200));
    let h = harness(&root, Arc::clone(&transport), manifest("1", vec![entry("slow.pak", b"slow")]));

    let (install, verify) = tokio::join!(h.engine.install(InstallRequest::accepted()), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.engine.verify().await
    });

    assert!(install.is_ok());
    assert!(matches!(verify, Err(LifecycleError::Busy)));
    assert!(!h.engine.is_busy());
}

/// A panic inside an operation is reported and the engine returns to idle.
#[tokio::test]
async fn test_panic_resets_to_idle() {
    let temp = TempDir::new().unwrap();
    let (sink, mut rx) = progress_channel(64);
    let config = EngineConfig::new(temp.path(), ReleaseChannel::new("live", BASE))
        .with_space_buffer(0);
    let services = EngineServices {
        transport: Arc::new(MockTransport::default()),
        manifests: Arc::new(PanickingManifests),
        state: Arc::new(MemoryStateStore::default()),
        environment: Arc::new(SystemEnvironment::new()),
    };
    let engine = SyncEngine::new(config, services, sink);

    let result = engine.install(InstallRequest::accepted()).await;

    assert!(matches!(result, Err(LifecycleError::Unexpected(_))));
    assert!(!engine.is_busy());

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        ProgressEvent::OperationFinished {
            operation: OperationKind::Install,
            success: false,
            ..
        }
    )));
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::OperationStateChanged {
            state: OperationState::Idle,
            ..
        })
    ));
}
