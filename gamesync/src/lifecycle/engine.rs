//! Install, repair, update, uninstall and verify state machines.
//!
//! Every operation walks `Idle -> Preflight -> Working -> PostActions -> Idle`
//! and only one may run at a time. The work itself runs on a spawned task so
//! that a panic surfaces as [`LifecycleError::Unexpected`] instead of taking
//! the caller down, and the busy flag is released on every exit path.

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::checksum::{
    diff, digest_map, hash_tree, list_files, Exclusions, Mismatch, MismatchSet, PassKind,
};
use crate::config::EngineConfig;
use crate::manifest::{select_files, ContentSet, Manifest};
use crate::transfer::{
    BatchReport, OperationKind, OperationState, ProgressEvent, ProgressSink, TransferScheduler,
    Transport,
};

use super::environment::HostEnvironment;
use super::error::{LifecycleError, LifecycleResult};
use super::source::ManifestSource;
use super::state::{InstallState, InstallStateStore};

/// How long to wait for the game to exit after asking it to close.
const GAME_EXIT_TIMEOUT: Duration = Duration::from_secs(10);
const GAME_EXIT_POLL: Duration = Duration::from_millis(500);

/// External collaborators of the engine.
#[derive(Clone)]
pub struct EngineServices {
    pub transport: Arc<dyn Transport>,
    pub manifests: Arc<dyn ManifestSource>,
    pub state: Arc<dyn InstallStateStore>,
    pub environment: Arc<dyn HostEnvironment>,
}

/// What to install besides the core content set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallRequest {
    pub accept_eula: bool,
    pub include_optional: bool,
    /// Language tags to install after the core set.
    pub languages: Vec<String>,
}

impl InstallRequest {
    pub fn accepted() -> Self {
        Self {
            accept_eula: true,
            ..Self::default()
        }
    }

    pub fn with_optional(mut self, include: bool) -> Self {
        self.include_optional = include;
        self
    }

    pub fn with_language(mut self, tag: impl Into<String>) -> Self {
        self.languages.push(tag.into());
        self
    }
}

/// Transfer counts accumulated over every batch of an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferTotals {
    pub downloaded: usize,
    pub patched: usize,
    pub skipped: usize,
    pub transferred_bytes: u64,
    pub credited_bytes: u64,
}

impl TransferTotals {
    fn absorb(&mut self, report: &BatchReport) {
        self.downloaded += report.downloaded;
        self.patched += report.patched;
        self.skipped += report.skipped;
        self.transferred_bytes += report.transferred_bytes;
        self.credited_bytes += report.credited_bytes;
    }

    fn merge(&mut self, other: &TransferTotals) {
        self.downloaded += other.downloaded;
        self.patched += other.patched;
        self.skipped += other.skipped;
        self.transferred_bytes += other.transferred_bytes;
        self.credited_bytes += other.credited_bytes;
    }

    /// Entries fetched or patched.
    pub fn fetched(&self) -> usize {
        self.downloaded + self.patched
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub version: Option<String>,
    pub totals: TransferTotals,
    /// Repair passes needed after the initial download.
    pub repair_attempts: u32,
    pub optional: bool,
    pub languages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairReport {
    /// Entries that failed the first verification pass.
    pub mismatched: usize,
    pub repair_attempts: u32,
    pub totals: TransferTotals,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    /// The local version already matched the channel.
    pub up_to_date: bool,
    pub from_version: Option<String>,
    pub to_version: Option<String>,
    /// Obsolete files deleted before syncing.
    pub removed: usize,
    pub repair_attempts: u32,
    pub totals: TransferTotals,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallReport {
    pub removed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    /// Manifest entries that were checked.
    pub checked: usize,
    pub mismatches: Vec<Mismatch>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Result of converging one content set.
#[derive(Debug, Default)]
struct Convergence {
    /// Mismatches found by the first verification pass.
    found: usize,
    attempts: u32,
    totals: TransferTotals,
}

/// Sequences verification, transfers and state persistence.
///
/// Cheap to clone; clones share the busy flag.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    services: EngineServices,
    progress: ProgressSink,
    busy: AtomicBool,
}

/// Releases the busy flag and reports `Idle` however the operation ends.
struct BusyGuard {
    inner: Arc<EngineInner>,
    operation: OperationKind,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.inner.busy.store(false, Ordering::SeqCst);
        self.inner.phase(self.operation, OperationState::Idle);
    }
}

impl SyncEngine {
    pub fn new(config: EngineConfig, services: EngineServices, progress: ProgressSink) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                services,
                progress,
                busy: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Whether an operation is running.
    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::SeqCst)
    }

    /// Download the core content set and any requested extras.
    pub async fn install(&self, request: InstallRequest) -> LifecycleResult<InstallReport> {
        self.run(OperationKind::Install, move |inner| async move {
            inner.install(request).await
        })
        .await
    }

    /// Re-verify every installed content set and re-fetch what is damaged.
    pub async fn repair(&self) -> LifecycleResult<RepairReport> {
        self.run(OperationKind::Repair, |inner| async move { inner.repair().await })
            .await
    }

    /// Bring the installation to the channel's current manifest.
    pub async fn update(&self) -> LifecycleResult<UpdateReport> {
        self.run(OperationKind::Update, |inner| async move { inner.update().await })
            .await
    }

    /// Delete the installation and reset the persisted state.
    pub async fn uninstall(&self) -> LifecycleResult<UninstallReport> {
        self.run(OperationKind::Uninstall, |inner| async move {
            inner.uninstall().await
        })
        .await
    }

    /// Hash and diff the installation without downloading anything.
    pub async fn verify(&self) -> LifecycleResult<VerifyReport> {
        self.run(OperationKind::Verify, |inner| async move { inner.verify().await })
            .await
    }

    async fn run<T, F, Fut>(&self, operation: OperationKind, work: F) -> LifecycleResult<T>
    where
        F: FnOnce(Arc<EngineInner>) -> Fut,
        Fut: Future<Output = LifecycleResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        if self
            .inner
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(operation = %operation, "Rejected: another operation is running");
            return Err(LifecycleError::Busy);
        }
        let _guard = BusyGuard {
            inner: Arc::clone(&self.inner),
            operation,
        };

        info!(operation = %operation, "Operation started");

        let result = match tokio::spawn(work(Arc::clone(&self.inner))).await {
            Ok(result) => result,
            Err(e) => Err(LifecycleError::Unexpected(e.to_string())),
        };

        match &result {
            Ok(_) => info!(operation = %operation, "Operation finished"),
            Err(e) => error!(operation = %operation, error = %e, "Operation failed"),
        }
        self.inner.progress.emit(ProgressEvent::OperationFinished {
            operation,
            success: result.is_ok(),
            message: result.as_ref().err().map(|e| e.to_string()),
        });

        result
    }
}

impl EngineInner {
    fn phase(&self, operation: OperationKind, state: OperationState) {
        debug!(operation = %operation, state = ?state, "Operation state changed");
        self.progress
            .emit(ProgressEvent::OperationStateChanged { operation, state });
    }

    fn scheduler(&self) -> TransferScheduler {
        TransferScheduler::with_progress(
            Arc::clone(&self.services.transport),
            self.config.channel.clone(),
            self.config.transfer.clone(),
            self.progress.clone(),
        )
    }

    async fn load_state(&self) -> LifecycleResult<InstallState> {
        let store = Arc::clone(&self.services.state);
        tokio::task::spawn_blocking(move || store.load())
            .await
            .map_err(|e| LifecycleError::Unexpected(e.to_string()))?
    }

    async fn save_state(&self, mut state: InstallState) -> LifecycleResult<()> {
        state.touch();
        let store = Arc::clone(&self.services.state);
        tokio::task::spawn_blocking(move || store.save(&state))
            .await
            .map_err(|e| LifecycleError::Unexpected(e.to_string()))?
    }

    async fn require_online(&self) -> LifecycleResult<()> {
        if self.services.environment.is_online().await {
            Ok(())
        } else {
            Err(LifecycleError::Offline)
        }
    }

    fn check_space(&self, download_bytes: u64) -> LifecycleResult<()> {
        let root = &self.config.install_dir;
        let available = self
            .services
            .environment
            .available_space(root)
            .map_err(|e| LifecycleError::io(root, e))?;
        let required = download_bytes.saturating_add(self.config.space_buffer_bytes);

        debug!(required, available, "Disk space check");
        if available < required {
            return Err(LifecycleError::InsufficientSpace {
                required,
                available,
            });
        }
        Ok(())
    }

    /// Make sure the game is not running, closing it if the host agrees.
    async fn ensure_game_closed(&self) -> LifecycleResult<()> {
        let env = &self.services.environment;
        if !env.is_game_running() {
            return Ok(());
        }
        if !env.confirm_close_game() {
            return Err(LifecycleError::GameRunning);
        }

        info!("Closing running game");
        env.close_game()
            .map_err(|e| LifecycleError::Unexpected(format!("failed to close game: {}", e)))?;

        let deadline = tokio::time::Instant::now() + GAME_EXIT_TIMEOUT;
        while env.is_game_running() {
            if tokio::time::Instant::now() >= deadline {
                return Err(LifecycleError::GameRunning);
            }
            tokio::time::sleep(GAME_EXIT_POLL).await;
        }
        Ok(())
    }

    /// Paths a verification pass over `set` skips.
    fn exclusions(&self, manifest: &Manifest, set: &ContentSet) -> LifecycleResult<Exclusions> {
        let exclusions = Exclusions::user_data(&self.config.user_data)?;
        Ok(match set {
            ContentSet::Core => exclusions.with_optional(manifest),
            other => exclusions.with_paths(
                manifest
                    .files
                    .iter()
                    .filter(|e| !other.matches(e))
                    .map(|e| e.path.clone()),
            ),
        })
    }

    /// Hash the local tree and diff it against one content set.
    async fn verify_pass(
        &self,
        manifest: &Manifest,
        set: &ContentSet,
        pass: PassKind,
    ) -> LifecycleResult<MismatchSet> {
        let exclusions = self.exclusions(manifest, set)?;
        let root = self.config.install_dir.clone();
        let concurrency = self.config.transfer.concurrency;
        let sink = self.progress.clone();

        debug!(set = %set.label(), pass = pass.label(), "Verifying content set");

        let digests = tokio::task::spawn_blocking(move || {
            hash_tree(&root, &exclusions, concurrency, |completed, total| {
                sink.emit(ProgressEvent::VerifyTick { completed, total });
            })
        })
        .await
        .map_err(|e| LifecycleError::Unexpected(e.to_string()))??;

        let entries = select_files(manifest, |e| set.matches(e));
        Ok(diff(&entries, &digest_map(digests), pass))
    }

    /// Verify and re-fetch until a pass comes back clean or the cap is hit.
    async fn converge(
        &self,
        scheduler: &TransferScheduler,
        manifest: &Manifest,
        set: &ContentSet,
        pass: PassKind,
    ) -> LifecycleResult<Convergence> {
        let mut outcome = Convergence::default();
        let cap = self.config.repair_attempts.max(1);

        loop {
            let mismatches = self.verify_pass(manifest, set, pass).await?;
            if outcome.attempts == 0 {
                outcome.found = mismatches.len();
            }
            if mismatches.is_empty() {
                return Ok(outcome);
            }
            if outcome.attempts >= cap {
                warn!(
                    set = %set.label(),
                    attempts = outcome.attempts,
                    remaining = mismatches.len(),
                    "Giving up after repair attempts"
                );
                return Err(LifecycleError::RepairFailed {
                    attempts: outcome.attempts,
                    failed: mismatches.paths(),
                });
            }

            outcome.attempts += 1;
            info!(
                set = %set.label(),
                pass = pass.label(),
                attempt = outcome.attempts,
                files = mismatches.len(),
                "Fetching mismatched files"
            );
            let report = scheduler
                .run_batch(&self.config.install_dir, mismatches.into_entries())
                .await;
            outcome.totals.absorb(&report);
        }
    }

    /// Download a content set, then repair it if anything failed.
    async fn install_set(
        &self,
        scheduler: &TransferScheduler,
        manifest: &Manifest,
        set: &ContentSet,
    ) -> LifecycleResult<Convergence> {
        let entries = select_files(manifest, |e| set.matches(e));
        info!(set = %set.label(), files = entries.len(), "Installing content set");

        let report = scheduler
            .run_batch(&self.config.install_dir, entries)
            .await;
        let mut totals = TransferTotals::default();
        totals.absorb(&report);

        if report.is_clean() {
            return Ok(Convergence {
                found: 0,
                attempts: 0,
                totals,
            });
        }

        warn!(
            set = %set.label(),
            failed = report.failed.len(),
            "Bad files detected, entering repair loop"
        );
        let mut repaired = self
            .converge(scheduler, manifest, set, PassKind::Repair)
            .await?;
        repaired.totals.merge(&totals);
        Ok(repaired)
    }

    async fn install(&self, request: InstallRequest) -> LifecycleResult<InstallReport> {
        let op = OperationKind::Install;
        self.phase(op, OperationState::Preflight);

        let mut state = self.load_state().await?;
        if state.installed {
            return Err(LifecycleError::AlreadyInstalled);
        }
        if !request.accept_eula {
            return Err(LifecycleError::EulaNotAccepted);
        }
        self.require_online().await?;

        let manifest = self.services.manifests.fetch().await?;

        let mut sets = vec![ContentSet::Core];
        for tag in &request.languages {
            if !manifest.languages.is_empty() && !manifest.languages.contains(tag) {
                warn!(language = %tag, "Language not offered by this channel");
            }
            sets.push(ContentSet::Language(tag.clone()));
        }
        if request.include_optional {
            sets.push(ContentSet::Optional);
        }
        let download_bytes = Manifest::total_size(
            manifest
                .files
                .iter()
                .filter(|e| sets.iter().any(|s| s.matches(e))),
        );
        self.check_space(download_bytes)?;

        self.phase(op, OperationState::Working);
        tokio::fs::create_dir_all(&self.config.install_dir)
            .await
            .map_err(|e| LifecycleError::io(&self.config.install_dir, e))?;

        let scheduler = self.scheduler();
        let core = self
            .install_set(&scheduler, &manifest, &ContentSet::Core)
            .await?;
        let mut totals = core.totals;
        let mut attempts = core.attempts;

        state.installed = true;
        state.version = manifest.version.clone();
        self.save_state(state.clone()).await?;
        info!(version = manifest.version.as_deref().unwrap_or("-"), "Core content installed");

        // Cascades; the core install stands even if one of these fails
        for tag in &request.languages {
            let set = ContentSet::Language(tag.clone());
            let outcome = self.install_set(&scheduler, &manifest, &set).await?;
            totals.merge(&outcome.totals);
            attempts += outcome.attempts;
            if !state.languages.contains(tag) {
                state.languages.push(tag.clone());
            }
            self.save_state(state.clone()).await?;
        }
        if request.include_optional {
            let outcome = self
                .install_set(&scheduler, &manifest, &ContentSet::Optional)
                .await?;
            totals.merge(&outcome.totals);
            attempts += outcome.attempts;
            state.optional_installed = true;
            self.save_state(state.clone()).await?;
        }

        self.phase(op, OperationState::PostActions);
        Ok(InstallReport {
            version: manifest.version,
            totals,
            repair_attempts: attempts,
            optional: state.optional_installed,
            languages: state.languages,
        })
    }

    /// Content sets recorded as installed.
    fn installed_sets(state: &InstallState) -> Vec<ContentSet> {
        let mut sets = vec![ContentSet::Core];
        sets.extend(state.languages.iter().cloned().map(ContentSet::Language));
        if state.optional_installed {
            sets.push(ContentSet::Optional);
        }
        sets
    }

    async fn repair(&self) -> LifecycleResult<RepairReport> {
        let op = OperationKind::Repair;
        self.phase(op, OperationState::Preflight);

        let state = self.load_state().await?;
        if !state.installed {
            return Err(LifecycleError::NotInstalled);
        }
        self.ensure_game_closed().await?;
        self.require_online().await?;
        let manifest = self.services.manifests.fetch().await?;

        self.phase(op, OperationState::Working);
        let scheduler = self.scheduler();
        let mut report = RepairReport {
            mismatched: 0,
            repair_attempts: 0,
            totals: TransferTotals::default(),
        };
        for set in Self::installed_sets(&state) {
            let outcome = self
                .converge(&scheduler, &manifest, &set, PassKind::Repair)
                .await?;
            report.mismatched += outcome.found;
            report.repair_attempts += outcome.attempts;
            report.totals.merge(&outcome.totals);
        }

        self.phase(op, OperationState::PostActions);
        self.save_state(state).await?;
        info!(
            mismatched = report.mismatched,
            fetched = report.totals.fetched(),
            "Repair complete"
        );
        Ok(report)
    }

    /// Delete local files the manifest no longer lists, sparing user data.
    async fn prune_obsolete(&self, manifest: &Manifest) -> LifecycleResult<usize> {
        let root = self.config.install_dir.clone();
        let exclusions = Exclusions::user_data(&self.config.user_data)?;
        let known = manifest.known_paths();

        let local = {
            let root = root.clone();
            tokio::task::spawn_blocking(move || list_files(&root))
                .await
                .map_err(|e| LifecycleError::Unexpected(e.to_string()))??
        };
        let obsolete: Vec<String> = local
            .into_iter()
            .filter(|f| !known.contains(f.as_str()) && !exclusions.is_user_data(f))
            .collect();

        let total = obsolete.len();
        for (i, relative) in obsolete.into_iter().enumerate() {
            let path = root.join(&relative);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %relative, "Removed obsolete file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(LifecycleError::io(path, e)),
            }
            self.progress.emit(ProgressEvent::Removed {
                path: relative,
                completed: i + 1,
                total,
            });
        }
        if total > 0 {
            info!(removed = total, "Pruned obsolete files");
        }
        Ok(total)
    }

    async fn update(&self) -> LifecycleResult<UpdateReport> {
        let op = OperationKind::Update;
        self.phase(op, OperationState::Preflight);

        let mut state = self.load_state().await?;
        if !state.installed {
            return Err(LifecycleError::NotInstalled);
        }
        self.ensure_game_closed().await?;
        self.require_online().await?;
        let manifest = self.services.manifests.fetch().await?;

        let from_version = state.version.clone();
        if from_version.is_some() && from_version == manifest.version {
            info!(version = from_version.as_deref().unwrap_or("-"), "Already up to date");
            return Ok(UpdateReport {
                up_to_date: true,
                to_version: from_version.clone(),
                from_version,
                removed: 0,
                repair_attempts: 0,
                totals: TransferTotals::default(),
            });
        }

        self.phase(op, OperationState::Working);
        info!(
            from = from_version.as_deref().unwrap_or("-"),
            to = manifest.version.as_deref().unwrap_or("-"),
            "Updating"
        );
        let removed = self.prune_obsolete(&manifest).await?;

        let scheduler = self.scheduler();
        let mut totals = TransferTotals::default();
        let mut attempts = 0;
        for set in Self::installed_sets(&state) {
            let outcome = self
                .converge(&scheduler, &manifest, &set, PassKind::Update)
                .await?;
            totals.merge(&outcome.totals);
            attempts += outcome.attempts;
        }

        self.phase(op, OperationState::PostActions);
        state.version = manifest.version.clone();
        self.save_state(state).await?;

        Ok(UpdateReport {
            up_to_date: false,
            from_version,
            to_version: manifest.version,
            removed,
            repair_attempts: attempts,
            totals,
        })
    }

    async fn uninstall(&self) -> LifecycleResult<UninstallReport> {
        let op = OperationKind::Uninstall;
        self.phase(op, OperationState::Preflight);

        let state = self.load_state().await?;
        if !state.installed {
            return Err(LifecycleError::NotInstalled);
        }
        self.ensure_game_closed().await?;

        let root = self.config.install_dir.clone();
        let files = {
            let root = root.clone();
            tokio::task::spawn_blocking(move || list_files(&root))
                .await
                .map_err(|e| LifecycleError::Unexpected(e.to_string()))??
        };
        let paths: Vec<PathBuf> = files.iter().map(|f| root.join(f)).collect();
        let locked = self.services.environment.locked_files(&paths);
        if !locked.is_empty() {
            return Err(LifecycleError::LockedFiles { paths: locked });
        }

        self.phase(op, OperationState::Working);
        let total = files.len();
        for (i, (relative, path)) in files.into_iter().zip(paths).enumerate() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(LifecycleError::io(path, e)),
            }
            self.progress.emit(ProgressEvent::Removed {
                path: relative,
                completed: i + 1,
                total,
            });
        }
        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(LifecycleError::io(&root, e)),
        }

        self.phase(op, OperationState::PostActions);
        self.save_state(InstallState::default()).await?;
        info!(removed = total, root = %root.display(), "Uninstalled");
        Ok(UninstallReport { removed: total })
    }

    async fn verify(&self) -> LifecycleResult<VerifyReport> {
        let op = OperationKind::Verify;
        self.phase(op, OperationState::Preflight);

        let state = self.load_state().await?;
        self.require_online().await?;
        let manifest = self.services.manifests.fetch().await?;

        self.phase(op, OperationState::Working);
        let mut report = VerifyReport {
            checked: 0,
            mismatches: Vec::new(),
        };
        for set in Self::installed_sets(&state) {
            report.checked += manifest.files.iter().filter(|e| set.matches(e)).count();
            let mismatches = self.verify_pass(&manifest, &set, PassKind::Repair).await?;
            report.mismatches.extend(mismatches.items().iter().cloned());
        }

        self.phase(op, OperationState::PostActions);
        Ok(report)
    }
}
