//! Build Event Coordinator.
//!
//! Receives the client bundler's lifecycle events and drives the server
//! build. In development the first compile of a session restores the
//! manifest cache, builds once, and subscribes to file changes; later
//! compiles only record their manifests. Each watched rebuild runs as one
//! sequential pipeline: build, absorb generated CSS, save the manifest cache,
//! invalidate the module cache, announce readiness.

use crate::builder::{BuildReport, ServerBuild};
use crate::error::SsrError;
use crate::module_cache::ModuleCacheInvalidator;
use crate::watch::{ChangeSource, WatchGuard};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use umi_core::manifest::{read_production_manifest, SessionKind};
use umi_core::paths::ManifestCachePaths;
use umi_core::{AssetsManifest, BuildSession, CssManifest, ManifestStore};

/// Buffered rebuild events per subscriber.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Manifests reported by an incremental dev compile.
#[derive(Debug, Clone, Default)]
pub struct DevCompilePayload {
    pub css: Option<CssManifest>,
    pub assets: Option<AssetsManifest>,
}

/// Result of a full production client build.
#[derive(Debug, Clone, Default)]
pub struct BuildCompletePayload {
    /// Set when the client build failed.
    pub err: Option<String>,
    pub css: Option<CssManifest>,
    /// Read from the output directory when absent.
    pub assets: Option<AssetsManifest>,
}

/// Outcome of a watched build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildEvent {
    /// A new module is on disk and the stale one is evicted.
    Ready {
        session: BuildSession,
        path: PathBuf,
        digest: String,
        duration: Duration,
    },
    /// The build failed; the previous module keeps serving.
    Failed {
        session: BuildSession,
        message: String,
    },
}

/// Where the coordinator keeps and finds manifests on disk.
#[derive(Debug, Clone)]
pub struct CoordinatorPaths {
    pub cache: ManifestCachePaths,
    /// Client manifest candidates for production builds, in lookup order.
    pub production_manifests: Vec<PathBuf>,
}

/// Everything a build needs, shared with the rebuild task.
struct Pipeline {
    store: Arc<ManifestStore>,
    builder: Arc<dyn ServerBuild>,
    invalidator: ModuleCacheInvalidator,
    cache: ManifestCachePaths,
    events: broadcast::Sender<RebuildEvent>,
}

impl Pipeline {
    /// Build from a fresh snapshot on the blocking pool.
    async fn build(&self) -> Result<BuildReport, SsrError> {
        let snapshot = self.store.snapshot();
        let builder = Arc::clone(&self.builder);
        tokio::task::spawn_blocking(move || builder.build(&snapshot)).await?
    }

    /// One watched build, start to announcement.
    async fn rebuild(&self) -> Option<BuildReport> {
        let session = self.store.session();
        match self.build().await {
            Ok(report) => {
                self.store.absorb_generated(&report.generated_css);
                if let Err(e) = self.store.save_cache(&self.cache) {
                    warn!(error = %e, "Failed to save manifest cache");
                }
                self.invalidator.invalidate(&report.written);
                let _ = self.events.send(RebuildEvent::Ready {
                    session: report.session,
                    path: report.written.path().to_path_buf(),
                    digest: report.written.digest().to_string(),
                    duration: report.duration,
                });
                Some(report)
            }
            Err(e) => {
                error!(session = %session, error = %e, "Server build failed, keeping previous module");
                let _ = self.events.send(RebuildEvent::Failed {
                    session,
                    message: e.to_string(),
                });
                None
            }
        }
    }
}

#[derive(Default)]
struct DevState {
    built: bool,
    started: bool,
    guard: Option<WatchGuard>,
    task: Option<JoinHandle<()>>,
}

/// Drives server builds from client build events.
pub struct BuildEventCoordinator {
    pipeline: Arc<Pipeline>,
    changes: Arc<dyn ChangeSource>,
    production_manifests: Vec<PathBuf>,
    dev: Mutex<DevState>,
}

impl BuildEventCoordinator {
    pub fn new(
        store: Arc<ManifestStore>,
        builder: Arc<dyn ServerBuild>,
        invalidator: ModuleCacheInvalidator,
        changes: Arc<dyn ChangeSource>,
        paths: CoordinatorPaths,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            pipeline: Arc::new(Pipeline {
                store,
                builder,
                invalidator,
                cache: paths.cache,
                events,
            }),
            changes,
            production_manifests: paths.production_manifests,
            dev: Mutex::new(DevState::default()),
        }
    }

    /// Rebuild announcements.
    pub fn subscribe(&self) -> broadcast::Receiver<RebuildEvent> {
        self.pipeline.events.subscribe()
    }

    #[must_use]
    pub fn store(&self) -> &Arc<ManifestStore> {
        &self.pipeline.store
    }

    /// Whether the dev change source has been started.
    pub async fn is_watching(&self) -> bool {
        self.dev.lock().await.started
    }

    /// Handle an incremental dev compile.
    ///
    /// Only fails when the change source cannot be started; build errors are
    /// logged and announced, and the dev server keeps running.
    pub async fn on_dev_compile_done(&self, payload: DevCompilePayload) -> Result<BuildSession, SsrError> {
        let mut state = self.dev.lock().await;
        let store = &self.pipeline.store;

        if state.built {
            let session = store.merge(SessionKind::Dev, payload.css.as_ref(), payload.assets.as_ref());
            debug!(session = %session, "Dev compile recorded");
            if state.started {
                return Ok(session);
            }
            // The initial build ran but the change source failed to start.
            self.start_watching(&mut state)?;
            info!(session = %session, "Server bundle watch started");
            return Ok(session);
        }

        match store.restore_cache(&self.pipeline.cache) {
            Ok(report) => {
                for (path, reason) in &report.skipped {
                    debug!(path = %path.display(), reason = %reason, "Manifest cache entry skipped");
                }
                if report.restored_anything() {
                    info!(
                        css = report.css_entries,
                        assets = report.assets_entries,
                        "Manifest cache restored"
                    );
                }
            }
            Err(e) => warn!(error = %e, "Failed to restore manifest cache"),
        }
        let session = store.merge(SessionKind::Dev, payload.css.as_ref(), payload.assets.as_ref());

        self.pipeline.rebuild().await;
        state.built = true;

        self.start_watching(&mut state)?;
        info!(session = %session, "Server bundle watch started");

        Ok(session)
    }

    fn start_watching(&self, state: &mut DevState) -> Result<(), SsrError> {
        let builder = &self.pipeline.builder;
        let (guard, changes) = self
            .changes
            .subscribe(&builder.watch_roots(), &builder.ignored_roots())?;
        state.task = Some(tokio::spawn(rebuild_loop(Arc::clone(&self.pipeline), changes)));
        state.guard = Some(guard);
        state.started = true;
        Ok(())
    }

    /// Handle the end of a production client build.
    ///
    /// A failed client build is returned as [`SsrError::ClientBuild`] without
    /// building. Manifest and build errors are fatal.
    pub async fn on_build_complete(&self, payload: BuildCompletePayload) -> Result<BuildReport, SsrError> {
        if let Some(err) = payload.err {
            error!(error = %err, "Client build failed, skipping server bundle");
            return Err(SsrError::ClientBuild(err));
        }

        let assets = match payload.assets {
            Some(assets) => assets,
            None => read_production_manifest(&self.production_manifests)?,
        };
        let session = self
            .pipeline
            .store
            .replace(SessionKind::Production, payload.css, Some(assets));
        debug!(session = %session, "Production manifests recorded");

        let report = self.pipeline.build().await?;
        self.pipeline.store.absorb_generated(&report.generated_css);
        self.pipeline.invalidator.invalidate(&report.written);
        Ok(report)
    }

    /// Stop watching. Later dev compiles only record manifests.
    pub async fn shutdown(&self) {
        let mut state = self.dev.lock().await;
        state.guard = None;
        if let Some(task) = state.task.take() {
            task.abort();
        }
        debug!("Build event coordinator stopped");
    }
}

async fn rebuild_loop(pipeline: Arc<Pipeline>, mut changes: mpsc::Receiver<Vec<PathBuf>>) {
    while let Some(batch) = changes.recv().await {
        debug!(
            count = batch.len(),
            first = %batch.first().map(|p| p.display().to_string()).unwrap_or_default(),
            "Changes detected, rebuilding server bundle"
        );
        pipeline.rebuild().await;
    }
    debug!("Change source closed");
}

impl std::fmt::Debug for BuildEventCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildEventCoordinator").finish_non_exhaustive()
    }
}
