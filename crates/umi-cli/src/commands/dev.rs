//! `umi dev` command implementation.
//!
//! Serves the client build output and, with SSR enabled, renders page
//! requests through the compiled server module:
//!
//! ```text
//! client manifest written ──► on_dev_compile_done ──► server build
//!                                                       │
//! src/ changes ──► coalesced batch ──► rebuild ──► invalidate cached module
//!
//! GET /page ──► intercept ──► render module ──► response | static files
//! ```

use axum::{middleware, Router};
use miette::{IntoDiagnostic, Result};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tower_http::services::ServeDir;
use tracing::{debug, error, info, warn};
use umi_core::manifest::{read_production_manifest, SessionKind};
use umi_core::{AssetsManifest, Config, Env, ManifestStore, UmiPaths, UserConfig};
use umi_ssr::{
    intercept, BuildEventCoordinator, ChangeSource, CoordinatorPaths, DevCompilePayload,
    ModuleCache, ModuleCacheInvalidator, NodeModuleLoader, NotifyChangeSource, RebuildEvent,
    RequestInterceptor, ServerBuild, ServerBundleBuilder, WatchGuard,
};

/// Dev server action.
#[derive(Debug, Clone)]
pub struct DevAction {
    pub config: Config,
    /// Port to listen on.
    pub port: u16,
    /// Host to bind to.
    pub host: String,
}

/// SSR machinery kept alive for the lifetime of the server.
struct SsrSession {
    coordinator: Arc<BuildEventCoordinator>,
    interceptor: Arc<RequestInterceptor>,
    _manifest_watch: WatchGuard,
}

pub async fn run(action: DevAction) -> Result<()> {
    let user = super::project_config(&action.config.cwd)?;
    let paths = UmiPaths::new(&action.config.cwd, Env::Development, &user);

    let mut app = Router::new().fallback_service(ServeDir::new(&paths.output));

    let ssr = if user.ssr_enabled() {
        let session = start_ssr(&paths, &user).await?;
        app = app.layer(middleware::from_fn_with_state(
            Arc::clone(&session.interceptor),
            intercept,
        ));
        Some(session)
    } else {
        debug!("SSR disabled, serving static output only");
        None
    };

    let host_ip = if action.host == "localhost" {
        "127.0.0.1".to_string()
    } else {
        action.host.clone()
    };
    let addr: SocketAddr = format!("{host_ip}:{}", action.port)
        .parse()
        .into_diagnostic()?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()?;
    let local = listener.local_addr().into_diagnostic()?;
    info!(addr = %local, ssr = ssr.is_some(), "Dev server listening");
    if !action.config.json_logs {
        println!();
        println!("  Dev server running at http://{}:{}", action.host, local.port());
        println!("  Press Ctrl+C to stop");
        println!();
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .into_diagnostic()?;

    if let Some(ssr) = ssr {
        ssr.coordinator.shutdown().await;
    }
    info!("Dev server stopped");
    Ok(())
}

/// Wire the coordinator to the client output and fire the first compile.
async fn start_ssr(paths: &UmiPaths, user: &UserConfig) -> Result<SsrSession> {
    let cache = Arc::new(ModuleCache::new());
    let builder = ServerBundleBuilder::new(paths, user).watch(true);
    let module_path = builder.output_path().to_path_buf();
    let changes: Arc<dyn ChangeSource> = Arc::new(NotifyChangeSource::new());

    let coordinator = Arc::new(BuildEventCoordinator::new(
        Arc::new(ManifestStore::new(SessionKind::Dev)),
        Arc::new(builder),
        ModuleCacheInvalidator::new(Arc::clone(&cache)),
        Arc::clone(&changes),
        CoordinatorPaths {
            cache: paths.manifest_cache(),
            production_manifests: paths.manifest_candidates(user),
        },
    ));
    tokio::spawn(log_rebuilds(coordinator.subscribe()));

    let candidates = paths.manifest_candidates(user);
    coordinator
        .on_dev_compile_done(DevCompilePayload {
            css: None,
            assets: current_manifest(&candidates),
        })
        .await
        .into_diagnostic()?;

    tokio::fs::create_dir_all(&paths.output)
        .await
        .into_diagnostic()?;
    let (guard, batches) = changes
        .subscribe(std::slice::from_ref(&paths.output), &[])
        .into_diagnostic()?;
    tokio::spawn(forward_manifest_changes(
        Arc::clone(&coordinator),
        candidates,
        batches,
    ));

    let loader = Arc::new(NodeModuleLoader::new());
    Ok(SsrSession {
        coordinator,
        interceptor: Arc::new(RequestInterceptor::new(module_path, cache, loader)),
        _manifest_watch: guard,
    })
}

/// The client manifest as currently on disk, if any.
fn current_manifest(candidates: &[PathBuf]) -> Option<AssetsManifest> {
    match read_production_manifest(candidates) {
        Ok(manifest) => Some(manifest),
        Err(e) => {
            debug!(error = %e, "No client manifest yet");
            None
        }
    }
}

/// Each rewrite of the client manifest counts as a finished dev compile.
async fn forward_manifest_changes(
    coordinator: Arc<BuildEventCoordinator>,
    candidates: Vec<PathBuf>,
    mut batches: mpsc::Receiver<Vec<PathBuf>>,
) {
    while let Some(batch) = batches.recv().await {
        if !batch.iter().any(|path| is_candidate(path, &candidates)) {
            continue;
        }
        let Some(assets) = current_manifest(&candidates) else {
            continue;
        };
        if let Err(e) = coordinator
            .on_dev_compile_done(DevCompilePayload {
                css: None,
                assets: Some(assets),
            })
            .await
        {
            error!(error = %e, "Failed to record dev compile");
        }
    }
}

fn is_candidate(path: &Path, candidates: &[PathBuf]) -> bool {
    candidates
        .iter()
        .any(|c| c == path || c.file_name() == path.file_name())
}

async fn log_rebuilds(mut events: broadcast::Receiver<RebuildEvent>) {
    loop {
        match events.recv().await {
            Ok(RebuildEvent::Ready {
                session,
                path,
                duration,
                ..
            }) => info!(
                session = %session,
                path = %path.display(),
                ms = duration.as_millis() as u64,
                "Server bundle ready"
            ),
            Ok(RebuildEvent::Failed { session, message }) => {
                warn!(session = %session, error = %message, "Server bundle failed");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Rebuild log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}
