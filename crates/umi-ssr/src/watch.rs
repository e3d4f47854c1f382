//! Change sources that drive watch-mode rebuilds.
//!
//! A source yields batches of changed paths on a channel. Dropping the
//! returned [`WatchGuard`] ends the subscription.

use crate::error::SsrError;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::any::Any;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Event coalescing window.
pub const COALESCE_WINDOW_MS: u64 = 50;

/// Pending batches before a slow consumer applies backpressure.
const BATCH_CHANNEL_CAPACITY: usize = 16;

/// Directory names never worth a rebuild.
const IGNORED_DIR_NAMES: &[&str] = &["node_modules", ".git"];

/// Keeps a subscription alive.
pub struct WatchGuard {
    _handle: Option<Box<dyn Any + Send>>,
}

impl WatchGuard {
    pub fn new(handle: impl Any + Send) -> Self {
        Self {
            _handle: Some(Box::new(handle)),
        }
    }

    /// A guard with nothing to release.
    #[must_use]
    pub fn detached() -> Self {
        Self { _handle: None }
    }
}

impl std::fmt::Debug for WatchGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchGuard").finish_non_exhaustive()
    }
}

/// Source of file change batches.
pub trait ChangeSource: Send + Sync {
    /// Start delivering changes under `roots`, skipping anything under `ignored`.
    fn subscribe(
        &self,
        roots: &[PathBuf],
        ignored: &[PathBuf],
    ) -> Result<(WatchGuard, mpsc::Receiver<Vec<PathBuf>>), SsrError>;
}

/// File system watcher backed by `notify`.
#[derive(Debug, Clone)]
pub struct NotifyChangeSource {
    window: Duration,
}

impl Default for NotifyChangeSource {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(COALESCE_WINDOW_MS),
        }
    }
}

impl NotifyChangeSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

impl ChangeSource for NotifyChangeSource {
    fn subscribe(
        &self,
        roots: &[PathBuf],
        ignored: &[PathBuf],
    ) -> Result<(WatchGuard, mpsc::Receiver<Vec<PathBuf>>), SsrError> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<Vec<PathBuf>>();
        let (batch_tx, batch_rx) = mpsc::channel(BATCH_CHANNEL_CAPACITY);
        let ignored = ignored.to_vec();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if !should_process_event(&event) {
                        return;
                    }
                    let paths: Vec<PathBuf> = event
                        .paths
                        .into_iter()
                        .filter(|p| !is_ignored(p, &ignored))
                        .collect();
                    if paths.is_empty() {
                        return;
                    }
                    if let Err(e) = raw_tx.send(paths) {
                        debug!(error = %e, "Watch subscription closed");
                    }
                }
                Err(e) => error!(error = %e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        for root in roots {
            if !root.is_dir() {
                warn!(root = %root.display(), "Skipping missing watch root");
                continue;
            }
            watcher.watch(root, RecursiveMode::Recursive)?;
            info!(root = %root.display(), "Watching directory");
        }

        tokio::spawn(coalesce(raw_rx, batch_tx, self.window));
        Ok((WatchGuard::new(watcher), batch_rx))
    }
}

/// Forward raw events as one batch per quiet window.
async fn coalesce(
    mut raw: mpsc::UnboundedReceiver<Vec<PathBuf>>,
    batches: mpsc::Sender<Vec<PathBuf>>,
    window: Duration,
) {
    let mut pending: BTreeSet<PathBuf> = BTreeSet::new();
    loop {
        match tokio::time::timeout(window, raw.recv()).await {
            Ok(Some(paths)) => pending.extend(paths),
            Ok(None) => {
                debug!("Watch event channel closed");
                break;
            }
            Err(_) => {
                if pending.is_empty() {
                    continue;
                }
                let batch: Vec<PathBuf> = std::mem::take(&mut pending).into_iter().collect();
                debug!(count = batch.len(), "Processing coalesced file events");
                if batches.send(batch).await.is_err() {
                    break;
                }
            }
        }
    }
}

fn should_process_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Whether changes at `path` are irrelevant for a rebuild.
#[must_use]
pub fn is_ignored(path: &Path, ignored: &[PathBuf]) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .is_some_and(|name| IGNORED_DIR_NAMES.contains(&name))
    }) || ignored.iter().any(|root| path.starts_with(root))
}

/// Change source fed by hand, for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct ManualChangeSource {
    inner: Arc<ManualInner>,
}

#[derive(Debug, Default)]
struct ManualInner {
    subscribers: Mutex<Vec<mpsc::Sender<Vec<PathBuf>>>>,
    subscriptions: AtomicUsize,
}

impl ManualChangeSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver one batch to every live subscriber. Returns how many got it.
    pub async fn emit(&self, paths: Vec<PathBuf>) -> usize {
        let subscribers: Vec<_> = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|tx| !tx.is_closed())
            .cloned()
            .collect();

        let mut delivered = 0;
        for tx in subscribers {
            if tx.send(paths.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Subscriptions made so far.
    #[must_use]
    pub fn subscriptions(&self) -> usize {
        self.inner.subscriptions.load(Ordering::SeqCst)
    }
}

impl ChangeSource for ManualChangeSource {
    fn subscribe(
        &self,
        _roots: &[PathBuf],
        _ignored: &[PathBuf],
    ) -> Result<(WatchGuard, mpsc::Receiver<Vec<PathBuf>>), SsrError> {
        let (tx, rx) = mpsc::channel(BATCH_CHANNEL_CAPACITY);
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.push(tx);
        self.inner.subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok((WatchGuard::detached(), rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_is_ignored() {
        let ignored = vec![PathBuf::from("/app/src/.umi/server")];
        assert!(is_ignored(Path::new("/app/node_modules/react/index.js"), &ignored));
        assert!(is_ignored(Path::new("/app/.git/HEAD"), &ignored));
        assert!(is_ignored(
            Path::new("/app/src/.umi/server/umi.server.js"),
            &ignored
        ));
        assert!(!is_ignored(Path::new("/app/src/.umi/server.ts"), &ignored));
        assert!(!is_ignored(Path::new("/app/src/pages/index.tsx"), &ignored));
    }

    #[tokio::test]
    async fn test_coalesces_bursts() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (batch_tx, mut batch_rx) = mpsc::channel(4);
        tokio::spawn(coalesce(raw_rx, batch_tx, Duration::from_millis(20)));

        raw_tx.send(vec![PathBuf::from("/a")]).unwrap();
        raw_tx.send(vec![PathBuf::from("/b"), PathBuf::from("/a")]).unwrap();

        let batch = batch_rx.recv().await.unwrap();
        assert_eq!(batch, vec![PathBuf::from("/a"), PathBuf::from("/b")]);

        drop(raw_tx);
        assert!(batch_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_manual_source_delivers_to_subscribers() {
        let source = ManualChangeSource::new();
        let (_guard, mut rx) = source.subscribe(&[], &[]).unwrap();
        assert_eq!(source.subscriptions(), 1);

        assert_eq!(source.emit(vec![PathBuf::from("/x")]).await, 1);
        assert_eq!(rx.recv().await.unwrap(), vec![PathBuf::from("/x")]);

        drop(rx);
        assert_eq!(source.emit(vec![PathBuf::from("/y")]).await, 0);
    }

    #[tokio::test]
    async fn test_notify_source_reports_changes() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        let source = NotifyChangeSource::new().with_window(Duration::from_millis(20));
        let (_guard, mut rx) = source.subscribe(&[root.clone()], &[]).unwrap();

        // Give the backend a moment to register before writing.
        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(root.join("page.tsx"), "export default 1;").unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(batch.iter().any(|p| p.ends_with("page.tsx")));
    }
}
