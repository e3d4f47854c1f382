//! Fakes shared by the SSR integration tests.

#![allow(dead_code)]

use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use umi_core::bundler::BundleError;
use umi_core::{CssManifest, ManifestSnapshot};
use umi_ssr::{
    BuildReport, ModuleLoader, RenderHandler, RenderOutcome, RenderRequest, RenderResponse,
    ServerBuild, SsrError, WrittenModule,
};

/// Writes `v<n>` to the output on build `n`.
pub struct FakeBuild {
    output: PathBuf,
    builds: AtomicUsize,
    fail: AtomicBool,
    snapshots: Mutex<Vec<ManifestSnapshot>>,
}

impl FakeBuild {
    pub fn new(output: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            output,
            builds: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            snapshots: Mutex::new(Vec::new()),
        })
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn snapshots(&self) -> Vec<ManifestSnapshot> {
        self.snapshots.lock().unwrap().clone()
    }
}

impl ServerBuild for FakeBuild {
    fn build(&self, snapshot: &ManifestSnapshot) -> Result<BuildReport, SsrError> {
        let n = self.builds.fetch_add(1, Ordering::SeqCst) + 1;
        self.snapshots.lock().unwrap().push(snapshot.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(SsrError::Bundle(BundleError {
                code: "BUNDLE_RESOLVE_ERROR",
                message: "Cannot resolve './missing'".to_string(),
                path: None,
            }));
        }

        let written = WrittenModule::commit(&self.output, format!("v{n}").as_bytes())?;
        let mut generated = CssManifest::new();
        generated.insert(format!("src/gen{n}.less"), format!(".g{n}{{}}"));
        Ok(BuildReport {
            written,
            session: snapshot.session,
            generated_css: generated,
            modules: 1,
            duration: Duration::ZERO,
        })
    }

    fn watch_roots(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    fn output_path(&self) -> &Path {
        &self.output
    }
}

/// Renders the module file's content as the response body.
pub struct FileLoader {
    loads: AtomicUsize,
}

impl FileLoader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            loads: AtomicUsize::new(0),
        })
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

struct FileHandler {
    content: String,
}

impl RenderHandler for FileHandler {
    fn render<'a>(
        &'a self,
        request: &'a RenderRequest,
    ) -> BoxFuture<'a, Result<RenderOutcome, SsrError>> {
        Box::pin(async move {
            match self.content.trim() {
                "next" => Ok(RenderOutcome::Next),
                "throw" => Err(SsrError::Render("ReferenceError: window is not defined".into())),
                "panic" => panic!("handler exploded"),
                content => Ok(RenderOutcome::Response(
                    RenderResponse::new(200, content).header("x-url", request.url.clone()),
                )),
            }
        })
    }
}

impl ModuleLoader for FileLoader {
    fn load<'a>(
        &'a self,
        path: &'a Path,
    ) -> BoxFuture<'a, Result<Arc<dyn RenderHandler>, SsrError>> {
        Box::pin(async move {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let content = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| SsrError::Load {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
            let handler: Arc<dyn RenderHandler> = Arc::new(FileHandler { content });
            Ok(handler)
        })
    }
}

/// A [`FileLoader`] whose first load pauses after reading the file until
/// [`GatedLoader::release`] is called.
pub struct GatedLoader {
    inner: Arc<FileLoader>,
    gated: AtomicBool,
    read: Notify,
    release: Notify,
}

impl GatedLoader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: FileLoader::new(),
            gated: AtomicBool::new(true),
            read: Notify::new(),
            release: Notify::new(),
        })
    }

    /// Wait until the first load has read the module file.
    pub async fn wait_until_read(&self) {
        self.read.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn loads(&self) -> usize {
        self.inner.loads()
    }
}

impl ModuleLoader for GatedLoader {
    fn load<'a>(
        &'a self,
        path: &'a Path,
    ) -> BoxFuture<'a, Result<Arc<dyn RenderHandler>, SsrError>> {
        Box::pin(async move {
            let handler = self.inner.load(path).await?;
            if self.gated.swap(false, Ordering::SeqCst) {
                self.read.notify_one();
                self.release.notified().await;
            }
            Ok(handler)
        })
    }
}
