//! Server Bundle Builder.
//!
//! Compiles the server entry into one CommonJS module with the loader plugins
//! reading from a manifest snapshot. Output goes through an atomic write, so
//! a failed build leaves the previous module in place and readers never see
//! a partial file.

use crate::error::SsrError;
use crate::plugins::{server_plugins, LoaderContext, StyleCollector};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use umi_core::bundler::{BundleOptions, Bundler};
use umi_core::{BuildSession, CssManifest, ManifestSnapshot, UmiPaths, UserConfig};
use umi_util::fs::atomic_write;
use umi_util::hash::short_hash;

const BANNER: &str = "/* umi.server.js: generated, do not edit */";

/// Proof that a server module was completely written to disk.
///
/// Only [`WrittenModule::commit`] creates one, after the rename that makes
/// the new content visible. Cache invalidation takes this value, which keeps
/// it from running before the write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenModule {
    path: PathBuf,
    stylesheet: Option<PathBuf>,
    digest: String,
}

impl WrittenModule {
    /// Atomically write `code` to `path`.
    pub fn commit(path: &Path, code: &[u8]) -> Result<Self, SsrError> {
        atomic_write(path, code).map_err(|e| SsrError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            stylesheet: None,
            digest: short_hash(code, 12),
        })
    }

    fn with_stylesheet(mut self, stylesheet: Option<PathBuf>) -> Self {
        self.stylesheet = stylesheet;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Co-located stylesheet written with the module, if the build had styles.
    #[must_use]
    pub fn stylesheet(&self) -> Option<&Path> {
        self.stylesheet.as_deref()
    }

    /// Short content hash of the module.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// Result of a successful server build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub written: WrittenModule,
    /// Session of the snapshot the build read.
    pub session: BuildSession,
    /// Stylesheets compiled by this build that the CSS manifest lacked.
    pub generated_css: CssManifest,
    /// Number of modules bundled.
    pub modules: usize,
    pub duration: Duration,
}

/// Something that produces the compiled server module from a snapshot.
///
/// Builds are synchronous and run on the blocking pool.
pub trait ServerBuild: Send + Sync + 'static {
    fn build(&self, snapshot: &ManifestSnapshot) -> Result<BuildReport, SsrError>;

    /// Directories whose changes call for a rebuild.
    fn watch_roots(&self) -> Vec<PathBuf>;

    /// Directories whose changes never call for a rebuild, like the output.
    fn ignored_roots(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Where the compiled module is written.
    fn output_path(&self) -> &Path;
}

/// Bundles `<tmp>/server.ts` with the embedded bundler.
#[derive(Debug, Clone)]
pub struct ServerBundleBuilder {
    cwd: PathBuf,
    src: PathBuf,
    entry: PathBuf,
    exports: PathBuf,
    output: PathBuf,
    client_output: PathBuf,
    public_path: String,
    watch: bool,
}

impl ServerBundleBuilder {
    /// Builder for the conventional entry and output paths of a project.
    #[must_use]
    pub fn new(paths: &UmiPaths, config: &UserConfig) -> Self {
        Self {
            cwd: paths.cwd.clone(),
            src: paths.src.clone(),
            entry: paths.server_entry(),
            exports: paths.tmp_exports(),
            output: paths.server_build_path(config),
            client_output: paths.output.clone(),
            public_path: config.public_path(),
            watch: false,
        }
    }

    /// Mark builds as part of a watch session.
    #[must_use]
    pub fn watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    #[must_use]
    pub fn entry(&self) -> &Path {
        &self.entry
    }

    /// Path of the co-located stylesheet.
    #[must_use]
    pub fn stylesheet_path(&self) -> PathBuf {
        self.output.with_extension("css")
    }

    fn write_stylesheet(&self, styles: &StyleCollector) -> Result<Option<PathBuf>, SsrError> {
        let path = self.stylesheet_path();
        if styles.is_empty() {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed stale server stylesheet"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(SsrError::io(&path, e)),
            }
            return Ok(None);
        }
        atomic_write(&path, styles.stylesheet().as_bytes()).map_err(|e| SsrError::io(&path, e))?;
        Ok(Some(path))
    }
}

impl ServerBuild for ServerBundleBuilder {
    fn build(&self, snapshot: &ManifestSnapshot) -> Result<BuildReport, SsrError> {
        let start = Instant::now();
        let styles = Arc::new(Mutex::new(StyleCollector::new()));
        let ctx = LoaderContext {
            cwd: self.cwd.clone(),
            exports: self.exports.clone(),
            public_path: self.public_path.clone(),
            snapshot: snapshot.clone(),
        };

        let mut bundler = Bundler::new(&self.cwd).watch(self.watch);
        for plugin in server_plugins(&ctx, &styles) {
            bundler = bundler.plugin(plugin);
        }

        debug!(session = %snapshot.session, entry = %self.entry.display(), "Building server bundle");
        let result = bundler.bundle(
            &self.entry,
            &BundleOptions {
                banner: Some(BANNER.to_string()),
                ..BundleOptions::default()
            },
        )?;

        let styles = styles.lock().unwrap_or_else(PoisonError::into_inner);
        // The stylesheet goes first so a new module never pairs with old styles.
        let stylesheet = self.write_stylesheet(&styles)?;
        let written = WrittenModule::commit(&self.output, result.code.as_bytes())?
            .with_stylesheet(stylesheet);

        let duration = start.elapsed();
        info!(
            session = %snapshot.session,
            path = %written.path().display(),
            modules = result.modules.len(),
            externals = result.externals.len(),
            duration_ms = duration.as_millis() as u64,
            "Server bundle written"
        );

        Ok(BuildReport {
            written,
            session: snapshot.session,
            generated_css: styles.generated().clone(),
            modules: result.modules.len(),
            duration,
        })
    }

    fn watch_roots(&self) -> Vec<PathBuf> {
        vec![self.src.clone()]
    }

    fn ignored_roots(&self) -> Vec<PathBuf> {
        let mut ignored = vec![self.client_output.clone()];
        if let Some(dir) = self.output.parent() {
            ignored.push(dir.to_path_buf());
        }
        ignored
    }

    fn output_path(&self) -> &Path {
        &self.output
    }
}
