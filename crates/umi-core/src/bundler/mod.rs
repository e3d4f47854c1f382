//! Server bundler.
//!
//! Bundles a Node.js entry point and everything it imports by path into one
//! CommonJS file. Package imports stay runtime `require()` calls.
//!
//! ## Usage
//!
//! ```ignore
//! use umi_core::bundler::{Bundler, BundleOptions};
//!
//! let bundler = Bundler::new(cwd).plugin(Box::new(MyLoader));
//! let result = bundler.bundle(&entry, &BundleOptions::default())?;
//! umi_util::fs::atomic_write(&out, result.code.as_bytes())?;
//! ```
//!
//! ## Pipeline
//!
//! 1. **Resolve** - plugins first, then file probing for path specifiers
//! 2. **Load** - plugins first, then the file system (`.json` is wrapped)
//! 3. **Transpile** - script modules go through the [`Transpiler`]
//! 4. **Transform** - plugin `transform` chain
//! 5. **Emit** - module registry with ESM → CJS rewriting, then `render_chunk`

mod emit;
mod graph;
mod plugin;
mod resolve;
mod scan;
mod transpile;

pub use emit::emit_cjs;
pub use graph::{Dependency, Module, ModuleGraph, ModuleId};
pub use plugin::{
    ChunkInfo, HookResult, LoadResult, Plugin, PluginContainer, PluginContext, PluginEnforce,
    PluginError, ResolveIdResult, TransformResult,
};
pub use resolve::{is_path_specifier, is_script, probe, resolve_file, RESOLVE_EXTENSIONS};
pub use scan::{join_multiline_statements, scan_imports, Import, ImportKind};
pub use transpile::{default_transpiler, PassthroughTranspiler, TranspileError, Transpiler};
#[cfg(feature = "swc")]
pub use transpile::SwcTranspiler;

use rustc_hash::FxHashMap as HashMap;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// Bundle options.
#[derive(Debug, Clone, Default)]
pub struct BundleOptions {
    /// Package prefixes that are always external, even if a plugin would resolve them.
    pub external: Vec<String>,
    /// Text placed before the bundle.
    pub banner: Option<String>,
}

/// Bundle result.
#[derive(Debug)]
pub struct BundleResult {
    /// The bundled CommonJS code.
    pub code: String,
    /// Module ids in emission order, entry first.
    pub modules: Vec<String>,
    /// External requests left to the runtime `require`.
    pub externals: Vec<String>,
}

/// Bundler error.
#[derive(Debug)]
pub struct BundleError {
    pub code: &'static str,
    pub message: String,
    pub path: Option<String>,
}

impl BundleError {
    fn new(code: &'static str, message: impl Into<String>, path: Option<&str>) -> Self {
        Self {
            code,
            message: message.into(),
            path: path.map(str::to_string),
        }
    }
}

impl std::fmt::Display for BundleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(path) = &self.path {
            write!(f, "{}: {} ({})", self.code, self.message, path)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl std::error::Error for BundleError {}

impl From<PluginError> for BundleError {
    fn from(err: PluginError) -> Self {
        Self::new(codes::PLUGIN_ERROR, err.to_string(), None)
    }
}

/// Stable error codes.
pub mod codes {
    pub const ENTRY_NOT_FOUND: &str = "BUNDLE_ENTRY_NOT_FOUND";
    pub const READ_ERROR: &str = "BUNDLE_READ_ERROR";
    pub const RESOLVE_ERROR: &str = "BUNDLE_RESOLVE_ERROR";
    pub const NO_LOADER: &str = "BUNDLE_NO_LOADER";
    pub const TRANSPILE_ERROR: &str = "BUNDLE_TRANSPILE_ERROR";
    pub const PLUGIN_ERROR: &str = "PLUGIN_ERROR";
}

/// The server bundler.
pub struct Bundler {
    cwd: PathBuf,
    plugins: PluginContainer,
    transpiler: Box<dyn Transpiler>,
}

impl Bundler {
    /// Create a bundler rooted at `cwd` with the default transpiler.
    #[must_use]
    pub fn new(cwd: &Path) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
            plugins: PluginContainer::new(cwd.to_path_buf()),
            transpiler: default_transpiler(),
        }
    }

    /// Add a plugin.
    pub fn plugin(mut self, plugin: Box<dyn Plugin>) -> Self {
        self.plugins.add(plugin);
        self
    }

    /// Replace the transpiler.
    pub fn with_transpiler(mut self, transpiler: Box<dyn Transpiler>) -> Self {
        self.transpiler = transpiler;
        self
    }

    /// Mark the build as part of a watch session.
    pub fn watch(mut self, watch: bool) -> Self {
        self.plugins.set_watch(watch);
        self
    }

    /// Bundle from an entry point.
    pub fn bundle(&self, entry: &Path, options: &BundleOptions) -> Result<BundleResult, BundleError> {
        self.plugins.build_start()?;

        let mut graph = ModuleGraph::new();
        let entry_id = self.build_graph(entry, &mut graph, options)?;

        let code = emit_cjs(&graph, entry_id, &self.cwd, options.banner.as_deref());
        let modules: Vec<String> = graph.iter().map(|(_, m)| m.path.clone()).collect();
        let chunk = ChunkInfo {
            name: "umi.server".to_string(),
            is_entry: true,
            modules: modules.clone(),
        };
        let code = self.plugins.render_chunk(&code, &chunk)?;

        self.plugins.build_end()?;

        Ok(BundleResult {
            code,
            externals: graph.externals(),
            modules,
        })
    }

    fn build_graph(
        &self,
        entry: &Path,
        graph: &mut ModuleGraph,
        options: &BundleOptions,
    ) -> Result<ModuleId, BundleError> {
        let entry_path = if entry.is_absolute() {
            entry.to_path_buf()
        } else {
            self.cwd.join(entry)
        };
        let entry_path = dunce::canonicalize(&entry_path).map_err(|e| {
            BundleError::new(
                codes::ENTRY_NOT_FOUND,
                format!("Cannot find entry point: {e}"),
                Some(&entry.display().to_string()),
            )
        })?;
        let entry_key = entry_path.display().to_string();
        let (entry_id, _) = graph.reserve(&entry_key);

        let mut queue: VecDeque<(ModuleId, String)> = VecDeque::new();
        queue.push_back((entry_id, entry_key));

        while let Some((id, path)) = queue.pop_front() {
            let code = self.load_module(&path)?;
            let code = self
                .plugins
                .transform(&code, &path)
                .map_err(|e| BundleError::new(codes::PLUGIN_ERROR, e.to_string(), Some(&path)))?;
            let code = join_multiline_statements(&code);
            let imports = scan_imports(&code);

            let mut dependencies = HashMap::default();
            for import in &imports {
                let dependency = match self.resolve_import(&import.specifier, &path, options)? {
                    Resolved::External(request) => Dependency::External(request),
                    Resolved::Module(target) => {
                        // Reserving before loading gives cycles a shared id.
                        let (dep_id, is_new) = graph.reserve(&target);
                        if is_new {
                            queue.push_back((dep_id, target));
                        }
                        Dependency::Internal(dep_id)
                    }
                };
                dependencies.insert(import.specifier.clone(), dependency);
            }

            graph.set(
                id,
                Module {
                    path,
                    code,
                    imports,
                    dependencies,
                },
            );
        }

        Ok(entry_id)
    }

    fn resolve_import(
        &self,
        specifier: &str,
        importer: &str,
        options: &BundleOptions,
    ) -> Result<Resolved, BundleError> {
        if options
            .external
            .iter()
            .any(|prefix| specifier == prefix || specifier.starts_with(&format!("{prefix}/")))
        {
            return Ok(Resolved::External(specifier.to_string()));
        }

        let hook = self
            .plugins
            .resolve_id(specifier, Some(importer))
            .map_err(|e| BundleError::new(codes::PLUGIN_ERROR, e.to_string(), Some(importer)))?;
        if let Some(result) = hook {
            if result.external {
                return Ok(Resolved::External(result.id));
            }
            let id = Path::new(&result.id);
            // Plugins may return extension-less paths or virtual ids.
            let id = if id.is_absolute() {
                probe(id).map_or(result.id, |p| p.display().to_string())
            } else {
                result.id
            };
            return Ok(Resolved::Module(id));
        }

        if is_path_specifier(specifier) {
            let importer_dir = Path::new(importer).parent().unwrap_or(&self.cwd);
            return resolve_file(specifier, importer_dir)
                .map(|p| Resolved::Module(p.display().to_string()))
                .ok_or_else(|| {
                    BundleError::new(
                        codes::RESOLVE_ERROR,
                        format!("Cannot resolve '{specifier}'"),
                        Some(importer),
                    )
                });
        }

        Ok(Resolved::External(specifier.to_string()))
    }

    fn load_module(&self, id: &str) -> Result<String, BundleError> {
        let loaded = self
            .plugins
            .load(id)
            .map_err(|e| BundleError::new(codes::PLUGIN_ERROR, e.to_string(), Some(id)))?;
        if let Some(result) = loaded {
            return Ok(result.code);
        }

        let path = Path::new(id);
        let is_json = path.extension().is_some_and(|e| e == "json");
        if !is_script(path) && !is_json {
            return Err(BundleError::new(
                codes::NO_LOADER,
                "No loader handles this file type",
                Some(id),
            ));
        }

        let source = std::fs::read_to_string(path).map_err(|e| {
            BundleError::new(codes::READ_ERROR, format!("Failed to read file: {e}"), Some(id))
        })?;

        if is_json {
            return Ok(format!("module.exports = {};", source.trim()));
        }

        self.transpiler.transpile(path, &source).map_err(|e| {
            BundleError::new(codes::TRANSPILE_ERROR, e.message, Some(id))
        })
    }
}

/// Outcome of resolving one specifier.
enum Resolved {
    Module(String),
    External(String),
}
