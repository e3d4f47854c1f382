//! Plugin system for the server bundler.
//!
//! Rollup-style hooks: `resolve_id` and `load` are first-match, `transform`
//! and `render_chunk` are chained. Plugins run in `enforce` order.
//!
//! ```ignore
//! use umi_core::bundler::{Plugin, PluginContext, HookResult, LoadResult};
//!
//! struct TextPlugin;
//!
//! impl Plugin for TextPlugin {
//!     fn name(&self) -> &str { "text" }
//!
//!     fn load(&self, id: &str, _ctx: &PluginContext) -> HookResult<Option<LoadResult>> {
//!         if !id.ends_with(".txt") {
//!             return Ok(None);
//!         }
//!         let text = std::fs::read_to_string(id).map_err(|e| self.error("load", e))?;
//!         Ok(Some(LoadResult::code(format!("export default {text:?};"))))
//!     }
//! }
//! ```

use std::path::PathBuf;

/// Result type for plugin hooks.
pub type HookResult<T> = Result<T, PluginError>;

/// Error from a plugin.
#[derive(Debug)]
pub struct PluginError {
    /// Plugin name that caused the error.
    pub plugin: String,
    /// Hook that failed.
    pub hook: &'static str,
    /// Error message.
    pub message: String,
}

impl std::fmt::Display for PluginError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.plugin, self.hook, self.message)
    }
}

impl std::error::Error for PluginError {}

/// Context passed to plugin hooks.
#[derive(Debug, Default)]
pub struct PluginContext {
    /// Project root.
    pub cwd: PathBuf,
    /// Whether this build belongs to a watch session.
    pub watch: bool,
}

impl PluginContext {
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            watch: false,
        }
    }
}

/// Result of the resolve hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveIdResult {
    /// Resolved module id, usually an absolute file path.
    pub id: String,
    /// Leave the import to the runtime `require`.
    pub external: bool,
}

impl ResolveIdResult {
    pub fn resolved(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            external: false,
        }
    }

    pub fn external(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            external: true,
        }
    }
}

/// Result of the load hook. The code must be JavaScript (ESM or CJS).
#[derive(Debug, Clone)]
pub struct LoadResult {
    pub code: String,
}

impl LoadResult {
    pub fn code(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

/// Result of the transform hook.
#[derive(Debug, Clone)]
pub struct TransformResult {
    pub code: String,
}

impl TransformResult {
    pub fn code(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

/// Plugin enforcement ordering, as in Vite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum PluginEnforce {
    Pre,
    #[default]
    Normal,
    Post,
}

/// Chunk information passed to `render_chunk`.
#[derive(Debug, Clone)]
pub struct ChunkInfo {
    pub name: String,
    pub is_entry: bool,
    /// Module ids in emission order.
    pub modules: Vec<String>,
}

/// A bundler plugin. Every hook defaults to "not handled".
pub trait Plugin: Send + Sync {
    /// Plugin name for error messages.
    fn name(&self) -> &str;

    fn enforce(&self) -> PluginEnforce {
        PluginEnforce::Normal
    }

    fn build_start(&self, _ctx: &PluginContext) -> HookResult<()> {
        Ok(())
    }

    /// Resolve a specifier. `Some` stops resolution.
    fn resolve_id(
        &self,
        _specifier: &str,
        _importer: Option<&str>,
        _ctx: &PluginContext,
    ) -> HookResult<Option<ResolveIdResult>> {
        Ok(None)
    }

    /// Provide the source of a module. `Some` stops loading.
    fn load(&self, _id: &str, _ctx: &PluginContext) -> HookResult<Option<LoadResult>> {
        Ok(None)
    }

    /// Transform module source. All plugins run in sequence.
    fn transform(
        &self,
        _code: &str,
        _id: &str,
        _ctx: &PluginContext,
    ) -> HookResult<Option<TransformResult>> {
        Ok(None)
    }

    /// Transform the emitted chunk.
    fn render_chunk(
        &self,
        _code: &str,
        _chunk: &ChunkInfo,
        _ctx: &PluginContext,
    ) -> HookResult<Option<String>> {
        Ok(None)
    }

    fn build_end(&self, _ctx: &PluginContext) -> HookResult<()> {
        Ok(())
    }

    /// Build a [`PluginError`] attributed to this plugin.
    fn error(&self, hook: &'static str, message: impl std::fmt::Display) -> PluginError
    where
        Self: Sized,
    {
        PluginError {
            plugin: self.name().to_string(),
            hook,
            message: message.to_string(),
        }
    }
}

/// Ordered set of plugins sharing one context.
pub struct PluginContainer {
    plugins: Vec<Box<dyn Plugin>>,
    ctx: PluginContext,
}

impl PluginContainer {
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            plugins: Vec::new(),
            ctx: PluginContext::new(cwd),
        }
    }

    /// Add a plugin, keeping `Pre` → `Normal` → `Post` order.
    /// Insertion order is preserved within a level.
    pub fn add(&mut self, plugin: Box<dyn Plugin>) {
        self.plugins.push(plugin);
        self.plugins.sort_by_key(|p| p.enforce());
    }

    pub fn set_watch(&mut self, watch: bool) {
        self.ctx.watch = watch;
    }

    #[must_use]
    pub fn context(&self) -> &PluginContext {
        &self.ctx
    }

    pub fn build_start(&self) -> HookResult<()> {
        for plugin in &self.plugins {
            plugin.build_start(&self.ctx)?;
        }
        Ok(())
    }

    pub fn resolve_id(
        &self,
        specifier: &str,
        importer: Option<&str>,
    ) -> HookResult<Option<ResolveIdResult>> {
        for plugin in &self.plugins {
            if let Some(result) = plugin.resolve_id(specifier, importer, &self.ctx)? {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    pub fn load(&self, id: &str) -> HookResult<Option<LoadResult>> {
        for plugin in &self.plugins {
            if let Some(result) = plugin.load(id, &self.ctx)? {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    pub fn transform(&self, code: &str, id: &str) -> HookResult<String> {
        let mut current = code.to_string();
        for plugin in &self.plugins {
            if let Some(result) = plugin.transform(&current, id, &self.ctx)? {
                current = result.code;
            }
        }
        Ok(current)
    }

    pub fn render_chunk(&self, code: &str, chunk: &ChunkInfo) -> HookResult<String> {
        let mut current = code.to_string();
        for plugin in &self.plugins {
            if let Some(transformed) = plugin.render_chunk(&current, chunk, &self.ctx)? {
                current = transformed;
            }
        }
        Ok(current)
    }

    pub fn build_end(&self) -> HookResult<()> {
        for plugin in &self.plugins {
            plugin.build_end(&self.ctx)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Plugin names in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }
}
