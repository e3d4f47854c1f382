//! Style loader for `.css`, `.less`, `.scss` and `.sass` imports.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use umi_core::bundler::{HookResult, LoadResult, Plugin, PluginContext};
use umi_core::css::{compile_style, is_css_module, style_module_js, StyleLang};
use umi_core::paths::module_id;
use umi_core::CssManifest;

/// Stylesheets seen during one server build.
#[derive(Debug, Default)]
pub struct StyleCollector {
    used: Vec<(String, String)>,
    generated: CssManifest,
}

impl StyleCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, id: &str, css: &str, generated: bool) {
        if generated {
            self.generated.insert(id, css);
        }
        if let Some(slot) = self.used.iter_mut().find(|(used, _)| used == id) {
            slot.1 = css.to_string();
        } else {
            self.used.push((id.to_string(), css.to_string()));
        }
    }

    /// Entries compiled by this build that the manifest did not have.
    #[must_use]
    pub fn generated(&self) -> &CssManifest {
        &self.generated
    }

    /// Stylesheets in load order, joined into one sheet.
    #[must_use]
    pub fn stylesheet(&self) -> String {
        let mut out = String::new();
        for (id, css) in &self.used {
            if css.is_empty() {
                continue;
            }
            out.push_str("/* ");
            out.push_str(id);
            out.push_str(" */\n");
            out.push_str(css.trim_end());
            out.push('\n');
        }
        out
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }
}

/// Compiles style imports, preferring stylesheets the client pass already
/// recorded in the CSS manifest.
///
/// CSS Modules are always compiled since the class map is only known from
/// compilation.
pub struct StylePlugin {
    cwd: PathBuf,
    manifest: Arc<CssManifest>,
    collector: Arc<Mutex<StyleCollector>>,
}

impl StylePlugin {
    pub fn new(
        cwd: &Path,
        manifest: Arc<CssManifest>,
        collector: Arc<Mutex<StyleCollector>>,
    ) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
            manifest,
            collector,
        }
    }

    fn record(&self, id: &str, css: &str, generated: bool) {
        self.collector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(id, css, generated);
    }
}

impl Plugin for StylePlugin {
    fn name(&self) -> &'static str {
        "style-loader"
    }

    fn load(&self, id: &str, _ctx: &PluginContext) -> HookResult<Option<LoadResult>> {
        let path = Path::new(id);
        if StyleLang::from_path(path).is_none() {
            return Ok(None);
        }
        let key = module_id(&self.cwd, path);

        if !is_css_module(path) {
            if let Some(css) = self.manifest.get(&key) {
                self.record(&key, css, false);
                return Ok(Some(LoadResult::code("export default {};\n")));
            }
        }

        let source = std::fs::read_to_string(path)
            .map_err(|e| self.error("load", format!("{id}: {e}")))?;
        let result =
            compile_style(path, &source, true).map_err(|e| self.error("load", format!("{key}: {e}")))?;
        self.record(&key, &result.code, true);

        Ok(Some(LoadResult::code(style_module_js(&result.exports))))
    }
}
