use std::path::{Path, PathBuf};
use std::sync::Arc;
use umi_core::bundler::{HookResult, LoadResult, Plugin, PluginContext};
use umi_core::css::js_string;
use umi_core::paths::module_id;
use umi_core::AssetsManifest;

/// Loads `.svg` imports as their public URL.
///
/// Falls back to an inline data URI when the assets manifest has no entry,
/// which is the case for SVGs the client build inlined.
pub struct SvgPlugin {
    cwd: PathBuf,
    assets: Arc<AssetsManifest>,
}

impl SvgPlugin {
    pub fn new(cwd: &Path, assets: Arc<AssetsManifest>) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
            assets,
        }
    }
}

impl Plugin for SvgPlugin {
    fn name(&self) -> &'static str {
        "svg-loader"
    }

    fn load(&self, id: &str, _ctx: &PluginContext) -> HookResult<Option<LoadResult>> {
        if super::extension(id).as_deref() != Some("svg") {
            return Ok(None);
        }
        let key = module_id(&self.cwd, Path::new(id));
        let url = match self.assets.lookup(&key) {
            Some(url) => url.to_string(),
            None => {
                let source = std::fs::read_to_string(id)
                    .map_err(|e| self.error("load", format!("{id}: {e}")))?;
                svg_data_uri(&source)
            }
        };
        Ok(Some(LoadResult::code(format!(
            "export default {};\n",
            js_string(&url)
        ))))
    }
}

/// Compact `data:image/svg+xml` URI for an SVG document.
///
/// Whitespace runs collapse to one space, double quotes become single quotes,
/// and only the characters URIs cannot carry are percent-encoded.
#[must_use]
pub fn svg_data_uri(svg: &str) -> String {
    let collapsed = svg.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = String::from("data:image/svg+xml,");
    for c in collapsed.replace('"', "'").chars() {
        match c {
            '%' => out.push_str("%25"),
            '#' => out.push_str("%23"),
            '<' => out.push_str("%3C"),
            '>' => out.push_str("%3E"),
            '{' => out.push_str("%7B"),
            '}' => out.push_str("%7D"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_manifest_url() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("src/logo.svg");
        let mut assets = AssetsManifest::new();
        assets.insert("logo.svg", "/static/logo.8f2a.svg");

        let plugin = SvgPlugin::new(dir.path(), Arc::new(assets));
        let loaded = plugin
            .load(&file.display().to_string(), &PluginContext::default())
            .unwrap()
            .unwrap();
        assert_eq!(loaded.code, "export default \"/static/logo.8f2a.svg\";\n");
    }

    #[test]
    fn test_inline_fallback() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("icon.svg");
        fs::write(
            &file,
            "<svg xmlns=\"http://www.w3.org/2000/svg\">\n  <path fill=\"#000\"/>\n</svg>\n",
        )
        .unwrap();

        let plugin = SvgPlugin::new(dir.path(), Arc::new(AssetsManifest::new()));
        let loaded = plugin
            .load(&file.display().to_string(), &PluginContext::default())
            .unwrap()
            .unwrap();
        assert!(loaded
            .code
            .contains("data:image/svg+xml,%3Csvg xmlns='http://www.w3.org/2000/svg'%3E %3Cpath fill='%23000'/%3E %3C/svg%3E"));
    }

    #[test]
    fn test_other_files_pass() {
        let plugin = SvgPlugin::new(Path::new("/app"), Arc::new(AssetsManifest::new()));
        assert!(plugin
            .load("/app/a.png", &PluginContext::default())
            .unwrap()
            .is_none());
    }
}
