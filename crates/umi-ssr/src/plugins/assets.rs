use std::path::{Path, PathBuf};
use std::sync::Arc;
use umi_core::bundler::{HookResult, LoadResult, Plugin, PluginContext};
use umi_core::css::js_string;
use umi_core::paths::module_id;
use umi_core::AssetsManifest;

/// File types loaded as a URL string.
pub const ASSET_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "avif", "ico", "bmp", "woff", "woff2", "ttf", "otf",
    "eot", "mp4", "webm", "ogg", "mp3", "wav", "flac", "aac",
];

/// Loads images, fonts and media as the public URL the client build emitted.
pub struct AssetsPlugin {
    cwd: PathBuf,
    public_path: String,
    assets: Arc<AssetsManifest>,
}

impl AssetsPlugin {
    pub fn new(cwd: &Path, public_path: &str, assets: Arc<AssetsManifest>) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
            public_path: public_path.to_string(),
            assets,
        }
    }

    fn url(&self, key: &str) -> String {
        match self.assets.lookup(key) {
            Some(url) => url.to_string(),
            None => format!("{}{}", self.public_path, key),
        }
    }
}

impl Plugin for AssetsPlugin {
    fn name(&self) -> &'static str {
        "assets-loader"
    }

    fn load(&self, id: &str, _ctx: &PluginContext) -> HookResult<Option<LoadResult>> {
        let Some(ext) = super::extension(id) else {
            return Ok(None);
        };
        if !ASSET_EXTENSIONS.contains(&ext.as_str()) {
            return Ok(None);
        }
        let key = module_id(&self.cwd, Path::new(id));
        Ok(Some(LoadResult::code(format!(
            "export default {};\n",
            js_string(&self.url(&key))
        ))))
    }
}
