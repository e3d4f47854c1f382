//! Loader plugins registered for every server build.
//!
//! They run inside the embedded bundler and resolve framework imports,
//! compile styles, and map asset imports to the URLs recorded in the
//! current manifest snapshot.

mod assets;
mod ignore_prefix;
mod style;
mod svg;
mod umi_exports;

pub use assets::{AssetsPlugin, ASSET_EXTENSIONS};
pub use ignore_prefix::IgnorePathPrefixPlugin;
pub use style::{StyleCollector, StylePlugin};
pub use svg::{svg_data_uri, SvgPlugin};
pub use umi_exports::{UmiExportsPlugin, UMI_SPECIFIERS};

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use umi_core::bundler::Plugin;
use umi_core::ManifestSnapshot;

/// What the loaders need to know about one build.
#[derive(Debug, Clone)]
pub struct LoaderContext {
    /// Project root; module ids are relative to it.
    pub cwd: PathBuf,
    /// Generated `umi` exports module.
    pub exports: PathBuf,
    /// Public path prefix with a trailing slash.
    pub public_path: String,
    /// Manifests of the pass that triggered the build.
    pub snapshot: ManifestSnapshot,
}

/// The plugin set for one server build, in registration order.
pub fn server_plugins(
    ctx: &LoaderContext,
    styles: &Arc<Mutex<StyleCollector>>,
) -> Vec<Box<dyn Plugin>> {
    vec![
        Box::new(IgnorePathPrefixPlugin::default()),
        Box::new(UmiExportsPlugin::new(&ctx.exports)),
        Box::new(StylePlugin::new(
            &ctx.cwd,
            Arc::clone(&ctx.snapshot.css),
            Arc::clone(styles),
        )),
        Box::new(SvgPlugin::new(&ctx.cwd, Arc::clone(&ctx.snapshot.assets))),
        Box::new(AssetsPlugin::new(
            &ctx.cwd,
            &ctx.public_path,
            Arc::clone(&ctx.snapshot.assets),
        )),
    ]
}

/// Extension of a module id, lowercased.
pub(crate) fn extension(id: &str) -> Option<String> {
    Path::new(id)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}
