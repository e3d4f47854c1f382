use std::path::{Path, PathBuf};
use umi_core::bundler::{HookResult, Plugin, PluginContext, ResolveIdResult};

/// Specifiers that refer to the framework's generated exports.
pub const UMI_SPECIFIERS: &[&str] = &["umi", "@umijs/max"];

/// Points `umi` imports at the generated exports module.
///
/// When the generator has not written it yet the import stays external and
/// resolves through Node at render time.
#[derive(Debug, Clone)]
pub struct UmiExportsPlugin {
    exports: PathBuf,
}

impl UmiExportsPlugin {
    pub fn new(exports: &Path) -> Self {
        Self {
            exports: exports.to_path_buf(),
        }
    }
}

impl Plugin for UmiExportsPlugin {
    fn name(&self) -> &'static str {
        "umi-exports"
    }

    fn resolve_id(
        &self,
        specifier: &str,
        _importer: Option<&str>,
        _ctx: &PluginContext,
    ) -> HookResult<Option<ResolveIdResult>> {
        if !UMI_SPECIFIERS.contains(&specifier) {
            return Ok(None);
        }
        if self.exports.is_file() {
            Ok(Some(ResolveIdResult::resolved(
                self.exports.display().to_string(),
            )))
        } else {
            Ok(Some(ResolveIdResult::external(specifier)))
        }
    }
}
