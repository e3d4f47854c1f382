use umi_core::bundler::{HookResult, Plugin, PluginContext, ResolveIdResult};

/// Strips a path prefix used by the dev server for absolute file imports,
/// so `@fs/abs/path` resolves as `/abs/path`.
#[derive(Debug, Clone)]
pub struct IgnorePathPrefixPlugin {
    prefix: String,
}

impl IgnorePathPrefixPlugin {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for IgnorePathPrefixPlugin {
    fn default() -> Self {
        Self::new("@fs")
    }
}

impl Plugin for IgnorePathPrefixPlugin {
    fn name(&self) -> &'static str {
        "ignore-path-prefix"
    }

    fn resolve_id(
        &self,
        specifier: &str,
        _importer: Option<&str>,
        _ctx: &PluginContext,
    ) -> HookResult<Option<ResolveIdResult>> {
        let Some(rest) = specifier.strip_prefix(&self.prefix) else {
            return Ok(None);
        };
        if !rest.starts_with('/') {
            return Ok(None);
        }
        Ok(Some(ResolveIdResult::resolved(rest)))
    }
}
