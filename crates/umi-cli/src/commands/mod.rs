pub mod build;
pub mod dev;
pub mod version;

use miette::{IntoDiagnostic, Result};
use std::path::Path;
use tracing::debug;
use umi_core::config::load_user_config;
use umi_core::UserConfig;

/// Load the project's user config, reporting where it came from.
pub fn project_config(cwd: &Path) -> Result<UserConfig> {
    let (path, config) = load_user_config(cwd).into_diagnostic()?;
    match path {
        Some(path) => debug!(path = %path.display(), ssr = config.ssr_enabled(), "Loaded config"),
        None => debug!("No config file, using defaults"),
    }
    Ok(config)
}
