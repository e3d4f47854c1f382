//! Runtime and user configuration.
//!
//! [`Config`] carries CLI-level settings. [`UserConfig`] is the project's
//! `.umirc.json` (or `config/config.json`), of which only the keys the SSR
//! pipeline consumes are typed; everything else is kept verbatim in `extra`.

use crate::error::Error;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

/// Default output directory of the client build.
pub const DEFAULT_OUTPUT_PATH: &str = "dist";

/// Default public path prefix for emitted assets.
pub const DEFAULT_PUBLIC_PATH: &str = "/";

/// Default file name of the client asset manifest.
pub const DEFAULT_MANIFEST_FILE: &str = "asset-manifest.json";

/// Config file names in priority order.
const CONFIG_FILES: &[&str] = &[".umirc.json", "config/config.json"];

/// Build environment. Selects the temp directory and server build path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Env {
    #[default]
    Development,
    Production,
}

impl Env {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

/// Runtime configuration for the umi CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Current working directory (project root).
    pub cwd: PathBuf,

    /// Whether to emit JSON logs.
    pub json_logs: bool,

    /// Verbosity level (0 = INFO, 1 = DEBUG, 2+ = TRACE).
    pub verbosity: u8,

    /// Build environment.
    pub env: Env,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            json_logs: false,
            verbosity: 0,
            env: Env::default(),
        }
    }
}

impl Config {
    /// Create a new config with the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }

    /// Set the build environment.
    #[must_use]
    pub fn with_env(mut self, env: Env) -> Self {
        self.env = env;
        self
    }
}

/// The `ssr` block of the user config. Its presence enables the SSR pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SsrConfig {
    /// Where the production server bundle is written, relative to the project root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_build_path: Option<String>,
}

/// The `manifest` block of the user config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// Project configuration as written by the user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<ManifestConfig>,

    /// `ssr: {}` enables SSR, `ssr: false` (or absence) disables it.
    #[serde(default, deserialize_with = "deserialize_ssr", skip_serializing_if = "Option::is_none")]
    pub ssr: Option<SsrConfig>,

    /// Keys owned by other plugins.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn deserialize_ssr<'de, D>(deserializer: D) -> Result<Option<SsrConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Flag(bool),
        Block(SsrConfig),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        None | Some(Raw::Flag(false)) => None,
        Some(Raw::Flag(true)) => Some(SsrConfig::default()),
        Some(Raw::Block(block)) => Some(block),
    })
}

impl UserConfig {
    /// Whether the SSR pipeline is enabled for this project.
    #[must_use]
    pub fn ssr_enabled(&self) -> bool {
        self.ssr.is_some()
    }

    /// Output directory of the client build, relative to the project root.
    #[must_use]
    pub fn output_path(&self) -> &str {
        self.output_path.as_deref().unwrap_or(DEFAULT_OUTPUT_PATH)
    }

    /// Public path, always ending in `/`.
    #[must_use]
    pub fn public_path(&self) -> String {
        let raw = self.public_path.as_deref().unwrap_or(DEFAULT_PUBLIC_PATH);
        if raw.ends_with('/') {
            raw.to_string()
        } else {
            format!("{raw}/")
        }
    }

    /// File name of the client asset manifest.
    #[must_use]
    pub fn manifest_file_name(&self) -> &str {
        self.manifest
            .as_ref()
            .and_then(|m| m.file_name.as_deref())
            .unwrap_or(DEFAULT_MANIFEST_FILE)
    }

    /// Configured production server build path, if any.
    #[must_use]
    pub fn server_build_path(&self) -> Option<&str> {
        self.ssr.as_ref().and_then(|s| s.server_build_path.as_deref())
    }

    /// Validate the keys the SSR pipeline consumes.
    pub fn validate(&self) -> Result<(), Error> {
        if let Some(path) = self.server_build_path() {
            if path.trim().is_empty() {
                return Err(Error::ConfigInvalid {
                    key: "ssr.serverBuildPath".to_string(),
                    message: "must not be empty".to_string(),
                });
            }
            if Path::new(path).is_absolute() {
                return Err(Error::ConfigInvalid {
                    key: "ssr.serverBuildPath".to_string(),
                    message: format!("must be relative to the project root, got {path}"),
                });
            }
        }
        if self.output_path().trim().is_empty() {
            return Err(Error::ConfigInvalid {
                key: "outputPath".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Find a config file in the given root directory.
#[must_use]
pub fn find_config_file(root: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|name| root.join(name))
        .find(|path| path.is_file())
}

/// Parse and validate a user config from JSON text.
pub fn parse_user_config(path: &Path, text: &str) -> Result<UserConfig, Error> {
    let config: UserConfig = serde_json::from_str(text).map_err(|source| Error::ConfigParse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}

/// Load the user config of the project at `root`.
///
/// A project without a config file gets the default config (SSR disabled).
pub fn load_user_config(root: &Path) -> Result<(Option<PathBuf>, UserConfig), Error> {
    let Some(path) = find_config_file(root) else {
        return Ok((None, UserConfig::default()));
    };

    let text = std::fs::read_to_string(&path).map_err(|source| Error::ConfigRead {
        path: path.clone(),
        source,
    })?;
    let config = parse_user_config(&path, &text)?;
    Ok((Some(path), config))
}
