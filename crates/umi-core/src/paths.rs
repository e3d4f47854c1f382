use crate::config::{Env, UserConfig};
use std::path::{Path, PathBuf};

/// Default server build path relative to the project root (production).
pub const DEFAULT_SERVER_BUILD_PATH: &str = "server/umi.server.js";

/// Fallback manifest name written by some client bundler setups.
pub const FALLBACK_MANIFEST_FILE: &str = "assets.json";

/// Find the project root by walking up from `cwd` looking for `package.json` or `.git`.
#[must_use]
pub fn project_root(cwd: &Path) -> Option<PathBuf> {
    let mut current = cwd.to_path_buf();

    loop {
        if current.join("package.json").exists() || current.join(".git").exists() {
            return Some(current);
        }

        if !current.pop() {
            return None;
        }
    }
}

/// Locations of the manifest cache files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestCachePaths {
    pub css: PathBuf,
    pub assets: PathBuf,
}

/// Conventional file locations of an umi project.
#[derive(Debug, Clone)]
pub struct UmiPaths {
    /// Project root.
    pub cwd: PathBuf,
    /// `src/`.
    pub src: PathBuf,
    /// Generated temp directory (`src/.umi` or `src/.umi-production`).
    pub tmp: PathBuf,
    /// Client build output directory.
    pub output: PathBuf,
    /// `node_modules/.cache/umi`.
    pub cache: PathBuf,
    env: Env,
}

impl UmiPaths {
    /// Compute the project paths for `cwd` in the given environment.
    #[must_use]
    pub fn new(cwd: &Path, env: Env, config: &UserConfig) -> Self {
        let cwd = dunce::canonicalize(cwd).unwrap_or_else(|_| cwd.to_path_buf());
        let src = cwd.join("src");
        let tmp = match env {
            Env::Development => src.join(".umi"),
            Env::Production => src.join(".umi-production"),
        };
        let output = cwd.join(config.output_path());
        let cache = cwd.join("node_modules").join(".cache").join("umi");

        Self {
            cwd,
            src,
            tmp,
            output,
            cache,
            env,
        }
    }

    #[must_use]
    pub fn env(&self) -> Env {
        self.env
    }

    /// Server render entry generated by the route/exports generators.
    #[must_use]
    pub fn server_entry(&self) -> PathBuf {
        self.tmp.join("server.ts")
    }

    /// Generated `umi` exports module the `umi` import resolves to.
    #[must_use]
    pub fn tmp_exports(&self) -> PathBuf {
        self.tmp.join("exports.ts")
    }

    /// Absolute path of the compiled server module.
    ///
    /// Development always builds into the temp directory. Production honours
    /// `ssr.serverBuildPath`.
    #[must_use]
    pub fn server_build_path(&self, config: &UserConfig) -> PathBuf {
        match self.env {
            Env::Development => self.tmp.join("server").join("umi.server.js"),
            Env::Production => self
                .cwd
                .join(config.server_build_path().unwrap_or(DEFAULT_SERVER_BUILD_PATH)),
        }
    }

    /// Manifest cache files that survive dev-server restarts.
    #[must_use]
    pub fn manifest_cache(&self) -> ManifestCachePaths {
        let dir = self.cache.join("ssr");
        ManifestCachePaths {
            css: dir.join("css-manifest.json"),
            assets: dir.join("assets-manifest.json"),
        }
    }

    /// Production manifest candidates in lookup order.
    #[must_use]
    pub fn manifest_candidates(&self, config: &UserConfig) -> Vec<PathBuf> {
        let primary = self.output.join(config.manifest_file_name());
        let fallback = self.output.join(FALLBACK_MANIFEST_FILE);
        if primary == fallback {
            vec![primary]
        } else {
            vec![primary, fallback]
        }
    }

    /// Project-relative, forward-slash id of `path`. Used as manifest key.
    #[must_use]
    pub fn module_id(&self, path: &Path) -> String {
        module_id(&self.cwd, path)
    }
}

/// Project-relative, forward-slash id of `path` under `root`.
///
/// Paths outside `root` keep their absolute form.
#[must_use]
pub fn module_id(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
        .replace("//", "/")
}
