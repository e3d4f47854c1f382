//! CSS and asset manifests, and the store that hands out consistent snapshots.
//!
//! The store is the single owner of manifest state. Builds never see the
//! live maps: each build receives a [`ManifestSnapshot`] taken at its trigger
//! point, and style output generated during a build is merged back with
//! [`ManifestStore::absorb_generated`] once the build has finished.

use crate::error::Error;
use crate::paths::ManifestCachePaths;
use crate::version::SCHEMA_VERSION;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use umi_util::fs::{atomic_write, read_if_exists};

macro_rules! manifest_map {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(BTreeMap<String, String>);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self::default()
            }

            #[must_use]
            pub fn get(&self, id: &str) -> Option<&str> {
                self.0.get(id).map(String::as_str)
            }

            pub fn insert(&mut self, id: impl Into<String>, value: impl Into<String>) {
                self.0.insert(id.into(), value.into());
            }

            /// Merge `other` into `self`, `other` winning on conflicts.
            pub fn merge(&mut self, other: &Self) {
                self.0
                    .extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
            }

            #[must_use]
            pub fn len(&self) -> usize {
                self.0.len()
            }

            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
                self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
            }
        }

        impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for $name {
            fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
                Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
            }
        }
    };
}

manifest_map!(
    /// Module id → stylesheet text generated for that module.
    CssManifest
);

manifest_map!(
    /// Asset id → public (usually content-hashed) URL.
    AssetsManifest
);

impl AssetsManifest {
    /// Look up the public URL of an asset.
    ///
    /// Client manifest keys depend on bundler configuration, so after the
    /// exact id this tries the bare file name and then the keys ending in
    /// `/<file name>`. Among those, the key sharing the most trailing path
    /// segments with `id` wins; a tie is ambiguous and yields `None`.
    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<&str> {
        if let Some(url) = self.get(id) {
            return Some(url);
        }
        let file_name = id.rsplit('/').next().unwrap_or(id);
        if let Some(url) = self.get(file_name) {
            return Some(url);
        }
        let suffix = format!("/{file_name}");
        let mut best: Option<(usize, &str)> = None;
        let mut tied = false;
        for (key, url) in self.0.iter().filter(|(key, _)| key.ends_with(&suffix)) {
            let shared = shared_trailing_segments(key, id);
            match best {
                Some((score, _)) if shared < score => {}
                Some((score, _)) if shared == score => tied = true,
                _ => {
                    best = Some((shared, url.as_str()));
                    tied = false;
                }
            }
        }
        if tied {
            return None;
        }
        best.map(|(_, url)| url)
    }

    /// Build a manifest from a parsed client manifest.
    ///
    /// Non-string values are skipped. A nested `files` object (create-react-app
    /// style manifests) is flattened into the result.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        let object = value.as_object()?;
        let mut manifest = Self::new();
        for (key, value) in object {
            match value {
                serde_json::Value::String(url) => manifest.insert(key.clone(), url.clone()),
                serde_json::Value::Object(_) if key == "files" => {
                    if let Some(files) = Self::from_json(value) {
                        manifest.merge(&files);
                    }
                }
                _ => {}
            }
        }
        Some(manifest)
    }
}

fn shared_trailing_segments(a: &str, b: &str) -> usize {
    a.rsplit('/')
        .zip(b.rsplit('/'))
        .take_while(|(x, y)| x == y)
        .count()
}

/// Kind of build pass a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Dev,
    Production,
}

/// Correlates manifest content with the build pass that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildSession {
    pub id: u64,
    pub kind: SessionKind,
}

impl std::fmt::Display for BuildSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            SessionKind::Dev => "dev",
            SessionKind::Production => "production",
        };
        write!(f, "{kind}#{}", self.id)
    }
}

/// Immutable view of both manifests at one point in time.
#[derive(Debug, Clone)]
pub struct ManifestSnapshot {
    pub session: BuildSession,
    pub css: Arc<CssManifest>,
    pub assets: Arc<AssetsManifest>,
}

impl ManifestSnapshot {
    /// A snapshot detached from any store, mostly for tests and one-off builds.
    #[must_use]
    pub fn new(session: BuildSession, css: CssManifest, assets: AssetsManifest) -> Self {
        Self {
            session,
            css: Arc::new(css),
            assets: Arc::new(assets),
        }
    }
}

/// Versioned on-disk wrapper for a cached manifest.
#[derive(Debug, Serialize, Deserialize)]
struct CacheFile<T> {
    version: u32,
    entries: T,
}

/// Outcome of a cache restore.
#[derive(Debug, Default)]
pub struct RestoreReport {
    pub css_entries: usize,
    pub assets_entries: usize,
    /// Cache files that existed but could not be used, with the reason.
    pub skipped: Vec<(PathBuf, String)>,
}

impl RestoreReport {
    #[must_use]
    pub fn restored_anything(&self) -> bool {
        self.css_entries > 0 || self.assets_entries > 0
    }
}

#[derive(Debug)]
struct StoreState {
    session: BuildSession,
    css: Arc<CssManifest>,
    assets: Arc<AssetsManifest>,
}

/// In-memory owner of the current manifests with an on-disk cache.
#[derive(Debug)]
pub struct ManifestStore {
    state: RwLock<StoreState>,
    next_session: AtomicU64,
}

impl Default for ManifestStore {
    fn default() -> Self {
        Self::new(SessionKind::Dev)
    }
}

impl ManifestStore {
    /// Create an empty store whose initial session has the given kind.
    #[must_use]
    pub fn new(kind: SessionKind) -> Self {
        Self {
            state: RwLock::new(StoreState {
                session: BuildSession { id: 0, kind },
                css: Arc::default(),
                assets: Arc::default(),
            }),
            next_session: AtomicU64::new(1),
        }
    }

    fn allocate(&self, kind: SessionKind) -> BuildSession {
        BuildSession {
            id: self.next_session.fetch_add(1, Ordering::Relaxed),
            kind,
        }
    }

    /// Current manifests as one consistent snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ManifestSnapshot {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        ManifestSnapshot {
            session: state.session,
            css: Arc::clone(&state.css),
            assets: Arc::clone(&state.assets),
        }
    }

    /// Current session.
    #[must_use]
    pub fn session(&self) -> BuildSession {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .session
    }

    /// Record the manifests of a finished client pass, replacing what is held.
    ///
    /// `None` leaves that manifest as it is.
    pub fn replace(
        &self,
        kind: SessionKind,
        css: Option<CssManifest>,
        assets: Option<AssetsManifest>,
    ) -> BuildSession {
        let session = self.allocate(kind);
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.session = session;
        if let Some(css) = css {
            state.css = Arc::new(css);
        }
        if let Some(assets) = assets {
            state.assets = Arc::new(assets);
        }
        session
    }

    /// Record the manifests of a finished client pass on top of what is held.
    ///
    /// Incoming entries win. Entries the pass did not mention are kept, which
    /// lets a restored cache fill gaps in an incremental pass.
    pub fn merge(
        &self,
        kind: SessionKind,
        css: Option<&CssManifest>,
        assets: Option<&AssetsManifest>,
    ) -> BuildSession {
        let session = self.allocate(kind);
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.session = session;
        if let Some(css) = css {
            Arc::make_mut(&mut state.css).merge(css);
        }
        if let Some(assets) = assets {
            Arc::make_mut(&mut state.assets).merge(assets);
        }
        session
    }

    /// Merge stylesheet entries generated by a server build.
    ///
    /// Stays in the current session: the entries belong to the pass that
    /// triggered the build.
    pub fn absorb_generated(&self, css: &CssManifest) {
        if css.is_empty() {
            return;
        }
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        Arc::make_mut(&mut state.css).merge(css);
    }

    /// Persist both manifests to the cache files.
    pub fn save_cache(&self, paths: &ManifestCachePaths) -> Result<(), Error> {
        let snapshot = self.snapshot();
        write_cache_file(&paths.css, snapshot.css.as_ref())?;
        write_cache_file(&paths.assets, snapshot.assets.as_ref())?;
        Ok(())
    }

    /// Restore manifests from the cache files, best-effort.
    ///
    /// Missing files are silently ignored. Unreadable, malformed or
    /// version-mismatched files are reported in the [`RestoreReport`] and
    /// treated as empty. Only I/O errors other than "not found" fail.
    pub fn restore_cache(&self, paths: &ManifestCachePaths) -> Result<RestoreReport, Error> {
        let mut report = RestoreReport::default();
        let css: Option<CssManifest> = read_cache_file(&paths.css, &mut report)?;
        let assets: Option<AssetsManifest> = read_cache_file(&paths.assets, &mut report)?;

        report.css_entries = css.as_ref().map_or(0, CssManifest::len);
        report.assets_entries = assets.as_ref().map_or(0, AssetsManifest::len);

        if css.is_some() || assets.is_some() {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(css) = css {
                state.css = Arc::new(css);
            }
            if let Some(assets) = assets {
                state.assets = Arc::new(assets);
            }
        }
        Ok(report)
    }
}

fn write_cache_file<T: Serialize>(path: &Path, entries: &T) -> Result<(), Error> {
    let file = CacheFile {
        version: SCHEMA_VERSION,
        entries,
    };
    let json = serde_json::to_vec_pretty(&file).map_err(|e| Error::other(e.to_string()))?;
    atomic_write(path, &json)?;
    Ok(())
}

fn read_cache_file<T>(path: &Path, report: &mut RestoreReport) -> Result<Option<T>, Error>
where
    T: for<'de> Deserialize<'de>,
{
    let Some(bytes) = read_if_exists(path).map_err(|source| Error::ManifestRead {
        path: path.to_path_buf(),
        source,
    })?
    else {
        return Ok(None);
    };

    match serde_json::from_slice::<CacheFile<T>>(&bytes) {
        Ok(file) if file.version == SCHEMA_VERSION => Ok(Some(file.entries)),
        Ok(file) => {
            report.skipped.push((
                path.to_path_buf(),
                format!("cache version {} != {SCHEMA_VERSION}", file.version),
            ));
            Ok(None)
        }
        Err(e) => {
            report.skipped.push((path.to_path_buf(), e.to_string()));
            Ok(None)
        }
    }
}

/// Read the client asset manifest of a production build.
///
/// The first existing candidate wins. A missing or corrupt manifest is an
/// error: server output with unresolved asset URLs must not ship.
pub fn read_production_manifest(candidates: &[PathBuf]) -> Result<AssetsManifest, Error> {
    for path in candidates {
        let Some(bytes) = read_if_exists(path).map_err(|source| Error::ManifestRead {
            path: path.clone(),
            source,
        })?
        else {
            continue;
        };

        let value: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| Error::ManifestParse {
                path: path.clone(),
                message: e.to_string(),
            })?;
        return AssetsManifest::from_json(&value).ok_or_else(|| Error::ManifestParse {
            path: path.clone(),
            message: "expected a JSON object".to_string(),
        });
    }

    Err(Error::ManifestMissing {
        candidates: candidates.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cache_paths(dir: &Path) -> ManifestCachePaths {
        ManifestCachePaths {
            css: dir.join("ssr/css-manifest.json"),
            assets: dir.join("ssr/assets-manifest.json"),
        }
    }

    #[test]
    fn test_cache_round_trip() {
        let dir = tempdir().unwrap();
        let paths = cache_paths(dir.path());

        let store = ManifestStore::default();
        store.replace(
            SessionKind::Dev,
            Some(CssManifest::from_iter([
                ("src/pages/index.less", ".title{color:red}"),
                ("src/global.css", "body{margin:0}"),
            ])),
            Some(AssetsManifest::from_iter([(
                "static/logo.png",
                "/static/logo.3f2a1b.png",
            )])),
        );
        store.save_cache(&paths).unwrap();

        let restored = ManifestStore::default();
        let report = restored.restore_cache(&paths).unwrap();
        assert_eq!(report.css_entries, 2);
        assert_eq!(report.assets_entries, 1);
        assert!(report.skipped.is_empty());

        let (a, b) = (store.snapshot(), restored.snapshot());
        assert_eq!(a.css, b.css);
        assert_eq!(a.assets, b.assets);
    }

    #[test]
    fn test_restore_missing_cache_is_not_an_error() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::default();
        let report = store.restore_cache(&cache_paths(dir.path())).unwrap();
        assert!(!report.restored_anything());
        assert!(store.snapshot().css.is_empty());
    }

    #[test]
    fn test_restore_skips_corrupt_and_stale_files() {
        let dir = tempdir().unwrap();
        let paths = cache_paths(dir.path());
        std::fs::create_dir_all(paths.css.parent().unwrap()).unwrap();
        std::fs::write(&paths.css, "{ not json").unwrap();
        std::fs::write(&paths.assets, r#"{"version":999,"entries":{"a":"b"}}"#).unwrap();

        let store = ManifestStore::default();
        let report = store.restore_cache(&paths).unwrap();
        assert_eq!(report.skipped.len(), 2);
        assert!(store.snapshot().assets.is_empty());
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_updates() {
        let store = ManifestStore::default();
        store.replace(
            SessionKind::Dev,
            None,
            Some(AssetsManifest::from_iter([("a.png", "/a.1.png")])),
        );
        let before = store.snapshot();

        store.merge(
            SessionKind::Dev,
            None,
            Some(&AssetsManifest::from_iter([("a.png", "/a.2.png")])),
        );
        store.absorb_generated(&CssManifest::from_iter([("x.css", "x{}")]));

        assert_eq!(before.assets.get("a.png"), Some("/a.1.png"));
        assert!(before.css.is_empty());
        let after = store.snapshot();
        assert_eq!(after.assets.get("a.png"), Some("/a.2.png"));
        assert_eq!(after.css.get("x.css"), Some("x{}"));
        assert!(after.session.id > before.session.id);
    }

    #[test]
    fn test_absorb_keeps_session() {
        let store = ManifestStore::default();
        let session = store.replace(SessionKind::Dev, None, None);
        store.absorb_generated(&CssManifest::from_iter([("a.css", "a{}")]));
        assert_eq!(store.session(), session);
    }

    #[test]
    fn test_assets_lookup_fallbacks() {
        let manifest = AssetsManifest::from_iter([
            ("static/logo.png", "/static/logo.abc.png"),
            ("umi.js", "/umi.123.js"),
        ]);
        assert_eq!(manifest.lookup("static/logo.png"), Some("/static/logo.abc.png"));
        assert_eq!(manifest.lookup("src/assets/umi.js"), Some("/umi.123.js"));
        assert_eq!(manifest.lookup("src/assets/logo.png"), Some("/static/logo.abc.png"));
        assert_eq!(manifest.lookup("src/assets/missing.png"), None);
    }

    #[test]
    fn test_assets_lookup_prefers_the_closest_directory() {
        let manifest = AssetsManifest::from_iter([
            ("src/a/logo.png", "/static/logo.aaa.png"),
            ("src/b/logo.png", "/static/logo.bbb.png"),
        ]);
        assert_eq!(manifest.lookup("pages/b/logo.png"), Some("/static/logo.bbb.png"));
        assert_eq!(manifest.lookup("/app/src/a/logo.png"), Some("/static/logo.aaa.png"));
        assert_eq!(manifest.lookup("src/c/logo.png"), None);
        assert_eq!(manifest.lookup("logo.png"), None);
    }

    #[test]
    fn test_read_production_manifest_fallback_and_filtering() {
        let dir = tempdir().unwrap();
        let candidates = vec![
            dir.path().join("asset-manifest.json"),
            dir.path().join("assets.json"),
        ];
        std::fs::write(
            &candidates[1],
            r#"{"umi.js":"/umi.1.js","entrypoints":["umi.js"],"files":{"umi.css":"/umi.2.css"}}"#,
        )
        .unwrap();

        let manifest = read_production_manifest(&candidates).unwrap();
        assert_eq!(manifest.get("umi.js"), Some("/umi.1.js"));
        assert_eq!(manifest.get("umi.css"), Some("/umi.2.css"));
        assert_eq!(manifest.get("entrypoints"), None);
    }

    #[test]
    fn test_read_production_manifest_missing_is_fatal() {
        let dir = tempdir().unwrap();
        let err = read_production_manifest(&[dir.path().join("asset-manifest.json")]).unwrap_err();
        assert!(matches!(err, Error::ManifestMissing { .. }));
    }

    #[test]
    fn test_read_production_manifest_corrupt_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("asset-manifest.json");
        std::fs::write(&path, "[1, 2").unwrap();
        let err = read_production_manifest(&[path]).unwrap_err();
        assert!(matches!(err, Error::ManifestParse { .. }));
    }
}
