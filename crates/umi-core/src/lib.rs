#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

pub mod bundler;
pub mod config;
pub mod css;
pub mod error;
pub mod manifest;
pub mod paths;
pub mod version;

pub use config::{Config, Env, SsrConfig, UserConfig};
pub use error::Error;
pub use manifest::{
    AssetsManifest, BuildSession, CssManifest, ManifestSnapshot, ManifestStore, SessionKind,
};
pub use paths::UmiPaths;
pub use version::VERSION;
