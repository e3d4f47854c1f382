//! Server-side rendering pipeline for umi.
//!
//! Builds the server render module from the generated entry, keeps it in
//! step with the client build's manifests, and serves it from the dev server:
//!
//! - [`builder`]: the Server Bundle Builder and its output proof
//! - [`plugins`]: loaders that map styles and assets through the manifests
//! - [`interceptor`]: axum middleware delegating to the loaded module
//! - [`module_cache`]: loaded modules and their invalidation
//! - [`coordinator`]: client build events driving builds and rebuilds
//! - [`watch`]: file change sources for watch mode

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

pub mod builder;
pub mod coordinator;
pub mod error;
pub mod interceptor;
pub mod module_cache;
pub mod node;
pub mod plugins;
pub mod watch;

pub use builder::{BuildReport, ServerBuild, ServerBundleBuilder, WrittenModule};
pub use coordinator::{
    BuildCompletePayload, BuildEventCoordinator, CoordinatorPaths, DevCompilePayload, RebuildEvent,
};
pub use error::SsrError;
pub use interceptor::{
    intercept, ModuleLoader, RenderHandler, RenderOutcome, RenderRequest, RenderResponse,
    RequestInterceptor, COMPILING_PLACEHOLDER,
};
pub use module_cache::{ModuleCache, ModuleCacheInvalidator};
pub use node::NodeModuleLoader;
pub use watch::{ChangeSource, ManualChangeSource, NotifyChangeSource, WatchGuard};
