//! Error types for the SSR pipeline.

use std::path::PathBuf;
use thiserror::Error;
use umi_core::bundler::BundleError;

/// Errors raised while building or serving the server bundle.
#[derive(Debug, Error)]
pub enum SsrError {
    #[error(transparent)]
    Core(#[from] umi_core::Error),

    #[error("server bundle failed: {0}")]
    Bundle(#[from] BundleError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The client build reported an error; no server bundle is produced.
    #[error("client build failed: {0}")]
    ClientBuild(String),

    #[error("failed to load {path}: {message}")]
    Load { path: PathBuf, message: String },

    #[error("render failed: {0}")]
    Render(String),

    #[error("watch error: {0}")]
    Watch(String),

    #[error("build task failed: {0}")]
    Task(String),
}

impl SsrError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<notify::Error> for SsrError {
    fn from(err: notify::Error) -> Self {
        Self::Watch(err.to_string())
    }
}

impl From<tokio::task::JoinError> for SsrError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}
