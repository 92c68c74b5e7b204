//! The build pipeline seam.
//!
//! The gateway does not know how assets are produced. It asks a
//! [`BuildPipeline`] to build and receives the complete set of outputs plus
//! the paths that changed since the previous build.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use axum::body::Bytes;
use thiserror::Error;

/// One compiled output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltAsset {
    pub content: Bytes,
    pub content_type: String,
}

impl BuiltAsset {
    pub fn new(content: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: content_type.into(),
        }
    }
}

/// Outcome of a successful build.
///
/// `artifacts` holds every output, keyed by logical path relative to the
/// output directory (`js/app.js`, no leading slash). Outputs missing from it
/// are treated as deleted.
#[derive(Debug, Clone, Default)]
pub struct BuildResult {
    pub changed_paths: Vec<String>,
    pub artifacts: HashMap<String, BuiltAsset>,
}

/// A build that did not produce usable output.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("build command `{command}` exited with {status}: {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("cannot run build command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read build output {path:?}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("build failed: {0}")]
    Failed(String),
}

/// Produces the asset set served for local paths.
#[async_trait]
pub trait BuildPipeline: Send + Sync {
    /// Run one build to completion.
    async fn trigger_build(&self) -> Result<BuildResult, BuildError>;
}
