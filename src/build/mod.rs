//! Build pipeline adapter subsystem.
//!
//! # Data Flow
//! ```text
//! Source change (watcher.rs, debounced)
//!     → adapter.rs (coalesced rebuild)
//!     → pipeline.rs (BuildPipeline::trigger_build; command.rs runs the bundler)
//!     → cache.rs (new snapshot swapped in atomically)
//!     → live channel (generation / build-failed event)
//!
//! Local-serve request
//!     → adapter.rs (path → artifact lookup against the current snapshot)
//! ```
//!
//! # Design Decisions
//! - Readers never wait on a build; they see the last complete snapshot
//! - The pipeline is a trait object so tests and embedders can supply their own

pub mod adapter;
pub mod cache;
pub mod command;
pub mod pipeline;
pub mod watcher;

pub use adapter::{BuildAdapter, NotFound, RebuildRequest, Served};
pub use cache::{Artifact, ArtifactCache, Snapshot};
pub use command::CommandPipeline;
pub use pipeline::{BuildError, BuildPipeline, BuildResult, BuiltAsset};
pub use watcher::SourceWatcher;
