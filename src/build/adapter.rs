//! Build pipeline adapter.
//!
//! # Responsibilities
//! - Answer local-serve lookups from the artifact cache
//! - Run rebuilds when sources change, coalescing bursts
//! - Publish rebuild outcomes to the live channel
//!
//! # Design Decisions
//! - At most one build runs at a time. Change signals that arrive during a
//!   build set a pending flag; the running build loop picks it up and runs
//!   exactly one follow-up build, however many signals arrived
//! - A failed build leaves the cache untouched

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use percent_encoding::percent_decode_str;
use thiserror::Error;
use tokio::sync::Notify;

use crate::build::cache::{Applied, Artifact, ArtifactCache};
use crate::build::pipeline::BuildPipeline;
use crate::config::BuildConfig;
use crate::live::{LiveEvent, LiveHub};
use crate::observability::metrics;

/// No build output maps to the requested path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no build output for {path}")]
pub struct NotFound {
    pub path: String,
}

/// A cache hit.
#[derive(Debug, Clone)]
pub struct Served {
    pub artifact: Arc<Artifact>,
    /// Generation of the snapshot the artifact came from.
    pub generation: u64,
    /// Output path the request resolved to.
    pub logical_path: String,
}

/// What a change signal did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildRequest {
    /// No build was running; one was started.
    Started,
    /// A build is running; one follow-up build is queued.
    Queued,
}

#[derive(Debug, Default)]
struct RebuildState {
    in_flight: bool,
    pending: bool,
}

struct AdapterInner {
    pipeline: Arc<dyn BuildPipeline>,
    cache: ArtifactCache,
    hub: LiveHub,
    state: Mutex<RebuildState>,
    idle: Notify,
    public_path: String,
    aliases: BTreeMap<String, String>,
    builds: AtomicU64,
}

/// Owns the artifact cache and the rebuild loop.
#[derive(Clone)]
pub struct BuildAdapter {
    inner: Arc<AdapterInner>,
}

impl BuildAdapter {
    pub fn new(pipeline: Arc<dyn BuildPipeline>, hub: LiveHub, config: &BuildConfig) -> Self {
        let mut public_path = config.public_path.clone();
        if !public_path.ends_with('/') {
            public_path.push('/');
        }

        Self {
            inner: Arc::new(AdapterInner {
                pipeline,
                cache: ArtifactCache::new(),
                hub,
                state: Mutex::new(RebuildState::default()),
                idle: Notify::new(),
                public_path,
                aliases: config.entry_aliases.clone(),
                builds: AtomicU64::new(0),
            }),
        }
    }

    /// Look up the artifact for a request path.
    ///
    /// The path is percent-decoded first. Tried in order: the path under the
    /// public path, an entry alias, then the directory's `index.html`.
    pub fn serve(&self, path: &str) -> Result<Served, NotFound> {
        let not_found = || NotFound {
            path: path.to_string(),
        };
        let decoded = percent_decode_str(path)
            .decode_utf8()
            .map_err(|_| not_found())?;
        let path: &str = &decoded;
        let snapshot = self.inner.cache.snapshot();

        let relative = self.relative(path);
        let mut candidates: Vec<String> = Vec::with_capacity(3);
        if let Some(rel) = relative {
            if rel.is_empty() || rel.ends_with('/') {
                candidates.push(format!("{rel}index.html"));
            } else {
                candidates.push(rel.to_string());
            }
        }
        if let Some(alias) = self.inner.aliases.get(path) {
            candidates.push(alias.trim_start_matches('/').to_string());
        }
        if let Some(rel) = relative {
            if !rel.is_empty() && !rel.ends_with('/') {
                candidates.push(format!("{rel}/index.html"));
            }
        }

        candidates
            .into_iter()
            .find_map(|candidate| {
                snapshot.get(&candidate).map(|artifact| Served {
                    artifact: Arc::clone(artifact),
                    generation: snapshot.generation,
                    logical_path: candidate,
                })
            })
            .ok_or_else(not_found)
    }

    /// The request path with the public path removed, if it lies under it.
    fn relative<'a>(&self, path: &'a str) -> Option<&'a str> {
        if let Some(rel) = path.strip_prefix(self.inner.public_path.as_str()) {
            return Some(rel);
        }
        // "/static" for a public path of "/static/"
        if path == self.inner.public_path.trim_end_matches('/') {
            return Some("");
        }
        None
    }

    /// Signal that sources changed.
    ///
    /// Starts a background rebuild, or queues a single follow-up if one is
    /// already running. Must be called inside a tokio runtime.
    pub fn on_source_changed(&self) -> RebuildRequest {
        if !self.begin() {
            return RebuildRequest::Queued;
        }
        let adapter = self.clone();
        tokio::spawn(async move { adapter.drive().await });
        RebuildRequest::Started
    }

    /// Build now and wait until the cache reflects it.
    ///
    /// If a build is already running, a follow-up is queued and this waits
    /// for the rebuild loop to go idle.
    pub async fn rebuild_now(&self) -> u64 {
        if self.begin() {
            self.drive().await;
        } else {
            self.wait_idle().await;
        }
        self.generation()
    }

    /// Wait until no build is running or queued.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let busy = self.state().in_flight;
            if !busy {
                return;
            }
            notified.await;
        }
    }

    pub fn generation(&self) -> u64 {
        self.inner.cache.generation()
    }

    /// Builds run so far, successful or not.
    pub fn rebuild_count(&self) -> u64 {
        self.inner.builds.load(Ordering::Relaxed)
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.inner.cache
    }

    fn state(&self) -> MutexGuard<'_, RebuildState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the build loop. False if it is already running, in which case
    /// a follow-up build is recorded instead.
    fn begin(&self) -> bool {
        let mut state = self.state();
        if state.in_flight {
            state.pending = true;
            false
        } else {
            state.in_flight = true;
            true
        }
    }

    async fn drive(&self) {
        let mut claim = LoopClaim {
            adapter: self,
            released: false,
        };
        loop {
            self.build_once().await;

            let again = {
                let mut state = self.state();
                if state.pending {
                    state.pending = false;
                    true
                } else {
                    state.in_flight = false;
                    false
                }
            };
            if !again {
                break;
            }
            tracing::debug!("Running queued rebuild");
        }
        claim.released = true;
    }

    async fn build_once(&self) {
        let build = self.inner.builds.fetch_add(1, Ordering::Relaxed) + 1;
        let started = Instant::now();

        match self.inner.pipeline.trigger_build().await {
            Ok(result) => {
                let reported = result.changed_paths.len();
                match self.inner.cache.apply(result) {
                    Some(Applied {
                        generation,
                        changed,
                    }) => {
                        tracing::info!(
                            build,
                            generation,
                            changed = changed.len(),
                            reported,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Build complete"
                        );
                        metrics::record_build("changed", started);
                        self.inner.hub.publish(LiveEvent::Generation {
                            generation,
                            changed,
                        });
                    }
                    None => {
                        tracing::debug!(build, "Build produced no changes");
                        metrics::record_build("unchanged", started);
                    }
                }
            }
            Err(e) => {
                let generation = self.inner.cache.generation();
                tracing::warn!(
                    build,
                    generation,
                    error = %e,
                    "Build failed, serving previous output"
                );
                metrics::record_build("failed", started);
                self.inner.hub.publish(LiveEvent::BuildFailed {
                    generation,
                    message: e.to_string(),
                });
            }
        }
    }
}

/// Held by the running build loop. If the loop unwinds (a panicking
/// pipeline, a cancelled `rebuild_now`) the claim is given up so later
/// signals can start a fresh loop.
struct LoopClaim<'a> {
    adapter: &'a BuildAdapter,
    released: bool,
}

impl Drop for LoopClaim<'_> {
    fn drop(&mut self) {
        if !self.released {
            let mut state = self.adapter.state();
            state.in_flight = false;
            state.pending = false;
            tracing::warn!("Build loop aborted, rebuild state reset");
        }
        self.adapter.inner.idle.notify_waiters();
    }
}

impl std::fmt::Debug for BuildAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildAdapter")
            .field("generation", &self.generation())
            .field("public_path", &self.inner.public_path)
            .field("builds", &self.rebuild_count())
            .finish()
    }
}
