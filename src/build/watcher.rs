//! Source directory watcher.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};

use crate::build::adapter::BuildAdapter;
use crate::config::BuildConfig;

/// Watches the source tree and turns bursts of file events into single
/// rebuild signals.
pub struct SourceWatcher {
    source: PathBuf,
    output: PathBuf,
    debounce: Duration,
}

impl SourceWatcher {
    pub fn new(config: &BuildConfig) -> Self {
        Self {
            source: absolute(&config.source_path()),
            output: absolute(&config.output_path()),
            debounce: Duration::from_millis(config.debounce_ms),
        }
    }

    /// True if a change to `path` should trigger a rebuild.
    fn relevant(&self, path: &Path) -> bool {
        !path.starts_with(&self.output)
    }

    /// Start watching. The returned watcher must be kept alive; dropping it
    /// stops the notifications.
    pub fn spawn(
        self,
        adapter: BuildAdapter,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<RecommendedWatcher, notify::Error> {
        let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !(event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove())
                    {
                        return;
                    }
                    for path in event.paths {
                        let _ = tx.send(path);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Source watch error"),
            },
            Config::default(),
        )?;
        watcher.watch(&self.source, RecursiveMode::Recursive)?;

        tracing::info!(
            path = ?self.source,
            debounce_ms = self.debounce.as_millis() as u64,
            "Source watcher started"
        );

        tokio::spawn(async move {
            loop {
                let first = tokio::select! {
                    path = rx.recv() => match path {
                        Some(path) => path,
                        None => break,
                    },
                    _ = shutdown.recv() => break,
                };
                if !self.relevant(&first) {
                    continue;
                }

                // Fold the rest of the burst into this change.
                let mut changed = 1usize;
                let deadline = tokio::time::sleep(self.debounce);
                tokio::pin!(deadline);
                loop {
                    tokio::select! {
                        _ = &mut deadline => break,
                        path = rx.recv() => match path {
                            Some(path) if self.relevant(&path) => changed += 1,
                            Some(_) => {}
                            None => break,
                        },
                    }
                }

                let request = adapter.on_source_changed();
                tracing::debug!(path = ?first, events = changed, ?request, "Sources changed");
            }
            tracing::debug!("Source watcher stopped");
        });

        Ok(watcher)
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    })
}
