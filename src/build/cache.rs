//! Build artifact cache.
//!
//! Readers load an `Arc` of the current [`Snapshot`]; the adapter swaps in a
//! whole new snapshot after each rebuild. A reader never observes a
//! half-applied build.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::body::Bytes;

use crate::build::pipeline::BuildResult;

/// A cached output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub content: Bytes,
    pub content_type: String,
    /// Generation in which this content was last changed.
    pub generation: u64,
}

impl Artifact {
    /// Weak validator: changes whenever the content is rebuilt.
    pub fn etag(&self) -> String {
        format!("W/\"{}-{}\"", self.generation, self.content.len())
    }
}

/// Immutable view of every artifact at one generation.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub generation: u64,
    pub artifacts: HashMap<String, Arc<Artifact>>,
}

impl Snapshot {
    pub fn get(&self, path: &str) -> Option<&Arc<Artifact>> {
        self.artifacts.get(path)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

/// Outcome of applying a build to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub generation: u64,
    pub changed: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ArtifactCache {
    current: ArcSwap<Snapshot>,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.current.load().generation
    }

    /// Replace changed entries and drop deleted ones.
    ///
    /// The generation advances only if some path was added, changed or
    /// removed; `None` means the build produced identical output. Only the
    /// adapter's rebuild task calls this, so there is a single writer.
    pub(crate) fn apply(&self, result: BuildResult) -> Option<Applied> {
        let previous = self.current.load_full();
        let generation = previous.generation + 1;

        let mut changed = Vec::new();
        let mut artifacts = HashMap::with_capacity(result.artifacts.len());

        for (path, asset) in result.artifacts {
            match previous.artifacts.get(&path) {
                Some(existing)
                    if existing.content == asset.content
                        && existing.content_type == asset.content_type =>
                {
                    artifacts.insert(path, Arc::clone(existing));
                }
                _ => {
                    changed.push(path.clone());
                    artifacts.insert(
                        path,
                        Arc::new(Artifact {
                            content: asset.content,
                            content_type: asset.content_type,
                            generation,
                        }),
                    );
                }
            }
        }

        for path in previous.artifacts.keys() {
            if !artifacts.contains_key(path) {
                changed.push(path.clone());
            }
        }

        if changed.is_empty() {
            return None;
        }
        changed.sort();

        self.current.store(Arc::new(Snapshot {
            generation,
            artifacts,
        }));
        Some(Applied {
            generation,
            changed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::pipeline::BuiltAsset;

    fn build(files: &[(&str, &str)]) -> BuildResult {
        BuildResult {
            changed_paths: Vec::new(),
            artifacts: files
                .iter()
                .map(|(path, body)| {
                    (
                        path.to_string(),
                        BuiltAsset::new(body.to_string(), "text/plain"),
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn generation_advances_only_on_change() {
        let cache = ArtifactCache::new();
        assert_eq!(cache.generation(), 0);

        let applied = cache.apply(build(&[("a.js", "1"), ("b.js", "1")])).unwrap();
        assert_eq!(applied.generation, 1);
        assert_eq!(applied.changed, vec!["a.js", "b.js"]);

        assert!(cache.apply(build(&[("a.js", "1"), ("b.js", "1")])).is_none());
        assert_eq!(cache.generation(), 1);

        let applied = cache.apply(build(&[("a.js", "2"), ("b.js", "1")])).unwrap();
        assert_eq!(applied.generation, 2);
        assert_eq!(applied.changed, vec!["a.js"]);

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.get("a.js").unwrap().generation, 2);
        assert_eq!(snapshot.get("b.js").unwrap().generation, 1);
    }

    #[test]
    fn deleted_outputs_are_removed() {
        let cache = ArtifactCache::new();
        cache.apply(build(&[("a.js", "1"), ("old.js", "1")]));

        let applied = cache.apply(build(&[("a.js", "1")])).unwrap();
        assert_eq!(applied.changed, vec!["old.js"]);
        assert!(cache.snapshot().get("old.js").is_none());
    }

    #[test]
    fn old_snapshots_stay_intact() {
        let cache = ArtifactCache::new();
        cache.apply(build(&[("a.js", "1")]));
        let before = cache.snapshot();

        cache.apply(build(&[("a.js", "2")]));

        assert_eq!(before.get("a.js").unwrap().content, "1");
        assert_eq!(cache.snapshot().get("a.js").unwrap().content, "2");
    }
}
