//! Command-driven build pipeline.
//!
//! Runs the project's bundler (any shell command) in the project directory,
//! then reads everything under the output directory into memory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use axum::body::Bytes;
use tokio::process::Command;

use crate::build::pipeline::{BuildError, BuildPipeline, BuildResult, BuiltAsset};
use crate::config::BuildConfig;

/// How much of the command's stderr ends up in the error.
const STDERR_TAIL: usize = 2048;

pub struct CommandPipeline {
    project_dir: PathBuf,
    output_dir: PathBuf,
    command: Option<String>,
    previous: Mutex<HashMap<String, Bytes>>,
}

impl CommandPipeline {
    pub fn new(config: &BuildConfig) -> Self {
        Self {
            project_dir: config.project_dir.clone(),
            output_dir: config.output_path(),
            command: config.command.clone(),
            previous: Mutex::new(HashMap::new()),
        }
    }

    async fn run_command(&self, command: &str) -> Result<(), BuildError> {
        tracing::debug!(command, dir = ?self.project_dir, "Running build command");

        let output = shell(command)
            .current_dir(&self.project_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| BuildError::Spawn {
                command: command.to_string(),
                source,
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let start = stderr
            .char_indices()
            .rev()
            .nth(STDERR_TAIL)
            .map(|(i, _)| i)
            .unwrap_or(0);

        Err(BuildError::Command {
            command: command.to_string(),
            status: output.status.to_string(),
            stderr: stderr[start..].to_string(),
        })
    }
}

#[cfg(unix)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[async_trait]
impl BuildPipeline for CommandPipeline {
    async fn trigger_build(&self) -> Result<BuildResult, BuildError> {
        if let Some(command) = &self.command {
            self.run_command(command).await?;
        }

        let files = scan(&self.output_dir).await?;

        let mut previous = self.previous.lock().unwrap_or_else(PoisonError::into_inner);
        let mut changed_paths: Vec<String> = files
            .iter()
            .filter(|(path, content)| previous.get(*path) != Some(*content))
            .map(|(path, _)| path.clone())
            .collect();
        changed_paths.extend(
            previous
                .keys()
                .filter(|path| !files.contains_key(*path))
                .cloned(),
        );
        changed_paths.sort();
        *previous = files.clone();
        drop(previous);

        let artifacts = files
            .into_iter()
            .map(|(path, content)| {
                let content_type = mime_guess::from_path(&path)
                    .first_or_octet_stream()
                    .essence_str()
                    .to_string();
                (path, BuiltAsset::new(content, content_type))
            })
            .collect();

        Ok(BuildResult {
            changed_paths,
            artifacts,
        })
    }
}

/// Read every file under `root`, keyed by `/`-separated relative path.
async fn scan(root: &Path) -> Result<HashMap<String, Bytes>, BuildError> {
    let output_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| BuildError::Output { path, source }
    };

    let mut files = HashMap::new();
    let mut dirs = vec![root.to_path_buf()];

    while let Some(dir) = dirs.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(output_err(&dir))?;
        while let Some(entry) = entries.next_entry().await.map_err(output_err(&dir))? {
            let path = entry.path();
            let file_type = entry.file_type().await.map_err(output_err(&path))?;
            if file_type.is_dir() {
                dirs.push(path);
                continue;
            }
            let Some(key) = logical_path(root, &path) else {
                continue;
            };
            let content = tokio::fs::read(&path).await.map_err(output_err(&path))?;
            files.insert(key, Bytes::from(content));
        }
    }
    Ok(files)
}

fn logical_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
    Some(parts?.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(project: &Path, command: Option<&str>) -> BuildConfig {
        BuildConfig {
            project_dir: project.to_path_buf(),
            output_dir: PathBuf::from("dist"),
            command: command.map(str::to_string),
            ..BuildConfig::default()
        }
    }

    #[tokio::test]
    async fn scans_output_and_reports_changes() {
        let dir = tempfile::tempdir().unwrap();
        let dist = dir.path().join("dist");
        std::fs::create_dir_all(dist.join("js")).unwrap();
        std::fs::write(dist.join("index.html"), "<html></html>").unwrap();
        std::fs::write(dist.join("js/app.js"), "console.log(1)").unwrap();

        let pipeline = CommandPipeline::new(&config(dir.path(), None));

        let first = pipeline.trigger_build().await.unwrap();
        assert_eq!(first.changed_paths, vec!["index.html", "js/app.js"]);
        assert_eq!(first.artifacts["index.html"].content_type, "text/html");
        assert_eq!(first.artifacts["js/app.js"].content, "console.log(1)");

        std::fs::write(dist.join("js/app.js"), "console.log(2)").unwrap();
        std::fs::remove_file(dist.join("index.html")).unwrap();

        let second = pipeline.trigger_build().await.unwrap();
        assert_eq!(second.changed_paths, vec!["index.html", "js/app.js"]);
        assert!(!second.artifacts.contains_key("index.html"));

        let third = pipeline.trigger_build().await.unwrap();
        assert!(third.changed_paths.is_empty());
    }

    #[tokio::test]
    async fn missing_output_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = CommandPipeline::new(&config(dir.path(), None));
        assert!(matches!(
            pipeline.trigger_build().await,
            Err(BuildError::Output { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_command_before_scanning() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = CommandPipeline::new(&config(
            dir.path(),
            Some("mkdir -p dist && printf ok > dist/out.txt"),
        ));

        let result = pipeline.trigger_build().await.unwrap();
        assert_eq!(result.artifacts["out.txt"].content, "ok");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = CommandPipeline::new(&config(
            dir.path(),
            Some("echo 'SyntaxError: unexpected token' >&2; exit 3"),
        ));

        match pipeline.trigger_build().await {
            Err(BuildError::Command { stderr, .. }) => {
                assert_eq!(stderr, "SyntaxError: unexpected token");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
