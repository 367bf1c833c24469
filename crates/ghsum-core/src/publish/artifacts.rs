//! Per-repository output files.

use std::path::{Path, PathBuf};

use ghsum_state::fs::atomic_write;
use ghsum_state::StateError;

use crate::domain::{ActivityPayload, PublishError, RepoId};

pub fn json_path(output_dir: &Path, repo: &RepoId) -> PathBuf {
    output_dir.join(format!("{}_summary.json", repo.file_stem()))
}

pub fn markdown_path(output_dir: &Path, repo: &RepoId) -> PathBuf {
    output_dir.join(format!("{}_summary.md", repo.file_stem()))
}

pub fn render_markdown(repo: &RepoId, summary: &str) -> String {
    format!("## Summary for {repo}\n\n{summary}")
}

/// Write the pretty-printed payload.
pub async fn write_json(output_dir: &Path, payload: &ActivityPayload) -> Result<PathBuf, PublishError> {
    let bytes = serde_json::to_vec_pretty(payload)?;
    let path = json_path(output_dir, &payload.repo);
    write_file(path, bytes).await
}

pub async fn write_markdown(
    output_dir: &Path,
    repo: &RepoId,
    summary: &str,
) -> Result<PathBuf, PublishError> {
    let path = markdown_path(output_dir, repo);
    write_file(path, render_markdown(repo, summary).into_bytes()).await
}

pub(crate) async fn write_file(path: PathBuf, bytes: Vec<u8>) -> Result<PathBuf, PublishError> {
    tokio::task::spawn_blocking(move || atomic_write(&path, &bytes).map(|()| path))
        .await
        .map_err(StateError::from)?
        .map_err(PublishError::from)
}
