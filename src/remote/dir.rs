//! `dir` provider: commits stored as tar archives in a local (or mounted)
//! directory tree.
//!
//! ```text
//! <path>/<commit>/metadata.json
//! <path>/<commit>/<volume>.tar.gz
//! ```

use super::{parse_metadata, render_metadata, split_uri, RemoteServer};
use crate::commit::{filter_and_sort, require_str, validate_fields, Commit, TagFilter};
use crate::error::{RemoteError, Result};
use crate::exec::ProcessRunner;
use crate::operation::{OperationData, Properties, RemoteOperation, Volume};
use crate::transport::{ArchiveProvider, ArchiveTransport, SyncVolume};
use async_trait::async_trait;
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

const METADATA_FILE: &str = "metadata.json";

fn root(remote: &Properties) -> Result<PathBuf> {
    Ok(PathBuf::from(require_str(remote, "path")?))
}

fn commit_dir(remote: &Properties, commit_id: &str) -> Result<PathBuf> {
    Ok(root(remote)?.join(commit_id))
}

/// Read a file, `None` when it does not exist.
async fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

struct DirStore;

#[async_trait]
impl ArchiveProvider for DirStore {
    async fn push_archive(&self, op: &RemoteOperation, volume: &str, archive: &Path) -> Result<()> {
        let dir = commit_dir(&op.remote, &op.commit_id)?;
        fs::create_dir_all(&dir).await?;
        let bytes = fs::copy(archive, dir.join(format!("{}.tar.gz", volume))).await?;
        tracing::debug!(volume, bytes, "archive stored");
        Ok(())
    }

    async fn pull_archive(&self, op: &RemoteOperation, volume: &str, archive: &Path) -> Result<()> {
        let stored = commit_dir(&op.remote, &op.commit_id)?.join(format!("{}.tar.gz", volume));
        fs::copy(&stored, archive).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no archive for volume '{}' at {}", volume, stored.display()),
                )
            } else {
                e
            }
        })?;
        Ok(())
    }
}

pub struct DirRemote {
    archive: ArchiveTransport<DirStore>,
}

impl DirRemote {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            archive: ArchiveTransport::new(DirStore, runner),
        }
    }
}

#[async_trait]
impl RemoteServer for DirRemote {
    fn provider(&self) -> &str {
        "dir"
    }

    fn validate_remote(&self, remote: &Properties) -> Result<Properties> {
        validate_fields(remote, &["path"], &[])?;
        let path = require_str(remote, "path")?;
        if !Path::new(path).is_absolute() {
            return Err(RemoteError::invalid_config(format!(
                "path '{}' must be absolute",
                path
            )));
        }
        Ok(remote.clone())
    }

    fn validate_parameters(&self, parameters: &Properties) -> Result<Properties> {
        validate_fields(parameters, &[], &[])?;
        Ok(parameters.clone())
    }

    /// `dir:///absolute/path`
    fn parse_uri(&self, uri: &str) -> Result<Properties> {
        match split_uri(uri) {
            Some(("dir", path)) => {
                let mut remote = Properties::new();
                remote.insert("path".into(), Value::from(path));
                self.validate_remote(&remote)
            }
            _ => Err(RemoteError::invalid_config(format!(
                "not a dir uri: '{}'",
                uri
            ))),
        }
    }

    async fn list_commits(
        &self,
        remote: &Properties,
        _parameters: &Properties,
        tags: &[TagFilter],
    ) -> Result<Vec<Commit>> {
        let root = root(remote)?;
        let mut entries = match fs::read_dir(&root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut commits = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Some(text) = read_optional(&entry.path().join(METADATA_FILE)).await? else {
                continue;
            };
            match parse_metadata(&id, &text) {
                Ok(commit) => commits.push(commit),
                Err(e) => tracing::warn!(commit = %id, error = %e, "skipping commit"),
            }
        }

        Ok(filter_and_sort(commits, tags))
    }

    async fn get_commit(
        &self,
        remote: &Properties,
        _parameters: &Properties,
        commit_id: &str,
    ) -> Result<Option<Commit>> {
        let path = commit_dir(remote, commit_id)?.join(METADATA_FILE);
        match read_optional(&path).await? {
            Some(text) => parse_metadata(commit_id, &text).map(Some),
            None => Ok(None),
        }
    }

    async fn start_operation(&self, op: &RemoteOperation) -> Result<Option<OperationData>> {
        if op.is_push() {
            fs::create_dir_all(commit_dir(&op.remote, &op.commit_id)?).await?;
        }
        Ok(None)
    }

    async fn sync_volume(
        &self,
        op: &RemoteOperation,
        volume: &Volume,
        scratch: &Path,
    ) -> Result<()> {
        self.archive.sync_volume(op, volume, scratch).await
    }

    async fn end_operation(&self, op: &RemoteOperation, success: bool) -> Result<()> {
        if success || !op.is_push() {
            return Ok(());
        }
        let dir = commit_dir(&op.remote, &op.commit_id)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(commit = %op.commit_id, error = %e, "failed to remove partial commit")
            }
        }
        Ok(())
    }

    async fn push_metadata(
        &self,
        op: &RemoteOperation,
        commit: &Properties,
        is_update: bool,
    ) -> Result<()> {
        let dir = commit_dir(&op.remote, &op.commit_id)?;
        if !is_update {
            fs::create_dir_all(&dir).await?;
        }
        fs::write(dir.join(METADATA_FILE), render_metadata(commit)?).await?;
        Ok(())
    }
}
