//! Push and pull orchestration.
//!
//! The engine owns the operation lifecycle around a provider:
//! validate, start, sync each volume, store metadata (push only), end. The
//! provider's `end_operation` hook runs exactly once, with `success = false`
//! after any failure, and the original error is returned.

use crate::commit::Commit;
use crate::error::{RemoteError, Result};
use crate::operation::{Direction, Properties, RemoteOperation, Volume};
use crate::progress::{NoProgress, ProgressEvent, ProgressSink};
use crate::remote::RemoteServer;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;
use uuid::Uuid;

/// Everything needed for one push or pull
#[derive(Clone)]
pub struct SyncRequest {
    pub commit_id: String,
    pub remote: Properties,
    pub parameters: Properties,
    pub volumes: Vec<Volume>,
    /// Commit metadata stored on push
    pub metadata: Option<Properties>,
    pub progress: Arc<dyn ProgressSink>,
}

impl SyncRequest {
    pub fn new(commit_id: impl Into<String>, remote: Properties) -> Self {
        Self {
            commit_id: commit_id.into(),
            remote,
            parameters: Properties::new(),
            volumes: Vec::new(),
            metadata: None,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn parameters(mut self, parameters: Properties) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn volume(mut self, volume: Volume) -> Self {
        self.volumes.push(volume);
        self
    }

    pub fn volumes(mut self, volumes: impl IntoIterator<Item = Volume>) -> Self {
        self.volumes.extend(volumes);
        self
    }

    pub fn metadata(mut self, metadata: Properties) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }
}

/// Result of a completed operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub operation_id: String,
    pub commit_id: String,
    pub direction: Direction,
    pub volumes: usize,
    pub duration: Duration,
}

pub struct SyncEngine {
    server: Arc<dyn RemoteServer>,
    scratch_root: Option<PathBuf>,
}

impl SyncEngine {
    pub fn new(server: Arc<dyn RemoteServer>) -> Self {
        Self {
            server,
            scratch_root: None,
        }
    }

    /// Create per-operation scratch directories under `root` instead of the
    /// system temp directory.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    pub fn server(&self) -> &dyn RemoteServer {
        self.server.as_ref()
    }

    pub async fn push(&self, request: SyncRequest) -> Result<SyncStats> {
        self.run(Direction::Push, request).await
    }

    pub async fn pull(&self, request: SyncRequest) -> Result<SyncStats> {
        self.run(Direction::Pull, request).await
    }

    /// Replace the metadata of an existing commit without touching its data.
    pub async fn update_metadata(&self, request: SyncRequest) -> Result<()> {
        let metadata = request
            .metadata
            .clone()
            .ok_or_else(|| RemoteError::invalid_config("no metadata to update"))?;
        validate_metadata(&metadata)?;
        let op = self.operation(Direction::Push, &request)?;
        if self.existing(&op).await?.is_none() {
            return Err(RemoteError::invalid_config(format!(
                "no commit '{}' on remote",
                op.commit_id
            )));
        }
        self.server.push_metadata(&op, &metadata, true).await
    }

    async fn existing(&self, op: &RemoteOperation) -> Result<Option<Commit>> {
        self.server
            .get_commit(&op.remote, &op.parameters, &op.commit_id)
            .await
    }

    fn operation(&self, direction: Direction, request: &SyncRequest) -> Result<RemoteOperation> {
        check_path_component("commit id", &request.commit_id)?;
        let remote = self.server.validate_remote(&request.remote)?;
        let parameters = self.server.validate_parameters(&request.parameters)?;
        Ok(RemoteOperation::new(
            direction,
            Uuid::new_v4().to_string(),
            &request.commit_id,
            remote,
            parameters,
            Arc::clone(&request.progress),
        ))
    }

    async fn run(&self, direction: Direction, request: SyncRequest) -> Result<SyncStats> {
        check_volumes(&request.volumes)?;
        if let Some(ref metadata) = request.metadata {
            validate_metadata(metadata)?;
        }
        let op = self.operation(direction, &request)?;
        // a failed push removes the commit directory, so it must be new
        if op.is_push() && self.existing(&op).await?.is_some() {
            return Err(RemoteError::invalid_config(format!(
                "commit '{}' already exists",
                op.commit_id
            )));
        }
        let span = tracing::info_span!(
            "operation",
            id = %op.operation_id,
            commit = %op.commit_id,
            provider = self.server.provider(),
            %direction,
        );

        let metadata = match direction {
            Direction::Push => Some(with_timestamp(request.metadata.unwrap_or_default())),
            Direction::Pull => None,
        };

        self.execute(op, &request.volumes, metadata)
            .instrument(span)
            .await
    }

    async fn execute(
        &self,
        op: RemoteOperation,
        volumes: &[Volume],
        metadata: Option<Properties>,
    ) -> Result<SyncStats> {
        let started = Instant::now();
        let scratch = match self.scratch_root {
            Some(ref root) => tempfile::Builder::new()
                .prefix("volsync-")
                .tempdir_in(root)?,
            None => tempfile::Builder::new().prefix("volsync-").tempdir()?,
        };

        op.report(ProgressEvent::message(match op.direction {
            Direction::Push => format!("Pushing {}", op.commit_id),
            Direction::Pull => format!("Pulling {}", op.commit_id),
        }));
        tracing::info!(volumes = volumes.len(), "operation started");

        let op = match self.server.start_operation(&op).await {
            Ok(data) => op.with_data(data),
            Err(e) => return Err(self.abort(&op, e).await),
        };

        if let Err(e) = self.transfer(&op, volumes, scratch.path(), metadata).await {
            return Err(self.abort(&op, e).await);
        }
        self.server.end_operation(&op, true).await?;

        let stats = SyncStats {
            operation_id: op.operation_id.clone(),
            commit_id: op.commit_id.clone(),
            direction: op.direction,
            volumes: volumes.len(),
            duration: started.elapsed(),
        };
        op.report(ProgressEvent::message(match op.direction {
            Direction::Push => format!("Pushed {}", op.commit_id),
            Direction::Pull => format!("Pulled {}", op.commit_id),
        }));
        tracing::info!(elapsed_ms = stats.duration.as_millis() as u64, "operation completed");
        Ok(stats)
    }

    async fn transfer(
        &self,
        op: &RemoteOperation,
        volumes: &[Volume],
        scratch: &Path,
        metadata: Option<Properties>,
    ) -> Result<()> {
        for volume in volumes {
            tracing::debug!(volume = %volume.name, path = %volume.path.display(), "syncing volume");
            self.server.sync_volume(op, volume, scratch).await?;
        }
        if let Some(metadata) = metadata {
            self.server.push_metadata(op, &metadata, false).await?;
        }
        Ok(())
    }

    /// Run the failure hook and hand back the error that caused it.
    async fn abort(&self, op: &RemoteOperation, error: RemoteError) -> RemoteError {
        tracing::warn!(error = %error, "operation failed");
        if let Err(e) = self.server.end_operation(op, false).await {
            tracing::warn!(error = %e, "end of failed operation also failed");
        }
        error
    }
}

/// Commit ids and volume names become remote path components.
fn check_path_component(what: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(RemoteError::invalid_config(format!(
            "invalid {} '{}'",
            what, name
        )));
    }
    Ok(())
}

/// Volume names must also be unique within one operation.
fn check_volumes(volumes: &[Volume]) -> Result<()> {
    let mut seen = HashSet::new();
    for volume in volumes {
        let name = volume.name.as_str();
        check_path_component("volume name", name)?;
        if !seen.insert(name) {
            return Err(RemoteError::invalid_config(format!(
                "duplicate volume '{}'",
                name
            )));
        }
    }
    Ok(())
}

/// Commits pushed without a timestamp are stamped with the current time.
fn with_timestamp(mut metadata: Properties) -> Properties {
    if !metadata.contains_key("timestamp") {
        metadata.insert(
            "timestamp".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
    }
    metadata
}

/// Check the properties with meaning to commit queries. Everything else in
/// the metadata is free-form.
pub fn validate_metadata(metadata: &Properties) -> Result<()> {
    if let Some(tags) = metadata.get("tags") {
        let Some(tags) = tags.as_object() else {
            return Err(RemoteError::invalid_config("tags must be an object"));
        };
        if tags.values().any(|v| !v.is_string()) {
            return Err(RemoteError::invalid_config("tag values must be strings"));
        }
    }
    if let Some(ts) = metadata.get("timestamp") {
        let valid = ts
            .as_str()
            .map(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok())
            .unwrap_or(false);
        if !valid {
            return Err(RemoteError::invalid_config("timestamp must be RFC 3339"));
        }
    }
    Ok(())
}
