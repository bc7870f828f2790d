//! Per-operation context passed to every provider hook.

use crate::progress::{ProgressEvent, ProgressSink};
use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Remote configuration, parameters and commit metadata are free-form JSON
/// objects whose schema belongs to the provider.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Local -> remote
    Push,
    /// Remote -> local
    Pull,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push => write!(f, "push"),
            Self::Pull => write!(f, "pull"),
        }
    }
}

/// Provider-specific state produced once by `start_operation`.
///
/// Cheap to clone; the payload itself is immutable once attached.
#[derive(Clone)]
pub struct OperationData(Arc<dyn Any + Send + Sync>);

impl OperationData {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for OperationData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OperationData(..)")
    }
}

/// All data associated with one push or pull.
#[derive(Clone)]
pub struct RemoteOperation {
    progress: Arc<dyn ProgressSink>,
    pub remote: Properties,
    pub parameters: Properties,
    pub operation_id: String,
    pub commit_id: String,
    pub direction: Direction,
    data: Option<OperationData>,
}

impl RemoteOperation {
    pub fn new(
        direction: Direction,
        operation_id: impl Into<String>,
        commit_id: impl Into<String>,
        remote: Properties,
        parameters: Properties,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            progress,
            remote,
            parameters,
            operation_id: operation_id.into(),
            commit_id: commit_id.into(),
            direction,
            data: None,
        }
    }

    /// Attach the payload returned by the provider's start hook.
    pub fn with_data(mut self, data: Option<OperationData>) -> Self {
        self.data = data;
        self
    }

    pub fn data(&self) -> Option<&OperationData> {
        self.data.as_ref()
    }

    /// Typed view of the attached payload.
    pub fn data_as<T: Any>(&self) -> Option<&T> {
        self.data.as_ref().and_then(|d| d.downcast_ref::<T>())
    }

    pub fn is_push(&self) -> bool {
        self.direction == Direction::Push
    }

    /// Post a progress event to the host.
    pub fn report(&self, event: ProgressEvent) {
        self.progress.update(event);
    }

    pub fn sink(&self) -> &dyn ProgressSink {
        self.progress.as_ref()
    }
}

impl fmt::Debug for RemoteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteOperation")
            .field("operation_id", &self.operation_id)
            .field("commit_id", &self.commit_id)
            .field("direction", &self.direction)
            .field("has_data", &self.data.is_some())
            .finish_non_exhaustive()
    }
}

/// A volume to sync: its name on the remote, a display description and the
/// local directory holding its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub name: String,
    pub description: String,
    pub path: PathBuf,
}

impl Volume {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
