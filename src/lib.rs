//! volsync: push and pull data volumes to remotes.
//!
//! A commit is a set of named volumes plus free-form metadata. Providers
//! ([`remote`]) decide where commits live and which [`transport`] moves
//! volume data: rsync for live differential sync, tar archives for object
//! style storage. Transports report progress as [`progress::ProgressEvent`]s.

pub mod commit;
pub mod config;
pub mod engine;
pub mod error;
pub mod exec;
pub mod operation;
pub mod progress;
pub mod remote;
pub mod transport;

pub use commit::{filter_and_sort, match_tags, sort_descending, Commit, TagFilter};
pub use config::{Config, RemoteEntry};
pub use engine::{SyncEngine, SyncRequest, SyncStats};
pub use error::{RemoteError, Result};
pub use exec::{CommandSpec, ProcessRunner, TokioRunner};
pub use operation::{Direction, OperationData, Properties, RemoteOperation, Volume};
pub use progress::{format_bytes, ProgressEvent, ProgressKind, ProgressSink};
pub use remote::{ProviderRegistry, RemoteServer};
pub use transport::SyncVolume;
