//! Transport strategies for moving one volume between local and remote
//! storage.
//!
//! - [`rsync`]: differential transfer driven by an rsync child process, with
//!   live progress parsed from its output ([`rsync_output`])
//! - [`archive`]: whole-volume tar.gz archives handed to provider upload and
//!   download hooks
//!
//! Both implement [`SyncVolume`], so the caller does not care which one a
//! provider picked.

pub mod archive;
pub mod rsync;
pub mod rsync_output;
pub mod ssh;

pub use archive::{archive_path, ArchiveProvider, ArchiveTransport};
pub use rsync::{RsyncCommand, RsyncProvider, RsyncTransport};
pub use rsync_output::{OutputStats, RsyncOutputParser};
pub use ssh::SshAuth;

use crate::error::Result;
use crate::operation::{RemoteOperation, Volume};
use async_trait::async_trait;
use std::path::Path;

/// Sync one volume, push or pull depending on `op.direction`.
///
/// `scratch` is a directory private to the operation, usable for
/// intermediate artifacts. Progress is reported through the operation's
/// sink; failures are returned unchanged and never retried here.
#[async_trait]
pub trait SyncVolume: Send + Sync {
    async fn sync_volume(
        &self,
        op: &RemoteOperation,
        volume: &Volume,
        scratch: &Path,
    ) -> Result<()>;
}
