//! rsync transport.
//!
//! The provider supplies two hooks: where a volume lives on the remote side,
//! and the rsync invocation for a given source and destination. The
//! transport orders the endpoints by direction, opens the sync phase and
//! runs rsync with its output streamed through [`RsyncOutputParser`].

use super::rsync_output::{OutputStats, RsyncOutputParser};
use super::ssh::SshAuth;
use super::SyncVolume;
use crate::error::{RemoteError, Result};
use crate::exec::{read_all, CommandSpec, ProcessRunner, RunningProcess};
use crate::operation::{Direction, RemoteOperation, Volume};
use crate::progress::{ProgressEvent, ProgressSink};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Provider hooks for rsync-based remotes
pub trait RsyncProvider: Send + Sync {
    /// rsync-style location of a volume on the remote, e.g.
    /// `user@host:/path/commit/data/volume/`.
    fn remote_path(&self, op: &RemoteOperation, volume: &str) -> Result<String>;

    /// The rsync invocation copying `src` to `dst`.
    fn rsync(&self, op: &RemoteOperation, src: &str, dst: &str) -> Result<RsyncCommand>;
}

/// Meaning of rsync's documented exit codes
pub fn describe_exit(code: i32) -> Option<&'static str> {
    Some(match code {
        1 => "syntax or usage error",
        2 => "protocol incompatibility",
        3 => "errors selecting input/output files, dirs",
        4 => "requested action not supported",
        5 => "error starting client-server protocol",
        10 => "error in socket I/O",
        11 => "error in file I/O",
        12 => "error in rsync protocol data stream",
        13 => "errors with program diagnostics",
        14 => "error in IPC code",
        20 => "received SIGUSR1 or SIGINT",
        23 => "partial transfer due to error",
        24 => "partial transfer due to vanished source files",
        25 => "the --max-delete limit stopped deletions",
        30 => "timeout in data send/receive",
        35 => "timeout waiting for daemon connection",
        255 => "ssh connection failed",
        _ => return None,
    })
}

/// One rsync run: endpoints plus the ssh authentication to reach the remote
/// side. Without `auth` rsync runs with its default remote shell.
#[derive(Debug, Clone)]
pub struct RsyncCommand {
    pub src: String,
    pub dst: String,
    pub auth: Option<Arc<SshAuth>>,
    pub program: String,
}

impl RsyncCommand {
    pub fn new(src: impl Into<String>, dst: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
            auth: None,
            program: "rsync".to_string(),
        }
    }

    pub fn with_auth(mut self, auth: Arc<SshAuth>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn spec(&self) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.program)
            .arg("-aS")
            .arg("--delete")
            .arg("--info=progress2");
        if let Some(ref auth) = self.auth {
            spec = spec.arg("-e").arg(auth.rsync_shell());
        }
        spec = spec.arg(&self.src).arg(&self.dst);

        match self.auth {
            Some(ref auth) => auth.wrap(spec),
            None => spec,
        }
    }

    /// Run rsync to completion, reporting progress to `sink`.
    ///
    /// The process is released on every path. A nonzero exit fails with the
    /// exit code and rsync's stderr.
    pub async fn run(
        &self,
        runner: &dyn ProcessRunner,
        sink: &dyn ProgressSink,
    ) -> Result<OutputStats> {
        let spec = self.spec();
        let mut process = runner.spawn(&spec).await?;
        let result = drive(process.as_mut(), sink, &spec).await;
        process.release().await;

        match result {
            Ok(stats) => {
                tracing::info!(
                    src = %self.src,
                    dst = %self.dst,
                    updates = stats.progress_events,
                    "rsync completed"
                );
                Ok(stats)
            }
            Err(e) => {
                if let Some(code) = e.exit_code() {
                    tracing::warn!(
                        src = %self.src,
                        dst = %self.dst,
                        exit_code = code,
                        reason = describe_exit(code).unwrap_or("unknown"),
                        "rsync failed"
                    );
                }
                Err(e)
            }
        }
    }
}

async fn drive(
    process: &mut dyn RunningProcess,
    sink: &dyn ProgressSink,
    spec: &CommandSpec,
) -> Result<OutputStats> {
    let stdout = process.take_stdout();
    let stderr = process.take_stderr();

    let mut parser = RsyncOutputParser::new(sink);
    let parse = async {
        match stdout {
            Some(stream) => parser.process_output(stream).await,
            None => Ok(OutputStats::default()),
        }
    };
    let (parsed, errors) = tokio::join!(parse, read_all(stderr));
    let stats = parsed?;
    let errors = errors?;

    let exit_code = process.wait().await?;
    if exit_code != 0 {
        return Err(RemoteError::Command {
            command: spec.display(),
            exit_code,
            output: errors.trim_end().to_string(),
        });
    }
    Ok(stats)
}

/// Syncs volumes with rsync through a provider's hooks.
pub struct RsyncTransport<P> {
    provider: P,
    runner: Arc<dyn ProcessRunner>,
}

impl<P: RsyncProvider> RsyncTransport<P> {
    pub fn new(provider: P, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { provider, runner }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }
}

#[async_trait]
impl<P: RsyncProvider> SyncVolume for RsyncTransport<P> {
    async fn sync_volume(
        &self,
        op: &RemoteOperation,
        volume: &Volume,
        _scratch: &Path,
    ) -> Result<()> {
        let remote_path = self.provider.remote_path(op, &volume.name)?;
        let local_path = volume.path.to_string_lossy().into_owned();
        let (src, dst) = match op.direction {
            Direction::Push => (local_path, remote_path),
            Direction::Pull => (remote_path, local_path),
        };

        op.report(ProgressEvent::start_at(
            format!("Syncing {}", volume.description),
            0,
        ));

        let rsync = self.provider.rsync(op, &src, &dst)?;
        let stats = rsync.run(self.runner.as_ref(), op.sink()).await?;

        // rsync normally closes the phase with its summary line
        if !stats.completed {
            tracing::debug!(volume = %volume.name, "rsync printed no summary");
            op.report(ProgressEvent::end());
        }
        Ok(())
    }
}
