//! Archive transport.
//!
//! For remotes that store whole volumes as objects. A push packs the volume
//! directory into `<scratch>/<volume>.tar.gz` and hands it to the provider's
//! upload hook; a pull downloads the archive to the same place and unpacks it
//! into the volume directory. Each step is its own progress phase.

use super::SyncVolume;
use crate::error::Result;
use crate::exec::{exec, CommandSpec, ProcessRunner};
use crate::operation::{Direction, RemoteOperation, Volume};
use crate::progress::ProgressEvent;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Upload and download hooks of an archive-based remote
#[async_trait]
pub trait ArchiveProvider: Send + Sync {
    /// Store `archive` as the remote copy of `volume`.
    async fn push_archive(&self, op: &RemoteOperation, volume: &str, archive: &Path)
        -> Result<()>;

    /// Fetch the remote copy of `volume` into `archive`.
    async fn pull_archive(&self, op: &RemoteOperation, volume: &str, archive: &Path)
        -> Result<()>;
}

/// Local archive location for a volume
pub fn archive_path(scratch: &Path, volume: &str) -> PathBuf {
    scratch.join(format!("{}.tar.gz", volume))
}

pub struct ArchiveTransport<P> {
    provider: P,
    runner: Arc<dyn ProcessRunner>,
}

impl<P: ArchiveProvider> ArchiveTransport<P> {
    pub fn new(provider: P, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { provider, runner }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    async fn push(&self, op: &RemoteOperation, volume: &Volume, archive: &Path) -> Result<()> {
        op.report(ProgressEvent::start(format!(
            "Creating archive for {}",
            volume.description
        )));
        let create = CommandSpec::new("tar")
            .arg("czf")
            .arg(archive.to_string_lossy())
            .arg(".")
            .current_dir(&volume.path);
        exec(self.runner.as_ref(), &create).await?;
        op.report(ProgressEvent::end());

        op.report(ProgressEvent::start(format!(
            "Pushing archive for {}",
            volume.description
        )));
        self.provider
            .push_archive(op, &volume.name, archive)
            .await?;
        match tokio::fs::remove_file(archive).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        op.report(ProgressEvent::end());

        tracing::info!(volume = %volume.name, "archive pushed");
        Ok(())
    }

    async fn pull(&self, op: &RemoteOperation, volume: &Volume, archive: &Path) -> Result<()> {
        op.report(ProgressEvent::start(format!(
            "Pulling archive for {}",
            volume.description
        )));
        self.provider
            .pull_archive(op, &volume.name, archive)
            .await?;
        op.report(ProgressEvent::end());

        op.report(ProgressEvent::start(format!(
            "Extracting archive for {}",
            volume.description
        )));
        tokio::fs::create_dir_all(&volume.path).await?;
        let extract = CommandSpec::new("tar")
            .arg("xzf")
            .arg(archive.to_string_lossy())
            .current_dir(&volume.path);
        exec(self.runner.as_ref(), &extract).await?;
        op.report(ProgressEvent::end());

        tracing::info!(volume = %volume.name, "archive extracted");
        Ok(())
    }
}

#[async_trait]
impl<P: ArchiveProvider> SyncVolume for ArchiveTransport<P> {
    async fn sync_volume(
        &self,
        op: &RemoteOperation,
        volume: &Volume,
        scratch: &Path,
    ) -> Result<()> {
        let archive = archive_path(scratch, &volume.name);
        match op.direction {
            Direction::Push => self.push(op, volume, &archive).await,
            Direction::Pull => self.pull(op, volume, &archive).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::exec::{ScriptedOutput, ScriptedRunner};
    use crate::operation::Properties;
    use crate::progress::{ProgressKind, ProgressLog};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct TestRemote {
        archive: Mutex<Option<PathBuf>>,
        fail: bool,
    }

    impl TestRemote {
        fn record(&self, archive: &Path) -> Result<()> {
            if let Ok(mut slot) = self.archive.lock() {
                *slot = Some(archive.to_path_buf());
            }
            if self.fail {
                return Err(RemoteError::invalid_config("upload refused"));
            }
            Ok(())
        }

        fn archive(&self) -> Option<PathBuf> {
            self.archive.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ArchiveProvider for TestRemote {
        async fn push_archive(&self, _op: &RemoteOperation, _volume: &str, archive: &Path) -> Result<()> {
            self.record(archive)
        }

        async fn pull_archive(&self, _op: &RemoteOperation, _volume: &str, archive: &Path) -> Result<()> {
            self.record(archive)
        }
    }

    fn operation(direction: Direction, log: &ProgressLog) -> RemoteOperation {
        RemoteOperation::new(
            direction,
            "operation",
            "commit",
            Properties::new(),
            Properties::new(),
            Arc::new(log.clone()),
        )
    }

    struct Fixture {
        scratch: TempDir,
        data: TempDir,
        runner: ScriptedRunner,
        log: ProgressLog,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                scratch: TempDir::new().unwrap(),
                data: TempDir::new().unwrap(),
                runner: ScriptedRunner::new(),
                log: ProgressLog::new(),
            }
        }

        fn volume(&self) -> Volume {
            Volume::new("volume", "description", self.data.path().join("volume"))
        }

        fn transport(&self, remote: TestRemote) -> ArchiveTransport<TestRemote> {
            ArchiveTransport::new(remote, Arc::new(self.runner.clone()))
        }

        fn expected_archive(&self) -> PathBuf {
            self.scratch.path().join("volume.tar.gz")
        }
    }

    fn summary(log: &ProgressLog) -> Vec<(ProgressKind, Option<String>)> {
        log.events()
            .into_iter()
            .map(|e| (e.kind, e.message))
            .collect()
    }

    #[tokio::test]
    async fn test_push_progress_and_commands() {
        let f = Fixture::new();
        let archive = f.transport(TestRemote::default());
        let volume = f.volume();

        archive
            .sync_volume(&operation(Direction::Push, &f.log), &volume, f.scratch.path())
            .await
            .unwrap();

        assert_eq!(
            summary(&f.log),
            vec![
                (ProgressKind::Start, Some("Creating archive for description".to_string())),
                (ProgressKind::End, None),
                (ProgressKind::Start, Some("Pushing archive for description".to_string())),
                (ProgressKind::End, None),
            ]
        );

        let expected = f.expected_archive();
        assert_eq!(archive.provider().archive(), Some(expected.clone()));

        let calls = f.runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].display(),
            format!("tar czf {} .", expected.display())
        );
        assert_eq!(calls[0].current_dir.as_deref(), Some(volume.path()));
    }

    #[tokio::test]
    async fn test_push_removes_local_archive() {
        let f = Fixture::new();
        std::fs::write(f.expected_archive(), b"archive").unwrap();

        f.transport(TestRemote::default())
            .sync_volume(&operation(Direction::Push, &f.log), &f.volume(), f.scratch.path())
            .await
            .unwrap();

        assert!(!f.expected_archive().exists());
    }

    #[tokio::test]
    async fn test_pull_progress_and_commands() {
        let f = Fixture::new();
        let archive = f.transport(TestRemote::default());
        let volume = f.volume();

        archive
            .sync_volume(&operation(Direction::Pull, &f.log), &volume, f.scratch.path())
            .await
            .unwrap();

        assert_eq!(
            summary(&f.log),
            vec![
                (ProgressKind::Start, Some("Pulling archive for description".to_string())),
                (ProgressKind::End, None),
                (ProgressKind::Start, Some("Extracting archive for description".to_string())),
                (ProgressKind::End, None),
            ]
        );

        let expected = f.expected_archive();
        assert_eq!(archive.provider().archive(), Some(expected.clone()));
        assert_eq!(
            f.runner.calls()[0].display(),
            format!("tar xzf {}", expected.display())
        );
        assert!(volume.path().is_dir());
    }

    #[tokio::test]
    async fn test_tar_failure_stops_push() {
        let f = Fixture::new();
        f.runner.push(ScriptedOutput::failure(2, "tar: volume: Cannot open"));
        let archive = f.transport(TestRemote::default());

        let err = archive
            .sync_volume(&operation(Direction::Push, &f.log), &f.volume(), f.scratch.path())
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), Some(2));
        assert_eq!(err.command_output(), Some("tar: volume: Cannot open"));
        assert_eq!(f.log.kinds(), vec![ProgressKind::Start]);
        assert_eq!(archive.provider().archive(), None);
    }

    #[tokio::test]
    async fn test_download_failure_skips_extract() {
        let f = Fixture::new();
        let remote = TestRemote {
            fail: true,
            ..Default::default()
        };

        let err = f
            .transport(remote)
            .sync_volume(&operation(Direction::Pull, &f.log), &f.volume(), f.scratch.path())
            .await
            .unwrap_err();

        assert!(err.is_config());
        assert_eq!(f.log.kinds(), vec![ProgressKind::Start]);
        assert!(f.runner.calls().is_empty());
    }

    #[test]
    fn test_archive_path() {
        assert_eq!(
            archive_path(Path::new("/scratch"), "pg-data"),
            PathBuf::from("/scratch/pg-data.tar.gz")
        );
    }
}
