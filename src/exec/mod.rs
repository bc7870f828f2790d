//! Child process execution.
//!
//! Transports never touch `tokio::process` directly. They describe a command
//! with [`CommandSpec`] and hand it to a [`ProcessRunner`], which lets tests
//! substitute a [`ScriptedRunner`] for real `rsync`, `tar` or `ssh` binaries.

pub mod scripted;

pub use scripted::{ScriptedRunner, ScriptedOutput};

use crate::error::{RemoteError, Result};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};

/// Boxed output stream of a running process
pub type ProcessOutput = Box<dyn AsyncRead + Send + Unpin>;

/// A command to run: program, arguments, working directory and optional
/// bytes fed to stdin.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    pub stdin: Option<Vec<u8>>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Prepend a wrapper program, e.g. `sshpass -f file` in front of `rsync`.
    pub fn wrap<I, S>(self, program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut wrapped = CommandSpec::new(program).args(args);
        wrapped.args.push(self.program);
        wrapped.args.extend(self.args);
        wrapped.current_dir = self.current_dir;
        wrapped.stdin = self.stdin;
        wrapped
    }

    /// Program and arguments joined by spaces, for logs and error messages.
    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

/// A spawned child process.
#[async_trait]
pub trait RunningProcess: Send {
    /// Standard output; `None` once taken.
    fn take_stdout(&mut self) -> Option<ProcessOutput>;

    /// Standard error; `None` once taken.
    fn take_stderr(&mut self) -> Option<ProcessOutput>;

    /// Wait for exit and return the exit code.
    async fn wait(&mut self) -> Result<i32>;

    /// Release OS resources held for the child. Kills it if still running.
    /// Safe to call after `wait` and more than once.
    async fn release(&mut self);
}

/// Spawns child processes.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn RunningProcess>>;
}

/// Runner backed by `tokio::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioRunner;

impl TokioRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for TokioRunner {
    async fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn RunningProcess>> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        if let Some(ref dir) = spec.current_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        tracing::debug!(command = %spec, "spawning");

        let mut child = cmd.spawn().map_err(|source| RemoteError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        if let Some(ref input) = spec.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                // stdin must be written concurrently with output draining
                let input = input.clone();
                tokio::spawn(async move {
                    if let Err(e) = stdin.write_all(&input).await {
                        tracing::debug!(error = %e, "stdin closed early");
                    }
                    let _ = stdin.shutdown().await;
                });
            }
        }

        Ok(Box::new(TokioProcess { child }))
    }
}

struct TokioProcess {
    child: Child,
}

#[async_trait]
impl RunningProcess for TokioProcess {
    fn take_stdout(&mut self) -> Option<ProcessOutput> {
        self.child
            .stdout
            .take()
            .map(|s| Box::new(s) as ProcessOutput)
    }

    fn take_stderr(&mut self) -> Option<ProcessOutput> {
        self.child
            .stderr
            .take()
            .map(|s| Box::new(s) as ProcessOutput)
    }

    async fn wait(&mut self) -> Result<i32> {
        let status = self.child.wait().await?;
        Ok(exit_code(status))
    }

    async fn release(&mut self) {
        // Already reaped children report an error here, which is fine
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }
}

/// Exit code of a finished process. Death by signal maps to 128 + signal
/// on unix, like a shell reports it.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// Quote a word for a POSIX shell (remote commands over ssh, rsync `-e`).
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./:=@%+,".contains(&b));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Read a stream to the end, decoding lossily.
pub async fn read_all(stream: Option<ProcessOutput>) -> Result<String> {
    let Some(mut stream) = stream else {
        return Ok(String::new());
    };
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Output of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captured {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl Captured {
    /// Convert a nonzero exit into a transfer-command error
    pub fn check(self, spec: &CommandSpec) -> Result<String> {
        if self.exit_code == 0 {
            return Ok(self.stdout);
        }
        let output = if self.stderr.trim().is_empty() {
            self.stdout
        } else {
            self.stderr
        };
        Err(RemoteError::Command {
            command: spec.display(),
            exit_code: self.exit_code,
            output: output.trim_end().to_string(),
        })
    }
}

/// Run a command to completion, capturing both output streams.
pub async fn capture(runner: &dyn ProcessRunner, spec: &CommandSpec) -> Result<Captured> {
    let mut process = runner.spawn(spec).await?;
    let result = drain_and_wait(process.as_mut()).await;
    process.release().await;
    result
}

async fn drain_and_wait(process: &mut dyn RunningProcess) -> Result<Captured> {
    let stdout = process.take_stdout();
    let stderr = process.take_stderr();
    // Both pipes are drained together so neither can fill up and stall the child
    let (stdout, stderr) = tokio::try_join!(read_all(stdout), read_all(stderr))?;
    let exit_code = process.wait().await?;
    Ok(Captured {
        exit_code,
        stdout,
        stderr,
    })
}

/// Run a command and return its stdout; nonzero exit is an error carrying
/// the exit code and captured stderr.
pub async fn exec(runner: &dyn ProcessRunner, spec: &CommandSpec) -> Result<String> {
    let captured = capture(runner, spec).await?;
    if captured.exit_code != 0 {
        tracing::debug!(
            command = %spec,
            exit_code = captured.exit_code,
            "command failed"
        );
    }
    captured.check(spec)
}
