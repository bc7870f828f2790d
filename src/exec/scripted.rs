//! Scripted process runner.
//!
//! Replays canned output instead of spawning anything. Every spawned
//! [`CommandSpec`] is recorded so callers can assert on the exact command
//! lines a transport produced.

use super::{CommandSpec, ProcessOutput, ProcessRunner, RunningProcess};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Canned result of one process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

impl ScriptedOutput {
    pub fn success(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code,
            ..Default::default()
        }
    }
}

/// Runner answering spawns from a queue. An empty queue answers with a
/// successful process that prints nothing.
#[derive(Debug, Default, Clone)]
pub struct ScriptedRunner {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    queue: Mutex<VecDeque<ScriptedOutput>>,
    calls: Mutex<Vec<CommandSpec>>,
    released: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the output for the next spawn.
    pub fn push(&self, output: ScriptedOutput) {
        if let Ok(mut queue) = self.inner.queue.lock() {
            queue.push_back(output);
        }
    }

    /// Every command spawned so far, in order
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.inner
            .calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Number of processes released
    pub fn released(&self) -> usize {
        self.inner.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn RunningProcess>> {
        if let Ok(mut calls) = self.inner.calls.lock() {
            calls.push(spec.clone());
        }
        let output = self
            .inner
            .queue
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .unwrap_or_default();

        Ok(Box::new(ScriptedProcess {
            stdout: Some(output.stdout),
            stderr: Some(output.stderr),
            exit_code: output.exit_code,
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct ScriptedProcess {
    stdout: Option<Vec<u8>>,
    stderr: Option<Vec<u8>>,
    exit_code: i32,
    inner: Arc<Inner>,
}

#[async_trait]
impl RunningProcess for ScriptedProcess {
    fn take_stdout(&mut self) -> Option<ProcessOutput> {
        self.stdout
            .take()
            .map(|bytes| Box::new(Cursor::new(bytes)) as ProcessOutput)
    }

    fn take_stderr(&mut self) -> Option<ProcessOutput> {
        self.stderr
            .take()
            .map(|bytes| Box::new(Cursor::new(bytes)) as ProcessOutput)
    }

    async fn wait(&mut self) -> Result<i32> {
        Ok(self.exit_code)
    }

    async fn release(&mut self) {
        self.inner.released.fetch_add(1, Ordering::SeqCst);
    }
}
