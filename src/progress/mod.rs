//! Progress reporting shared by every transport.
//!
//! Transports never render anything themselves. They post [`ProgressEvent`]s
//! to a [`ProgressSink`] supplied by the host, which decides whether events end
//! up on a terminal, in a log, or on a channel consumed by a UI task.
//!
//! Terminal states (complete, failed, aborted) are not part of this protocol;
//! the host derives them from the result of the operation.

pub mod console;
pub mod format;

pub use console::ConsoleProgress;
pub use format::format_bytes;

use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Kind of a progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressKind {
    /// Standalone message, display and move on
    Message,
    /// Start of a longer running phase, closed by exactly one `End`
    Start,
    /// Update within a (`Start`, `End`) pair
    Progress,
    /// End of the current phase
    End,
}

impl fmt::Display for ProgressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message => write!(f, "MESSAGE"),
            Self::Start => write!(f, "START"),
            Self::Progress => write!(f, "PROGRESS"),
            Self::End => write!(f, "END"),
        }
    }
}

/// One unit of the status stream.
///
/// `Message` and `Start` always carry a message. `Progress` carries a
/// percentage, a message, or both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub kind: ProgressKind,
    pub message: Option<String>,
    /// 0-100
    pub percent: Option<u8>,
}

impl ProgressEvent {
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            kind: ProgressKind::Message,
            message: Some(text.into()),
            percent: None,
        }
    }

    pub fn start(text: impl Into<String>) -> Self {
        Self {
            kind: ProgressKind::Start,
            message: Some(text.into()),
            percent: None,
        }
    }

    /// Start a phase with an initial percentage (used when a phase reports
    /// percent-complete updates).
    pub fn start_at(text: impl Into<String>, percent: u8) -> Self {
        Self {
            kind: ProgressKind::Start,
            message: Some(text.into()),
            percent: Some(percent.min(100)),
        }
    }

    pub fn progress(message: Option<String>, percent: Option<u8>) -> Self {
        debug_assert!(
            message.is_some() || percent.is_some(),
            "progress event needs a message or a percent"
        );
        Self {
            kind: ProgressKind::Progress,
            message,
            percent: percent.map(|p| p.min(100)),
        }
    }

    pub fn end() -> Self {
        Self {
            kind: ProgressKind::End,
            message: None,
            percent: None,
        }
    }

    pub fn end_with(text: impl Into<String>) -> Self {
        Self {
            kind: ProgressKind::End,
            message: Some(text.into()),
            percent: None,
        }
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(ref msg) = self.message {
            write!(f, " {}", msg)?;
        }
        if let Some(pct) = self.percent {
            write!(f, " ({}%)", pct)?;
        }
        Ok(())
    }
}

/// Receiver of progress events.
///
/// Implemented for any `Fn(ProgressEvent)` closure, so a host can pass a
/// callback directly.
pub trait ProgressSink: Send + Sync {
    fn update(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn update(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Sink that discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn update(&self, _event: ProgressEvent) {}
}

/// Forwards events to an unbounded channel, for hosts that render on a
/// separate task. Events sent after the receiver is dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn update(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

/// Emits every event as a `tracing` record
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn update(&self, event: ProgressEvent) {
        let message = event.message.as_deref().unwrap_or("");
        match event.kind {
            ProgressKind::Progress => {
                tracing::debug!(percent = ?event.percent, "{}", message)
            }
            kind => tracing::info!(%kind, percent = ?event.percent, "{}", message),
        }
    }
}

/// Records events in order. Cloning shares the underlying log.
#[derive(Debug, Default, Clone)]
pub struct ProgressLog {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl ProgressLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events recorded so far
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<ProgressKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProgressSink for ProgressLog {
    fn update(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
