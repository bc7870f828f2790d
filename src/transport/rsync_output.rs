//! Live parsing of rsync console output.
//!
//! rsync run with `--info=progress2` redraws a single progress line using
//! carriage returns and finishes with a summary line:
//!
//! ```text
//!      14,221,312  50%   14.88MB/s    0:00:00 (xfr#1, to-chk=1/3)
//! sent 11,157,504 bytes  received 4,229 bytes  4,464,693.20 bytes/sec
//! ```
//!
//! Records are split on both `\r` and `\n` and matched independently. Progress
//! lines become `Progress` events, the first summary line becomes the `End`
//! event of the sync phase, and everything else (file lists, `total size is`
//! footers, warnings) is skipped.

use crate::progress::{format_bytes, ProgressEvent, ProgressSink};
use regex::Regex;
use std::io;
use std::sync::OnceLock;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Longest record kept; anything beyond is dropped until the next separator
const MAX_LINE_LEN: usize = 64 * 1024;

fn progress_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*([\d,]+)\s+(\d+)%\s+([\d.,]+)([kKMGT]?)B/s")
            .expect("valid progress regex")
    })
}

fn summary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*sent\s+([\d,]+)\s+bytes\s+received\s+([\d,]+)\s+bytes\s+([\d.,]+)\s+bytes/sec")
            .expect("valid summary regex")
    })
}

/// A recognized line of rsync output
#[derive(Debug, Clone, PartialEq)]
pub enum RsyncLine {
    /// Transfer progress: bytes so far, percent complete, rate in bytes/s
    Progress { bytes: f64, percent: u8, rate: f64 },
    /// Final summary: bytes sent and received, overall rate in bytes/s
    Summary { sent: f64, received: f64, rate: f64 },
}

impl RsyncLine {
    pub fn to_event(&self) -> ProgressEvent {
        match *self {
            RsyncLine::Progress {
                bytes,
                percent,
                rate,
            } => ProgressEvent::progress(
                Some(format!("{}B ({}B/s)", format_bytes(bytes), format_bytes(rate))),
                Some(percent),
            ),
            RsyncLine::Summary {
                sent,
                received,
                rate,
            } => ProgressEvent::end_with(format!(
                "{}B sent  {}B received  ({}B/sec)",
                format_bytes(sent),
                format_bytes(received),
                format_bytes(rate)
            )),
        }
    }
}

/// Parse "13,565,952" or "4464693.20".
fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|c| *c != ',').collect();
    let value: f64 = cleaned.parse().ok()?;
    value.is_finite().then_some(value)
}

/// Multiplier for the unit letter rsync prints before `B/s`
fn rate_multiplier(unit: &str) -> f64 {
    match unit {
        "k" | "K" => 1024.0,
        "M" => 1024.0 * 1024.0,
        "G" => 1024.0 * 1024.0 * 1024.0,
        "T" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => 1.0,
    }
}

/// Classify one line of output. Returns `None` for anything that carries no
/// progress information.
pub fn parse_line(line: &str) -> Option<RsyncLine> {
    if let Some(caps) = progress_re().captures(line) {
        let bytes = parse_number(&caps[1])?;
        let percent = caps[2].parse::<u32>().ok()?.min(100) as u8;
        let rate = parse_number(&caps[3])? * rate_multiplier(&caps[4]);
        return Some(RsyncLine::Progress {
            bytes,
            percent,
            rate,
        });
    }

    if let Some(caps) = summary_re().captures(line) {
        return Some(RsyncLine::Summary {
            sent: parse_number(&caps[1])?,
            received: parse_number(&caps[2])?,
            rate: parse_number(&caps[3])?,
        });
    }

    None
}

/// Counters collected while parsing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputStats {
    /// Records read, including ignored ones
    pub lines: usize,
    /// `Progress` events emitted
    pub progress_events: usize,
    /// Whether the summary line was seen (and its `End` emitted)
    pub completed: bool,
}

/// Turns rsync output into progress events on a sink.
pub struct RsyncOutputParser<'a> {
    sink: &'a dyn ProgressSink,
    stats: OutputStats,
}

impl<'a> RsyncOutputParser<'a> {
    pub fn new(sink: &'a dyn ProgressSink) -> Self {
        Self {
            sink,
            stats: OutputStats::default(),
        }
    }

    pub fn stats(&self) -> OutputStats {
        self.stats
    }

    /// Handle one record.
    pub fn process_line(&mut self, line: &str) {
        self.stats.lines += 1;
        match parse_line(line) {
            Some(parsed @ RsyncLine::Progress { .. }) => {
                self.stats.progress_events += 1;
                self.sink.update(parsed.to_event());
            }
            Some(parsed @ RsyncLine::Summary { .. }) => {
                // Only the first summary closes the phase
                if !self.stats.completed {
                    self.stats.completed = true;
                    self.sink.update(parsed.to_event());
                }
            }
            None => {}
        }
    }

    /// Consume a stream until end of input, one record at a time.
    ///
    /// Only I/O errors stop parsing early; unrecognized input is skipped.
    pub async fn process_output<R>(&mut self, stream: R) -> io::Result<OutputStats>
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(stream);
        let mut record: Vec<u8> = Vec::with_capacity(256);

        loop {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                self.flush(&record);
                break;
            }

            match available.iter().position(|b| *b == b'\n' || *b == b'\r') {
                Some(pos) => {
                    append_capped(&mut record, &available[..pos]);
                    reader.consume(pos + 1);
                    self.flush(&record);
                    record.clear();
                }
                None => {
                    let len = available.len();
                    append_capped(&mut record, available);
                    reader.consume(len);
                }
            }
        }

        Ok(self.stats)
    }

    fn flush(&mut self, record: &[u8]) {
        if record.iter().all(u8::is_ascii_whitespace) {
            return;
        }
        let line = String::from_utf8_lossy(record);
        self.process_line(&line);
    }
}

fn append_capped(record: &mut Vec<u8>, bytes: &[u8]) {
    let room = MAX_LINE_LEN.saturating_sub(record.len());
    record.extend_from_slice(&bytes[..bytes.len().min(room)]);
}
