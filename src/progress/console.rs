//! Terminal rendering of progress events.
//!
//! Each `Start` opens a bar (or a spinner when the phase reports no
//! percentage), `Progress` moves it, `End` finishes it with a check mark.

use super::{ProgressEvent, ProgressKind, ProgressSink};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

pub struct ConsoleProgress {
    current: Mutex<Option<Phase>>,
    quiet: bool,
}

struct Phase {
    bar: ProgressBar,
    title: String,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
            quiet: false,
        }
    }

    /// Suppress bars and spinners, printing only phase titles and messages.
    pub fn quiet() -> Self {
        Self {
            current: Mutex::new(None),
            quiet: true,
        }
    }

    fn open(&self, title: &str, percent: Option<u8>) -> ProgressBar {
        if self.quiet {
            return ProgressBar::with_draw_target(Some(100), ProgressDrawTarget::hidden());
        }
        match percent {
            Some(pct) => {
                let bar = ProgressBar::new(100);
                bar.set_style(
                    ProgressStyle::with_template(
                        "{prefix:.bold} [{bar:30.cyan/blue}] {pos:>3}% {msg}",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=> "),
                );
                bar.set_prefix(title.to_string());
                bar.set_position(u64::from(pct));
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    ProgressStyle::with_template("{spinner:.green} {prefix:.bold} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                bar.set_prefix(title.to_string());
                bar.enable_steady_tick(Duration::from_millis(120));
                bar
            }
        }
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ConsoleProgress {
    fn update(&self, event: ProgressEvent) {
        let Ok(mut current) = self.current.lock() else {
            return;
        };

        match event.kind {
            ProgressKind::Message => {
                let text = event.message.unwrap_or_default();
                match current.as_ref() {
                    Some(phase) => phase.bar.println(text),
                    None => println!("{}", text),
                }
            }
            ProgressKind::Start => {
                // An unterminated phase is abandoned rather than left spinning
                if let Some(previous) = current.take() {
                    previous.bar.abandon();
                }
                let title = event.message.unwrap_or_default();
                if self.quiet {
                    println!("{} {}", "::".blue().bold(), title);
                }
                let bar = self.open(&title, event.percent);
                *current = Some(Phase { bar, title });
            }
            ProgressKind::Progress => {
                if let Some(phase) = current.as_ref() {
                    if let Some(pct) = event.percent {
                        phase.bar.set_position(u64::from(pct));
                    }
                    if let Some(msg) = event.message {
                        phase.bar.set_message(msg);
                    }
                }
            }
            ProgressKind::End => {
                if let Some(phase) = current.take() {
                    let detail = event.message.unwrap_or_default();
                    phase.bar.finish_and_clear();
                    if detail.is_empty() {
                        println!("{} {}", "✓".green().bold(), phase.title);
                    } else {
                        println!(
                            "{} {} {}",
                            "✓".green().bold(),
                            phase.title,
                            detail.dimmed()
                        );
                    }
                }
            }
        }
    }
}
