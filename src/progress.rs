//! Batch-run progress reporting.
//!
//! Long `mtrace process` runs report per-item progress so the operator can
//! see how far the run has advanced and where it would resume. Progress is
//! emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for a batch run.
#[derive(Clone, Debug)]
pub enum RunProgressEvent {
    /// The run resumed from a checkpoint at `index` (0-based).
    Resuming { run: String, index: u64, total: u64 },
    /// `n` of `total` items handled; `current` is the item in flight.
    Processing {
        run: String,
        n: u64,
        total: u64,
        current: String,
    },
}

/// Reports run progress. Implementations write to stderr (human or JSON).
pub trait RunProgressReporter: Send + Sync {
    fn report(&self, event: RunProgressEvent);
}

/// Human-friendly progress: "process photos2025  312 / 4,980  .../a.jpg".
pub struct StderrProgress;

impl RunProgressReporter for StderrProgress {
    fn report(&self, event: RunProgressEvent) {
        let line = match &event {
            RunProgressEvent::Resuming { run, index, total } => {
                format!(
                    "process {}  resuming at {} / {}\n",
                    run,
                    format_number(*index),
                    format_number(*total)
                )
            }
            RunProgressEvent::Processing {
                run,
                n,
                total,
                current,
            } => {
                format!(
                    "process {}  {} / {}  {}\n",
                    run,
                    format_number(*n),
                    format_number(*total),
                    current
                )
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl RunProgressReporter for JsonProgress {
    fn report(&self, event: RunProgressEvent) {
        let obj = match &event {
            RunProgressEvent::Resuming { run, index, total } => serde_json::json!({
                "event": "progress",
                "run": run,
                "phase": "resuming",
                "index": index,
                "total": total
            }),
            RunProgressEvent::Processing {
                run,
                n,
                total,
                current,
            } => serde_json::json!({
                "event": "progress",
                "run": run,
                "phase": "processing",
                "n": n,
                "total": total,
                "current": current
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl RunProgressReporter for NoProgress {
    fn report(&self, _event: RunProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn RunProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
