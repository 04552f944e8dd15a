// ABOUTME: Terminal feedback for the CLI commands.
// ABOUTME: Human progress lines, a quiet mode for CI logs, and line-delimited JSON.

use serde::Serialize;
use std::time::Instant;

use crate::pipeline::{PipelineRun, StageResult, StageStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Normal,
    /// Only the final line of each command.
    Quiet,
    /// One JSON document per line on stdout, errors on stderr.
    Json,
}

pub struct Output {
    mode: OutputMode,
    timer: Option<Instant>,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self { mode, timer: None }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    pub fn start_timer(&mut self) {
        self.timer = Some(Instant::now());
    }

    fn elapsed(&self) -> Option<f64> {
        self.timer.map(|started| started.elapsed().as_secs_f64())
    }

    pub fn progress(&self, message: &str) {
        if self.mode == OutputMode::Normal {
            println!("{message}");
        }
    }

    /// JSON consumers read warnings from the run record instead.
    pub fn warning(&self, message: &str) {
        if self.mode != OutputMode::Json {
            eprintln!("warning: {message}");
        }
    }

    pub fn success(&self, message: &str) {
        match (self.mode, self.elapsed()) {
            (OutputMode::Json, elapsed) => {
                emit(&Event { event: "success", message, duration_secs: elapsed }, false)
            }
            (OutputMode::Normal, Some(secs)) => println!("{message} ({secs:.1}s)"),
            _ => println!("{message}"),
        }
    }

    pub fn error(&self, message: &str) {
        if self.mode == OutputMode::Json {
            emit(&Event { event: "error", message, duration_secs: self.elapsed() }, true);
        } else {
            eprintln!("error: {message}");
        }
    }

    /// Write `value` as a JSON line. No-op outside json mode.
    pub fn document<T: Serialize>(&self, value: &T) {
        if self.mode == OutputMode::Json {
            emit(value, false);
        }
    }

    /// Per-stage lines for a finished run. The caller prints the outcome.
    pub fn report(&self, run: &PipelineRun) {
        match self.mode {
            OutputMode::Json => self.document(run),
            OutputMode::Quiet => {}
            OutputMode::Normal => {
                run.stage_results.iter().for_each(|result| println!("{}", stage_line(result)));
                for warning in &run.warnings {
                    self.warning(&warning.message);
                }
            }
        }
    }
}

fn stage_line(result: &StageResult) -> String {
    let timing = match result.retries {
        0 => format!("{} ms", result.duration_ms),
        n => format!("{} ms, {} retries", result.duration_ms, n),
    };
    match &result.status {
        StageStatus::Succeeded { detail } => {
            format!("  ✓ {:<16} {} ({})", result.stage, detail, timing)
        }
        StageStatus::Failed { kind, reason } => {
            format!("  ✗ {:<16} {}: {} ({})", result.stage, kind, reason, timing)
        }
    }
}

fn emit<T: Serialize + ?Sized>(value: &T, to_stderr: bool) {
    match serde_json::to_string(value) {
        Ok(line) if to_stderr => eprintln!("{line}"),
        Ok(line) => println!("{line}"),
        Err(e) => tracing::error!("cannot serialize output: {}", e),
    }
}

#[derive(Serialize)]
struct Event<'a> {
    event: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}
