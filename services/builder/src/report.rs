//! Progress and status reporting.
//!
//! Every pipeline stage receives a [`Reporter`] instead of writing to a global
//! logger, so tests can assert on exactly what a stage reported.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::{debug, info, warn};

/// Pipeline stage, used to label reports and fatal errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Discovery,
    Verification,
    Transfer,
    Import,
    Launch,
    Provision,
    Record,
    Publish,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Discovery => "discovery",
            Stage::Verification => "verification",
            Stage::Transfer => "transfer",
            Stage::Import => "import",
            Stage::Launch => "launch",
            Stage::Provision => "provision",
            Stage::Record => "record",
            Stage::Publish => "publish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single status event emitted by a stage.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportEvent {
    /// A stage began.
    StageStarted { stage: Stage, detail: String },

    /// A stage finished successfully.
    StageCompleted { stage: Stage, detail: String },

    /// Bytes written during a transfer whose total size is known.
    Progress {
        label: String,
        transferred: u64,
        total: u64,
        ratio: f64,
    },

    /// A fallback chain candidate did not succeed.
    CandidateFailed {
        step: String,
        index: usize,
        command: String,
        exit_code: Option<i32>,
    },

    /// Something went wrong without stopping the pipeline.
    Warning { stage: Stage, message: String },
}

/// Sink for pipeline status events.
pub trait Reporter: Send + Sync {
    fn report(&self, event: ReportEvent);
}

/// Helpers usable through `dyn Reporter`.
impl dyn Reporter {
    pub fn stage_started(&self, stage: Stage, detail: impl Into<String>) {
        self.report(ReportEvent::StageStarted {
            stage,
            detail: detail.into(),
        });
    }

    pub fn stage_completed(&self, stage: Stage, detail: impl Into<String>) {
        self.report(ReportEvent::StageCompleted {
            stage,
            detail: detail.into(),
        });
    }

    pub fn warning(&self, stage: Stage, message: impl Into<String>) {
        self.report(ReportEvent::Warning {
            stage,
            message: message.into(),
        });
    }
}

/// Reporter that emits `tracing` events.
///
/// Progress is logged at info level once per 10% step and at debug level for
/// every chunk.
#[derive(Debug, Default)]
pub struct TracingReporter {
    last_decile: AtomicU64,
}

impl TracingReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Reporter for TracingReporter {
    fn report(&self, event: ReportEvent) {
        match event {
            ReportEvent::StageStarted { stage, detail } => {
                info!(stage = %stage, "{detail}");
            }
            ReportEvent::StageCompleted { stage, detail } => {
                info!(stage = %stage, done = true, "{detail}");
            }
            ReportEvent::Progress {
                label,
                transferred,
                total,
                ratio,
            } => {
                let decile = (ratio * 10.0).floor() as u64;
                let previous = self.last_decile.swap(decile, Ordering::Relaxed);
                if decile != previous {
                    info!(
                        artifact = %label,
                        transferred,
                        total,
                        "Download progress: {:.2}%",
                        ratio * 100.0
                    );
                } else {
                    debug!(artifact = %label, transferred, total, "Download progress");
                }
            }
            ReportEvent::CandidateFailed {
                step,
                index,
                command,
                exit_code,
            } => {
                debug!(
                    step = %step,
                    candidate = index,
                    command = %command,
                    exit_code = ?exit_code,
                    "Candidate failed, trying next"
                );
            }
            ReportEvent::Warning { stage, message } => {
                warn!(stage = %stage, "{message}");
            }
        }
    }
}

/// Reporter that keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<ReportEvent>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events reported so far, in order.
    pub fn events(&self) -> Vec<ReportEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Ratios of all progress events, in order.
    pub fn progress_ratios(&self) -> Vec<f64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ReportEvent::Progress { ratio, .. } => Some(ratio),
                _ => None,
            })
            .collect()
    }

    /// Stages that reported completion, in order.
    pub fn completed_stages(&self) -> Vec<Stage> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ReportEvent::StageCompleted { stage, .. } => Some(stage),
                _ => None,
            })
            .collect()
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, event: ReportEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_reporter_keeps_order() {
        let reporter = RecordingReporter::new();
        let dyn_reporter: &dyn Reporter = &reporter;

        dyn_reporter.stage_started(Stage::Discovery, "resolving");
        dyn_reporter.stage_completed(Stage::Discovery, "resolved");
        dyn_reporter.stage_completed(Stage::Transfer, "downloaded");

        assert_eq!(reporter.events().len(), 3);
        assert_eq!(
            reporter.completed_stages(),
            vec![Stage::Discovery, Stage::Transfer]
        );
    }

    #[test]
    fn test_tracing_reporter_accepts_progress() {
        let reporter = TracingReporter::new();
        for step in 0..=4u64 {
            reporter.report(ReportEvent::Progress {
                label: "rootfs.tar.xz".to_string(),
                transferred: step * 25,
                total: 100,
                ratio: step as f64 / 4.0,
            });
        }
        assert_eq!(reporter.last_decile.load(Ordering::Relaxed), 10);
    }
}
