use std::fmt;

use tokio::sync::mpsc;

use crate::core::speed::Throughput;
use crate::{Level, SinkRef};

pub const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// One rendered attempt: the data behind the overwritten status line.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptReport {
    pub index: usize,
    pub total: usize,
    pub item_id: String,
    pub item_name: String,
    pub elapsed_ms: f64,
    pub throughput: Throughput,
    pub retry_count: u32,
    pub max_retries: u32,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Status(u16),
    Error(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Status(code) => write!(f, "status {}", code),
            FailureReason::Error(e) => write!(f, "{}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Attempt(AttemptReport),
    Retrying {
        item_id: String,
        reason: FailureReason,
        retry: u32,
        max_retries: u32,
    },
    GaveUp {
        item_id: String,
        reason: FailureReason,
        max_retries: u32,
    },
    TaskError {
        message: String,
    },
    BreakerTripped {
        failures: u32,
    },
}

/// Counters accumulated by the reporter over one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub gave_up: usize,
    pub task_errors: usize,
    pub attempts: usize,
    pub retries: usize,
    pub aborted: bool,
}

/// Sending side of the progress channel, cloned into every worker.
#[derive(Clone)]
pub struct ProgressHandle {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ProgressHandle {
    pub fn channel() -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        (Self { tx }, rx)
    }

    pub async fn send(&self, event: ProgressEvent) -> anyhow::Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| anyhow::anyhow!("progress reporter is no longer running"))
    }

    pub async fn report(&self, report: AttemptReport) -> anyhow::Result<()> {
        self.send(ProgressEvent::Attempt(report)).await
    }
}

/// Single consumer of all progress events.
///
/// Workers never touch the output directly; everything funnels through this
/// task so status lines from concurrent workers cannot interleave.
pub struct ProgressReporter;

impl ProgressReporter {
    pub async fn run(mut receiver: mpsc::Receiver<ProgressEvent>, sink: SinkRef) -> RunSummary {
        let mut summary = RunSummary::default();

        while let Some(event) = receiver.recv().await {
            Self::apply(&mut summary, &event);
            Self::render(&event, &sink);
        }

        summary
    }

    fn apply(summary: &mut RunSummary, event: &ProgressEvent) {
        match event {
            ProgressEvent::Attempt(report) => {
                summary.attempts += 1;
                if report.success {
                    summary.succeeded += 1;
                }
            }
            ProgressEvent::Retrying { .. } => summary.retries += 1,
            ProgressEvent::GaveUp { .. } => summary.gave_up += 1,
            ProgressEvent::TaskError { .. } => summary.task_errors += 1,
            ProgressEvent::BreakerTripped { .. } => summary.aborted = true,
        }
    }

    fn render(event: &ProgressEvent, sink: &SinkRef) {
        match event {
            ProgressEvent::Attempt(report) => sink.on_status(report),
            ProgressEvent::Retrying { reason, retry, max_retries, .. } => {
                let message = match reason {
                    FailureReason::Status(code) => format!(
                        "Request failed (Status: {}). Retrying ({}/{})...",
                        code, retry, max_retries
                    ),
                    FailureReason::Error(e) => format!(
                        "Request error: {}. Retrying ({}/{})...",
                        e, retry, max_retries
                    ),
                };
                sink.on_log(Level::Warn, &message);
            }
            ProgressEvent::GaveUp { item_id, reason, max_retries } => {
                sink.on_log(
                    Level::Error,
                    &format!("Failed after {} retries: {} (ID: {})", max_retries, reason, item_id),
                );
            }
            ProgressEvent::TaskError { message } => {
                sink.on_log(Level::Error, &format!("Error processing person: {}", message));
            }
            ProgressEvent::BreakerTripped { failures } => {
                sink.on_log(
                    Level::Error,
                    &format!("Too many consecutive errors ({}). Stopping.", failures),
                );
            }
        }
    }
}
