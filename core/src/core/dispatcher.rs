use std::sync::Arc;

use log::{debug, error, info};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::core::breaker::CircuitBreaker;
use crate::core::progress::{ProgressEvent, ProgressHandle};
use crate::core::requester::PerItemRequester;
use crate::core::{ItemOutcome, WorkItem};

pub const DEFAULT_WORKERS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchOutcome {
    #[default]
    Completed,
    /// The circuit breaker tripped before the work list was drained.
    Aborted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub outcome: DispatchOutcome,
    pub submitted: usize,
    pub not_started: usize,
    pub succeeded: usize,
    pub gave_up: usize,
    pub cancelled: usize,
    pub task_errors: usize,
}

impl DispatchReport {
    fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Succeeded { .. } => self.succeeded += 1,
            ItemOutcome::GaveUp { .. } => self.gave_up += 1,
            ItemOutcome::Cancelled { .. } => self.cancelled += 1,
        }
    }
}

/// Fixed-size worker pool over a work list.
///
/// Each item becomes one task holding a semaphore permit for its whole
/// lifetime, so at most `worker_count` items are in flight. Task errors and
/// panics are reported and counted; they never stop sibling tasks. Only the
/// circuit breaker ends a run early.
pub struct ConcurrentDispatcher {
    requester: Arc<PerItemRequester>,
    breaker: Arc<CircuitBreaker>,
    progress: ProgressHandle,
    worker_count: usize,
}

impl ConcurrentDispatcher {
    pub fn new(
        requester: Arc<PerItemRequester>,
        breaker: Arc<CircuitBreaker>,
        progress: ProgressHandle,
        worker_count: usize,
    ) -> Self {
        Self {
            requester,
            breaker,
            progress,
            worker_count: worker_count.max(1),
        }
    }

    pub async fn run(self, items: Vec<WorkItem>) -> DispatchReport {
        let total = items.len();
        let semaphore = Arc::new(Semaphore::new(self.worker_count));
        let mut tasks = JoinSet::new();
        let mut report = DispatchReport::default();

        for (idx, item) in items.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = self.breaker.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let requester = Arc::clone(&self.requester);
            tasks.spawn(async move {
                let _permit = permit;
                requester.process(&item, idx + 1, total).await
            });
            report.submitted += 1;
        }

        while let Some(joined) = tasks.join_next().await {
            let message = match joined {
                Ok(Ok(outcome)) => {
                    report.record(outcome);
                    continue;
                }
                Ok(Err(e)) => format!("{:#}", e),
                Err(join_err) if join_err.is_panic() => format!("worker panicked: {}", join_err),
                Err(join_err) => format!("worker stopped: {}", join_err),
            };

            error!("task failed: {}", message);
            report.task_errors += 1;
            if let Err(e) = self.progress.send(ProgressEvent::TaskError { message }).await {
                debug!("task error not rendered: {}", e);
            }
        }

        report.not_started = total - report.submitted;
        if self.breaker.is_tripped() {
            report.outcome = DispatchOutcome::Aborted;
        }

        info!(
            "dispatch finished: {} submitted, {} not started, outcome {:?}",
            report.submitted, report.not_started, report.outcome
        );
        report
    }
}
