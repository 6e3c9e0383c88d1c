use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::time::sleep;

use crate::core::breaker::CircuitBreaker;
use crate::core::progress::{AttemptReport, FailureReason, ProgressEvent, ProgressHandle};
use crate::core::retry::{RetryDecision, RetryPolicy};
use crate::core::speed::{classify, Throughput};
use crate::core::{AttemptOutcome, ItemOutcome, WorkItem};
use crate::error::FetchError;

const SUCCESS_STATUS: u16 = 200;

/// Raw response of one refresh call, before timing is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshResponse {
    pub status: u16,
    pub bytes: u64,
}

/// Issues the per-item refresh request. Implemented by the media server
/// client; tests substitute scripted fetchers.
#[async_trait]
pub trait ItemFetcher: Send + Sync {
    async fn refresh(&self, item: &WorkItem) -> Result<RefreshResponse, FetchError>;
}

/// Drives one work item through its attempts:
/// `Attempting -> Succeeded | RetryScheduled -> Attempting | GaveUp`.
pub struct PerItemRequester {
    fetcher: Arc<dyn ItemFetcher>,
    policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
    progress: ProgressHandle,
}

impl PerItemRequester {
    pub fn new(
        fetcher: Arc<dyn ItemFetcher>,
        policy: RetryPolicy,
        breaker: Arc<CircuitBreaker>,
        progress: ProgressHandle,
    ) -> Self {
        Self { fetcher, policy, breaker, progress }
    }

    /// Processes `item`, the `index`-th (1-based) of `total`.
    ///
    /// Handled HTTP and transport failures never surface as `Err`; an `Err`
    /// means the item could not be processed at all.
    pub async fn process(&self, item: &WorkItem, index: usize, total: usize) -> anyhow::Result<ItemOutcome> {
        let max_retries = self.policy.max_retries;
        let mut attempt: u32 = 0;

        loop {
            if self.breaker.is_cancelled() {
                return Ok(ItemOutcome::Cancelled { attempts: attempt });
            }

            let start = Instant::now();
            let result = tokio::select! {
                biased;
                _ = self.breaker.cancelled() => {
                    return Ok(ItemOutcome::Cancelled { attempts: attempt });
                }
                result = self.fetcher.refresh(item) => result,
            };
            let elapsed = start.elapsed();

            let outcome = match result {
                Ok(resp) if resp.status == SUCCESS_STATUS => AttemptOutcome::Success {
                    status: resp.status,
                    elapsed,
                    bytes: resp.bytes,
                },
                Ok(resp) => AttemptOutcome::HttpFailure {
                    status: resp.status,
                    elapsed,
                    bytes: resp.bytes,
                },
                Err(FetchError::Transport(reason)) => AttemptOutcome::TransportFailure(reason),
                Err(FetchError::Unexpected(e)) => {
                    return Err(e.context(format!("refreshing person {}", item.id)));
                }
            };

            debug!("person {} attempt {}: {}", item.id, attempt, outcome);

            let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
            // no body was transferred, so there is no rate to show
            let throughput = match &outcome {
                AttemptOutcome::Success { bytes, .. } | AttemptOutcome::HttpFailure { bytes, .. } => {
                    classify(*bytes, elapsed_ms)
                }
                AttemptOutcome::TransportFailure(_) => Throughput::undefined(),
            };

            self.progress
                .report(AttemptReport {
                    index,
                    total,
                    item_id: item.id.clone(),
                    item_name: item.name.clone(),
                    elapsed_ms,
                    throughput,
                    retry_count: attempt,
                    max_retries,
                    success: outcome.is_success(),
                })
                .await?;

            match self.policy.decide(attempt, &outcome) {
                RetryDecision::Done => {
                    self.breaker.record_success();
                    return Ok(ItemOutcome::Succeeded { attempts: attempt + 1 });
                }
                RetryDecision::Retry { delay } => {
                    attempt += 1;
                    warn!(
                        "person {} failed ({}), retry {}/{} in {:?}",
                        item.id, outcome, attempt, max_retries, delay
                    );
                    self.progress
                        .send(ProgressEvent::Retrying {
                            item_id: item.id.clone(),
                            reason: failure_reason(&outcome),
                            retry: attempt,
                            max_retries,
                        })
                        .await?;

                    tokio::select! {
                        biased;
                        _ = self.breaker.cancelled() => {
                            return Ok(ItemOutcome::Cancelled { attempts: attempt });
                        }
                        _ = sleep(delay) => {}
                    }
                }
                RetryDecision::GiveUp => {
                    self.progress
                        .send(ProgressEvent::GaveUp {
                            item_id: item.id.clone(),
                            reason: failure_reason(&outcome),
                            max_retries,
                        })
                        .await?;

                    if self.breaker.record_terminal_failure() {
                        self.progress
                            .send(ProgressEvent::BreakerTripped {
                                failures: self.breaker.consecutive_failures(),
                            })
                            .await?;
                    }
                    return Ok(ItemOutcome::GaveUp { attempts: attempt + 1 });
                }
            }
        }
    }
}

fn failure_reason(outcome: &AttemptOutcome) -> FailureReason {
    match outcome {
        AttemptOutcome::Success { status, .. } | AttemptOutcome::HttpFailure { status, .. } => {
            FailureReason::Status(*status)
        }
        AttemptOutcome::TransportFailure(reason) => FailureReason::Error(reason.clone()),
    }
}
