/// Run-wide consecutive failure breaker.
///
/// Every worker shares one counter. An item that exhausts its retries bumps
/// it; any successful attempt resets it to zero. When the counter reaches the
/// threshold the breaker trips once and cancels the run token, which the
/// dispatcher and every in-flight requester observe.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering::SeqCst};

use log::error;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 10;

pub struct CircuitBreaker {
    threshold: u32,
    consecutive_failures: AtomicU32,
    tripped: AtomicBool,
    cancel: CancellationToken,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_failures: AtomicU32::new(0),
            tripped: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Records an item that gave up. Returns true only for the call that trips the breaker.
    pub fn record_terminal_failure(&self) -> bool {
        let failures = self.consecutive_failures.fetch_add(1, SeqCst) + 1;

        if failures >= self.threshold && !self.tripped.swap(true, SeqCst) {
            error!(
                "circuit breaker tripped after {} consecutive failed items",
                failures
            );
            self.cancel.cancel();
            return true;
        }
        false
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, SeqCst);
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(SeqCst)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(SeqCst)
    }

    /// Resolves once the breaker has tripped.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}
