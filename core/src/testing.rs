//! Test doubles shared by the engine's unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::core::progress::{AttemptReport, RunSummary};
use crate::core::requester::{ItemFetcher, RefreshResponse};
use crate::core::WorkItem;
use crate::error::FetchError;
use crate::{Level, RefreshEventSink};

type Script = dyn Fn(&WorkItem, u32) -> Result<RefreshResponse, FetchError> + Send + Sync;

#[derive(Default)]
pub struct CallLog {
    per_item: Mutex<HashMap<String, u32>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl CallLog {
    pub fn total(&self) -> usize {
        self.per_item.lock().unwrap().values().map(|n| *n as usize).sum()
    }

    pub fn for_item(&self, id: &str) -> u32 {
        self.per_item.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(SeqCst)
    }
}

/// Fetcher whose response is computed from the item and its 0-based attempt.
pub struct ScriptedFetcher {
    script: Box<Script>,
    delay: Duration,
    calls: Arc<CallLog>,
}

impl ScriptedFetcher {
    pub fn from_fn<F>(script: F) -> Self
    where
        F: Fn(&WorkItem, u32) -> Result<RefreshResponse, FetchError> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            delay: Duration::ZERO,
            calls: Arc::new(CallLog::default()),
        }
    }

    pub fn always_status(status: u16) -> Self {
        Self::from_fn(move |_, _| Ok(RefreshResponse { status, bytes: 128 }))
    }

    /// Fails with 500 until the `k`-th attempt (1-based), which returns 200.
    pub fn succeed_on_attempt(k: u32) -> Self {
        Self::from_fn(move |_, attempt| {
            let status = if attempt + 1 >= k { 200 } else { 500 };
            Ok(RefreshResponse { status, bytes: 128 })
        })
    }

    pub fn always_transport_error(reason: &'static str) -> Self {
        Self::from_fn(move |_, _| Err(FetchError::Transport(reason.to_string())))
    }

    pub fn always_unexpected(reason: &'static str) -> Self {
        Self::from_fn(move |_, _| Err(FetchError::Unexpected(anyhow::anyhow!(reason))))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls_handle(&self) -> Arc<CallLog> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl ItemFetcher for ScriptedFetcher {
    async fn refresh(&self, item: &WorkItem) -> Result<RefreshResponse, FetchError> {
        let attempt = {
            let mut per_item = self.calls.per_item.lock().unwrap();
            let count = per_item.entry(item.id.clone()).or_insert(0);
            *count += 1;
            *count - 1
        };

        let now = self.calls.in_flight.fetch_add(1, SeqCst) + 1;
        self.calls.max_in_flight.fetch_max(now, SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.calls.in_flight.fetch_sub(1, SeqCst);

        (self.script)(item, attempt)
    }
}

#[derive(Default)]
pub struct RecordingSink {
    logs: Mutex<Vec<(Level, String)>>,
    statuses: Mutex<Vec<AttemptReport>>,
    summary: Mutex<Option<RunSummary>>,
}

impl RecordingSink {
    pub fn logs(&self) -> Vec<(Level, String)> {
        self.logs.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<AttemptReport> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn summary(&self) -> Option<RunSummary> {
        self.summary.lock().unwrap().clone()
    }
}

impl RefreshEventSink for RecordingSink {
    fn on_log(&self, level: Level, message: &str) {
        self.logs.lock().unwrap().push((level, message.to_string()));
    }

    fn on_status(&self, report: &AttemptReport) {
        self.statuses.lock().unwrap().push(report.clone());
    }

    fn on_summary(&self, summary: &RunSummary) {
        *self.summary.lock().unwrap() = Some(summary.clone());
    }
}
