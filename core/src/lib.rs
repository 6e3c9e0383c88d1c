pub mod core;
pub mod error;
pub mod http;

#[cfg(test)]
mod testing;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use colored::*;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::{Deserialize, Serialize};

pub use crate::core::breaker::CircuitBreaker;
pub use crate::core::dispatcher::{ConcurrentDispatcher, DispatchOutcome, DispatchReport};
pub use crate::core::progress::{AttemptReport, ProgressHandle, ProgressReporter, RunSummary};
pub use crate::core::requester::{ItemFetcher, PerItemRequester, RefreshResponse};
pub use crate::core::retry::{Backoff, BackoffKind, RetryPolicy};
pub use crate::core::speed::{classify, Throughput, ThroughputClass};
pub use crate::core::work_list::WorkList;
pub use crate::core::{AttemptOutcome, ItemOutcome, WorkItem};
pub use crate::error::{FetchError, RefreshError};
pub use crate::http::{ExchangeStats, MediaServerClient, PersonRefresher};

/// Exponential backoff never waits longer than this between attempts.
const EXPONENTIAL_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Run configuration shared by the CLI and the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RefreshConfig {
    pub server_url: String,
    pub api_key: String,
    pub force: bool,
    pub max_retries: u32,
    pub workers: usize,
    pub request_timeout_secs: u64,
    pub retry_delay_ms: u64,
    pub backoff: BackoffKind,
    pub failure_threshold: u32,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            api_key: String::new(),
            force: false,
            max_retries: crate::core::retry::DEFAULT_MAX_RETRIES,
            workers: crate::core::dispatcher::DEFAULT_WORKERS,
            request_timeout_secs: 5,
            retry_delay_ms: 500,
            backoff: BackoffKind::Fixed,
            failure_threshold: crate::core::breaker::DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

impl RefreshConfig {
    pub fn validate(&self) -> Result<(), RefreshError> {
        if self.workers == 0 {
            return Err(RefreshError::InvalidConfig("workers must be at least 1".into()));
        }
        if self.failure_threshold == 0 {
            return Err(RefreshError::InvalidConfig("failure threshold must be at least 1".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(RefreshError::InvalidConfig("request timeout must be at least 1s".into()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let base = Duration::from_millis(self.retry_delay_ms);
        let backoff = match self.backoff {
            BackoffKind::Fixed => Backoff::Fixed(base),
            BackoffKind::Exponential => Backoff::Exponential {
                base,
                cap: EXPONENTIAL_BACKOFF_CAP.max(base),
            },
        };
        RetryPolicy::new(self.max_retries, backoff)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// API key with everything but its last four characters hidden.
    pub fn masked_api_key(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        let visible = chars.len().min(4);
        let hidden = chars.len() - visible;
        let tail: String = chars[hidden..].iter().collect();
        format!("{}{}", "*".repeat(hidden.max(4)), tail)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Warn,
    Error,
}

/// Output abstraction for the refresh pipeline.
/// The CLI renders to the terminal, tests record events.
pub trait RefreshEventSink: Send + Sync {
    fn on_log(&self, level: Level, message: &str);
    fn on_status(&self, report: &AttemptReport);
    fn on_summary(&self, summary: &RunSummary);
}

pub type SinkRef = Arc<dyn RefreshEventSink>;

/// Terminal output sink: one overwritten status line plus colored notices.
pub struct ConsoleSink {
    bar: ProgressBar,
}

impl ConsoleSink {
    pub fn new_ref() -> SinkRef {
        Arc::new(Self::new())
    }

    /// Status line and notices share stdout.
    pub fn new() -> Self {
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stdout());
        bar.set_style(
            ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        Self { bar }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshEventSink for ConsoleSink {
    fn on_log(&self, level: Level, message: &str) {
        let line = format!("{} {}", level_symbol(level), message);
        self.bar.suspend(|| {
            println!("{}", line);
            std::io::stdout().flush().ok();
        });
    }

    fn on_status(&self, report: &AttemptReport) {
        let line = format_status(report);
        if self.bar.is_hidden() {
            println!("{}", line);
        } else {
            self.bar.set_message(line);
        }
    }

    fn on_summary(&self, summary: &RunSummary) {
        self.bar.finish_and_clear();
        self.on_log(
            Level::Info,
            &format!(
                "Done: {} refreshed, {} failed, {} errors ({} requests, {} retries)",
                summary.succeeded.to_string().green(),
                summary.gave_up.to_string().red(),
                summary.task_errors,
                summary.attempts,
                summary.retries,
            ),
        );
    }
}

fn level_symbol(level: Level) -> ColoredString {
    match level {
        Level::Info => "ℹ".blue(),
        Level::Success => "✓".green(),
        Level::Warn => "⚠".yellow(),
        Level::Error => "✗".red(),
    }
}

/// Colors a throughput by class: green above 10 Mbps, yellow above 5, red otherwise.
pub fn format_throughput(throughput: &Throughput) -> ColoredString {
    let text = throughput.to_string();
    match throughput.class {
        ThroughputClass::High => text.green(),
        ThroughputClass::Medium => text.yellow(),
        ThroughputClass::Low | ThroughputClass::Undefined => text.red(),
    }
}

pub fn format_status(report: &AttemptReport) -> String {
    let mark = if report.success { "✓".green() } else { "✗".red() };
    let retry_info = if report.retry_count > 0 {
        format!(" (Retry {}/{})", report.retry_count, report.max_retries)
    } else {
        String::new()
    };
    format!(
        "{} Processing {}/{} - ID: {} - Response time: {:.2}ms, Speed: {}{} - (Name: {})",
        mark,
        report.index,
        report.total,
        report.item_id.blue(),
        report.elapsed_ms,
        format_throughput(&report.throughput),
        retry_info,
        report.item_name,
    )
}

/// Outcome of a whole batch: what the dispatcher did and what the reporter saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub dispatch: DispatchReport,
    pub summary: RunSummary,
}

impl BatchReport {
    pub fn aborted(&self) -> bool {
        self.dispatch.outcome == DispatchOutcome::Aborted
    }
}

/// Refreshes every item of `items` through `fetcher` with the configured
/// pool size, retry policy and failure threshold.
pub async fn run_batch(
    items: Vec<WorkItem>,
    config: &RefreshConfig,
    fetcher: Arc<dyn ItemFetcher>,
    sink: SinkRef,
) -> BatchReport {
    let breaker = Arc::new(CircuitBreaker::new(config.failure_threshold));
    let (progress, receiver) = ProgressHandle::channel();
    let requester = Arc::new(PerItemRequester::new(
        fetcher,
        config.retry_policy(),
        Arc::clone(&breaker),
        progress.clone(),
    ));
    let dispatcher = ConcurrentDispatcher::new(requester, breaker, progress, config.workers);

    let (dispatch, summary) = tokio::join!(
        dispatcher.run(items),
        ProgressReporter::run(receiver, Arc::clone(&sink))
    );

    sink.on_summary(&summary);
    BatchReport { dispatch, summary }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSink, ScriptedFetcher};

    #[test]
    fn test_default_config() {
        let config = RefreshConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.workers, 10);
        assert_eq!(config.failure_threshold, 10);
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(
            config.retry_policy(),
            RetryPolicy::new(3, Backoff::Fixed(Duration::from_millis(500)))
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_deserializes_with_defaults() {
        let config: RefreshConfig = serde_json::from_str(
            r#"{"serverUrl": "http://media:8096", "workers": 4, "backoff": "exponential"}"#,
        )
        .unwrap();
        assert_eq!(config.server_url, "http://media:8096");
        assert_eq!(config.workers, 4);
        assert_eq!(config.max_retries, 3);
        assert!(matches!(config.retry_policy().backoff, Backoff::Exponential { .. }));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = RefreshConfig { workers: 0, ..RefreshConfig::default() };
        assert!(matches!(config.validate(), Err(RefreshError::InvalidConfig(_))));
    }

    #[test]
    fn test_masked_api_key() {
        let mut config = RefreshConfig { api_key: "0123456789abcdef".into(), ..RefreshConfig::default() };
        assert_eq!(config.masked_api_key(), "************cdef");
        config.api_key = "abc".into();
        assert_eq!(config.masked_api_key(), "****abc");
    }

    #[test]
    fn test_status_line_contents() {
        let report = AttemptReport {
            index: 3,
            total: 40,
            item_id: "9f2c".into(),
            item_name: "Grace Hopper".into(),
            elapsed_ms: 123.456,
            throughput: classify(0, 0.0),
            retry_count: 2,
            max_retries: 3,
            success: false,
        };
        let line = format_status(&report);
        assert!(line.contains("Processing 3/40"));
        assert!(line.contains("9f2c"));
        assert!(line.contains("Response time: 123.46ms"));
        assert!(line.contains("N/A"));
        assert!(line.contains(" (Retry 2/3)"));
        assert!(line.ends_with("(Name: Grace Hopper)"));
    }

    #[tokio::test]
    async fn test_run_batch_reports_summary_to_sink() {
        let sink = Arc::new(RecordingSink::default());
        let config = RefreshConfig {
            workers: 3,
            retry_delay_ms: 0,
            ..RefreshConfig::default()
        };
        let items: Vec<WorkItem> = (0..6).map(|i| WorkItem::new(format!("{}", i), "x")).collect();

        let report = run_batch(
            items,
            &config,
            Arc::new(ScriptedFetcher::succeed_on_attempt(2)),
            sink.clone(),
        )
        .await;

        assert!(!report.aborted());
        assert_eq!(report.dispatch.succeeded, 6);
        assert_eq!(report.summary.retries, 6);
        assert_eq!(sink.summary(), Some(report.summary.clone()));
    }
}
