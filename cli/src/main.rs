use clap::{Parser, ValueEnum};
use log::{debug, error};
use std::process;
use std::sync::Arc;

use person_refresh_core::{
    run_batch, BackoffKind, ConsoleSink, ExchangeStats, Level, MediaServerClient, RefreshConfig,
    SinkRef, WorkList, format_throughput,
};

#[derive(Parser, Debug)]
#[command(
    name = "person-refresh",
    version,
    about = "Refresh person images and metadata on an Emby or Jellyfin server",
    after_help = "\x1b[1;36mEXAMPLES:\x1b[0m
  Refresh persons without images:   person-refresh -u http://media:8096 -k API_KEY
  Refresh every person:             person-refresh -u http://media:8096 -k API_KEY --force
  Gentler run:                      person-refresh -u http://media:8096 -k API_KEY -w 2 -r 5 --backoff exponential"
)]
pub struct Args {
    #[arg(short = 'u', long, help = "Media server URL")]
    pub url: String,

    #[arg(short = 'k', long = "api-key", help = "Media server API key")]
    pub api_key: String,

    #[arg(short = 'f', long, default_value_t = false, help = "Process all persons, even those with images")]
    pub force: bool,

    #[arg(short = 'r', long, default_value_t = 3, help = "Maximum number of retries for failed requests")]
    pub retries: u32,

    #[arg(short = 'w', long, default_value_t = 10, help = "Maximum number of parallel workers")]
    pub workers: usize,

    #[arg(long = "retry-delay", default_value_t = 500, help = "Delay between retries in milliseconds")]
    pub retry_delay: u64,

    #[arg(long, value_enum, default_value_t = BackoffArg::Fixed, help = "Backoff strategy between retries")]
    pub backoff: BackoffArg,

    #[arg(long = "failure-threshold", default_value_t = 10, help = "Consecutive failed persons before the run stops")]
    pub failure_threshold: u32,

    #[arg(short = 'v', long, default_value_t = false, help = "Enable debug logging")]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackoffArg {
    Fixed,
    Exponential,
}

impl From<BackoffArg> for BackoffKind {
    fn from(arg: BackoffArg) -> Self {
        match arg {
            BackoffArg::Fixed => BackoffKind::Fixed,
            BackoffArg::Exponential => BackoffKind::Exponential,
        }
    }
}

impl Args {
    fn to_config(&self) -> RefreshConfig {
        RefreshConfig {
            server_url: self.url.clone(),
            api_key: self.api_key.clone(),
            force: self.force,
            max_retries: self.retries,
            workers: self.workers,
            retry_delay_ms: self.retry_delay,
            backoff: self.backoff.into(),
            failure_threshold: self.failure_threshold,
            ..RefreshConfig::default()
        }
    }
}

#[tokio::main]
async fn main() {
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let args = Args::parse();
    init_logging(args.verbose);

    let config = args.to_config();
    let sink = ConsoleSink::new_ref();
    print_config(&config, &sink);

    let code = run_refresh_sequence(&config, &sink).await;
    process::exit(code);
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();
}

/// Orchestrates one run and returns the process exit code.
///
/// Phases:
///   1. User discovery, the refresh calls run as the first user.
///   2. Connectivity probe.
///   3. Person fetch and filtering.
///   4. Concurrent refresh of every pending person.
async fn run_refresh_sequence(config: &RefreshConfig, sink: &SinkRef) -> i32 {
    if let Err(e) = config.validate() {
        sink.on_log(Level::Error, &e.to_string());
        return 1;
    }

    let client = match MediaServerClient::new(&config.server_url, &config.api_key, config.request_timeout()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            sink.on_log(Level::Error, &e.to_string());
            return 1;
        }
    };

    // ── Phase 1: User discovery ───────────────────────────────────────
    let user_id = match client.first_user_id().await {
        Ok(id) => id,
        Err(e) => {
            error!("user discovery failed: {}", e);
            sink.on_log(Level::Error, &e.to_string());
            return 1;
        }
    };
    debug!("refreshing as user {}", user_id);

    // ── Phase 2: Connectivity ─────────────────────────────────────────
    match client.probe().await {
        Ok(stats) => sink.on_log(
            Level::Success,
            &format!("Server is reachable ({})", describe_exchange(&stats)),
        ),
        Err(e) => {
            sink.on_log(Level::Error, &e.to_string());
            return 1;
        }
    }

    // ── Phase 3: Persons ──────────────────────────────────────────────
    let persons = match client.fetch_persons().await {
        Ok((persons, stats)) => {
            sink.on_log(
                Level::Success,
                &format!("Retrieved person data ({})", describe_exchange(&stats)),
            );
            persons
        }
        Err(e) => {
            sink.on_log(Level::Error, &e.to_string());
            return 0;
        }
    };

    sink.on_log(Level::Info, &format!("Total persons: {}", persons.items.len()));

    let work_list = WorkList::from_persons(&persons.items, config.force);
    if work_list.is_empty() {
        sink.on_log(Level::Warn, "No persons to process.");
        return 0;
    }
    if !config.force {
        sink.on_log(Level::Info, &format!("Persons without images: {}", work_list.len()));
    }

    // ── Phase 4: Refresh ──────────────────────────────────────────────
    let fetcher = Arc::new(client.refresher(user_id));
    let report = run_batch(work_list.into_items(), config, fetcher, Arc::clone(sink)).await;

    if report.aborted() {
        sink.on_log(
            Level::Error,
            &format!("Run aborted, {} person(s) were not processed.", report.dispatch.not_started),
        );
        return 1;
    }
    0
}

fn describe_exchange(stats: &ExchangeStats) -> String {
    use colored::*;
    format!(
        "Response time: {}, Speed: {}",
        format!("{:.2}ms", stats.elapsed_ms()).blue(),
        format_throughput(&stats.throughput())
    )
}

/// Echoes the run configuration.
fn print_config(config: &RefreshConfig, sink: &SinkRef) {
    sink.on_log(Level::Info, "Person Refresh");
    sink.on_log(Level::Info, &format!("Server URL: {}", config.server_url));
    sink.on_log(Level::Info, &format!("API Key: {}", config.masked_api_key()));
    sink.on_log(Level::Info, &format!("Force: {}", config.force));
    sink.on_log(Level::Info, &format!("Retries: {}", config.max_retries));
    sink.on_log(Level::Info, &format!("Workers: {}", config.workers));
}
