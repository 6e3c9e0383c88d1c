use std::sync::{Arc, Mutex};
use std::time::Duration;

use person_refresh_core::{
    run_batch, AttemptReport, DispatchOutcome, ItemFetcher, Level, MediaServerClient,
    RefreshConfig, RefreshEventSink, RunSummary, WorkItem,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct CollectingSink {
    logs: Mutex<Vec<(Level, String)>>,
    statuses: Mutex<Vec<AttemptReport>>,
}

impl RefreshEventSink for CollectingSink {
    fn on_log(&self, level: Level, message: &str) {
        self.logs.lock().unwrap().push((level, message.to_string()));
    }

    fn on_status(&self, report: &AttemptReport) {
        self.statuses.lock().unwrap().push(report.clone());
    }

    fn on_summary(&self, _summary: &RunSummary) {}
}

fn config() -> RefreshConfig {
    RefreshConfig {
        workers: 3,
        retry_delay_ms: 0,
        ..RefreshConfig::default()
    }
}

fn fetcher(server: &MockServer, timeout: Duration) -> Arc<dyn ItemFetcher> {
    let client = Arc::new(MediaServerClient::new(&server.uri(), "secret", timeout).unwrap());
    Arc::new(client.refresher("u1"))
}

async fn mount_item(server: &MockServer, person: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(format!("/Users/u1/Items/{}", person)))
        .and(query_param("api_key", "secret"))
        .respond_with(ResponseTemplate::new(status).set_body_string("{}"))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_batch_against_server() {
    let server = MockServer::start().await;
    for person in ["p1", "p2", "p4"] {
        mount_item(&server, person, 200).await;
    }
    mount_item(&server, "p3", 500).await;

    let items: Vec<WorkItem> = (1..=4).map(|i| WorkItem::new(format!("p{}", i), format!("Person {}", i))).collect();
    let sink = Arc::new(CollectingSink::default());
    let report = run_batch(items, &config(), fetcher(&server, Duration::from_secs(5)), sink.clone()).await;

    assert_eq!(report.dispatch.outcome, DispatchOutcome::Completed);
    assert_eq!(report.dispatch.succeeded, 3);
    assert_eq!(report.dispatch.gave_up, 1);
    // p3: one initial attempt plus three retries
    assert_eq!(report.summary.attempts, 3 + 4);
    assert_eq!(report.summary.retries, 3);

    let warnings = sink.logs.lock().unwrap().iter().filter(|(l, _)| *l == Level::Warn).count();
    assert_eq!(warnings, 3);

    let statuses = sink.statuses.lock().unwrap();
    let p3_retries: Vec<u32> = statuses.iter().filter(|s| s.item_id == "p3").map(|s| s.retry_count).collect();
    assert_eq!(p3_retries, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_rerun_is_repeatable() {
    let server = MockServer::start().await;
    mount_item(&server, "a", 200).await;
    mount_item(&server, "b", 404).await;

    let items = vec![WorkItem::new("a", "A"), WorkItem::new("b", "B")];
    let first = run_batch(
        items.clone(),
        &config(),
        fetcher(&server, Duration::from_secs(5)),
        Arc::new(CollectingSink::default()),
    )
    .await;
    let second = run_batch(
        items,
        &config(),
        fetcher(&server, Duration::from_secs(5)),
        Arc::new(CollectingSink::default()),
    )
    .await;

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_timeouts_count_as_transport_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Users/u1/Items/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(1500)))
        .mount(&server)
        .await;

    let config = RefreshConfig {
        max_retries: 1,
        ..config()
    };
    let sink = Arc::new(CollectingSink::default());
    let report = run_batch(
        vec![WorkItem::new("slow", "Slow Person")],
        &config,
        fetcher(&server, Duration::from_millis(200)),
        sink.clone(),
    )
    .await;

    assert_eq!(report.dispatch.gave_up, 1);
    let logs = sink.logs.lock().unwrap();
    assert!(logs[0].1.starts_with("Request error:"));
    assert!(logs[0].1.ends_with("Retrying (1/1)..."));
}
