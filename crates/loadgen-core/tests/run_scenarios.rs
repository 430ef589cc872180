use loadgen_core::{
    render_console, LoadTest, RampPlanner, RampScheduler, RequestSpec, ResponseSpec, RunConfig,
    RunError, Runner, TestRegistry, WorkerContext, WorkerPool, WorkerTimings,
};
use loadgen_core::HttpClient;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}

fn config(users: u64, spawn_rate: u64, host: &str) -> RunConfig {
    let mut config = RunConfig::new(users, spawn_rate, 1, host);
    config.workers = 1;
    config.request_timeout_ms = 2_000;
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_healthy_server_run() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/")
        .with_status(200)
        .with_body("ok")
        .create_async()
        .await;

    let runner = Runner::new(config(10, 10, &server.url()), TestRegistry::with_builtins());
    let result = runner.run("IndexTest").await.unwrap();

    assert_eq!(result.test, "IndexTest");
    assert_eq!(result.rps_series.len(), 1);
    assert!(result.rps_series[0] >= 10, "rps: {:?}", result.rps_series);
    // a second worker tick may land on the same instant as the final sample
    assert!((10..=20).contains(&result.dispatched), "dispatched: {}", result.dispatched);
    assert_eq!(result.statistics.len() as u64, result.dispatched);
    assert!(result
        .statistics
        .iter()
        .all(|s| s.success && s.status_code == 200 && s.request_method == "GET"));

    let summary = result.summary();
    assert_eq!(summary.failed, 0);
    assert!(summary.latency.is_some());
    assert!(summary.average_rps >= 10.0);
    assert!(result.finished_at >= result.started_at);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connection_refused_run() {
    let runner = Runner::new(config(5, 5, &closed_port_url()), TestRegistry::with_builtins());
    let result = runner.run("IndexTest").await.unwrap();

    assert!(result.statistics.is_empty());
    assert!(result.dispatched > 0);
    assert_eq!(result.rps_series.len(), 1);

    let summary = result.summary();
    assert_eq!(summary.requests, 0);
    assert!(summary.latency.is_none());

    let console = render_console(&result);
    assert!(console.contains("Requests: 0"));
    assert!(console.contains("95th Response time: n/a"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_errors_are_failed_statistics() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", mockito::Matcher::Any)
        .with_status(500)
        .create_async()
        .await;

    let runner = Runner::new(config(4, 4, &server.url()), TestRegistry::with_builtins());
    let result = runner.run("DynamicPerformanceTest").await.unwrap();

    assert!(!result.statistics.is_empty());
    assert!(result
        .statistics
        .iter()
        .all(|s| !s.success && s.status_code == 500 && s.request_uri == "/?dynamic=true"));
    assert_eq!(result.summary().successful, 0);
}

struct TeapotTest;

impl LoadTest for TeapotTest {
    fn name(&self) -> &str {
        "TeapotTest"
    }

    fn build_request(&self) -> RequestSpec {
        RequestSpec::new(reqwest::Method::DELETE, "/brew")
    }

    fn is_successful(&self, response: &ResponseSpec<'_>) -> bool {
        response.status == 418
    }

    fn wait_for_body(&self) -> Option<bool> {
        Some(false)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_registered_test_classifies_responses() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("DELETE", "/brew")
        .with_status(418)
        .create_async()
        .await;

    let mut registry = TestRegistry::new();
    registry.register("TeapotTest", || Arc::new(TeapotTest) as Arc<dyn LoadTest>);

    let runner = Runner::new(config(3, 3, &server.url()), registry);
    let result = runner.run("TeapotTest").await.unwrap();

    assert!(!result.statistics.is_empty());
    assert!(result
        .statistics
        .iter()
        .all(|s| s.success && s.request_method == "DELETE" && s.request_uri == "/brew"));
}

#[tokio::test]
async fn test_missing_test_generates_no_traffic() {
    let mut server = mockito::Server::new_async().await;
    let mock = server.mock("GET", mockito::Matcher::Any).expect(0).create_async().await;

    let runner = Runner::new(config(10, 10, &server.url()), TestRegistry::with_builtins());
    let err = runner.run("Nope").await.unwrap_err();

    assert!(matches!(err, RunError::TestNotFound { .. }));
    assert!(err.to_string().contains("Test Nope could not be found"));
    mock.assert_async().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ramp_holds_at_full_user_count() {
    let context = WorkerContext {
        client: HttpClient::new(&closed_port_url(), None, Duration::from_secs(1)).unwrap(),
        test: Arc::new(loadgen_core::IndexTest),
        wait_for_body: true,
    };
    let timings = WorkerTimings {
        tick_period: Duration::from_millis(100),
        settle_timeout: Duration::from_millis(50),
        drain_timeout: Duration::from_secs(1),
    };
    let pool = WorkerPool::new(2, context, CancellationToken::new(), timings);

    let scheduler = RampScheduler::new(RampPlanner::new(100, 20), Duration::from_millis(700))
        .with_tick(Duration::from_millis(100));
    let rps = scheduler.run(&pool, &CancellationToken::new()).await;

    assert_eq!(rps.len(), 7);
    assert!(pool.is_launched());
    assert!(pool.workers().iter().all(|w| w.target_rate() == 50));

    assert!(pool.stop().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_early_shutdown_still_returns_results() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server.mock("GET", "/").with_status(200).create_async().await;

    let mut config = config(5, 5, &server.url());
    config.duration_secs = 30;
    let runner = Runner::new(config, TestRegistry::with_builtins());
    let shutdown = runner.shutdown_token();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        shutdown.cancel();
    });

    let result = tokio::time::timeout(Duration::from_secs(10), runner.run("IndexTest"))
        .await
        .expect("run should end after shutdown")
        .unwrap();

    assert_eq!(result.rps_series.len(), 1);
    assert!(!result.statistics.is_empty());
}
