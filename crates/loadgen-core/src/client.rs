use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use crate::config::RunConfig;
use crate::definition::{LoadTest, ResponseSpec};
use crate::statistic::Statistic;

/// Whole milliseconds, saturating at `u64::MAX`.
fn duration_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Pooled HTTP client shared by every worker of a run.
///
/// Cloning is cheap: the underlying connection pool and the optional
/// connection limit are shared.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: Arc<str>,
    connection_permits: Option<Arc<Semaphore>>,
}

impl HttpClient {
    pub fn new(
        host: &str,
        max_connections: Option<usize>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder().timeout(timeout);
        if let Some(max) = max_connections {
            builder = builder.pool_max_idle_per_host(max);
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            base_url: Arc::from(host.trim_end_matches('/')),
            connection_permits: max_connections.map(|max| Arc::new(Semaphore::new(max))),
        })
    }

    pub fn from_config(config: &RunConfig) -> Result<Self, reqwest::Error> {
        Self::new(
            &config.host,
            config.max_connections,
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    /// Absolute URLs pass through untouched, anything else is joined onto the host.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Connection slots currently free, `None` when unbounded.
    pub fn available_connections(&self) -> Option<usize> {
        self.connection_permits
            .as_ref()
            .map(|permits| permits.available_permits())
    }

    /// Run one attempt of `test` and time it.
    ///
    /// The clock starts before waiting for a connection slot and stops at the
    /// response headers, or at the end of the body when `wait_for_body` is set.
    /// Without `wait_for_body` the body is still read after the clock stops so
    /// the connection can go back to the pool.
    pub async fn execute(&self, test: &dyn LoadTest, wait_for_body: bool) -> Result<Statistic> {
        let request = test.build_request();
        let start = Instant::now();

        let _permit = match &self.connection_permits {
            Some(permits) => Some(permits.clone().acquire_owned().await?),
            None => None,
        };

        let mut builder = self
            .client
            .request(request.method.clone(), self.url_for(&request.path));
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let success = test.is_successful(&ResponseSpec {
            status,
            headers: response.headers(),
        });

        let elapsed = if wait_for_body {
            response.bytes().await?;
            start.elapsed()
        } else {
            let elapsed = start.elapsed();
            let _ = response.bytes().await;
            elapsed
        };

        Ok(Statistic {
            request_method: request.method.as_str().to_string(),
            request_uri: request.path,
            status_code: status,
            success,
            time_taken_ms: duration_ms(elapsed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{IndexTest, RequestSpec};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::task::JoinSet;

    struct PostTest;

    impl LoadTest for PostTest {
        fn name(&self) -> &str {
            "PostTest"
        }

        fn build_request(&self) -> RequestSpec {
            let mut request = RequestSpec::new(reqwest::Method::POST, "/submit");
            request
                .headers
                .push(("x-run".to_string(), "loadgen".to_string()));
            request.body = Some("payload".to_string());
            request
        }
    }

    fn closed_port_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{}", port)
    }

    /// Accepts connections and holds them open without ever answering.
    /// Returns the URL and the number of connections currently open.
    async fn silent_server() -> (String, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let open = Arc::new(AtomicUsize::new(0));

        let counter = open.clone();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(socket);
            }
        });
        (url, open)
    }

    #[test]
    fn test_duration_ms_saturates() {
        assert_eq!(duration_ms(Duration::from_micros(1_999)), 1);
        assert_eq!(duration_ms(Duration::from_secs(3)), 3_000);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_url_for_joins_paths() {
        let client = HttpClient::new("http://localhost:8080/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(client.url_for("/a?b=c"), "http://localhost:8080/a?b=c");
        assert_eq!(client.url_for("a"), "http://localhost:8080/a");
        assert_eq!(client.url_for("https://other/x"), "https://other/x");
    }

    #[test]
    fn test_connection_limit() {
        let unbounded = HttpClient::new("http://localhost", None, Duration::from_secs(1)).unwrap();
        assert_eq!(unbounded.available_connections(), None);

        let bounded = HttpClient::new("http://localhost", Some(8), Duration::from_secs(1)).unwrap();
        assert_eq!(bounded.available_connections(), Some(8));
    }

    #[tokio::test]
    async fn test_execute_records_statistic() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/")
            .with_status(200)
            .with_body("hello")
            .create_async()
            .await;

        let client = HttpClient::new(&server.url(), Some(4), Duration::from_secs(5)).unwrap();
        let stat = client.execute(&IndexTest, true).await.unwrap();

        assert_eq!(stat.request_method, "GET");
        assert_eq!(stat.request_uri, "/");
        assert_eq!(stat.status_code, 200);
        assert!(stat.success);
        assert_eq!(client.available_connections(), Some(4));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_execute_sends_headers_and_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/submit")
            .match_header("x-run", "loadgen")
            .match_body("payload")
            .with_status(503)
            .create_async()
            .await;

        let client = HttpClient::new(&server.url(), None, Duration::from_secs(5)).unwrap();
        let stat = client.execute(&PostTest, false).await.unwrap();

        assert_eq!(stat.status_code, 503);
        assert!(!stat.success);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_execute_connection_refused_is_an_error() {
        let client = HttpClient::new(&closed_port_url(), Some(1), Duration::from_secs(2)).unwrap();
        assert!(client.execute(&IndexTest, true).await.is_err());
        // the permit is released even when the attempt fails
        assert_eq!(client.available_connections(), Some(1));
    }

    #[tokio::test]
    async fn test_connection_limit_caps_concurrent_requests() {
        let (url, open) = silent_server().await;
        let client = HttpClient::new(&url, Some(2), Duration::from_secs(10)).unwrap();

        let mut attempts = JoinSet::new();
        for _ in 0..5 {
            let client = client.clone();
            attempts.spawn(async move { client.execute(&IndexTest, true).await });
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(client.available_connections(), Some(0));
        assert_eq!(open.load(Ordering::SeqCst), 2);

        // the remaining attempts are still queued on the limit
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(open.load(Ordering::SeqCst), 2);
        assert_eq!(attempts.len(), 5);

        attempts.abort_all();
        while attempts.join_next().await.is_some() {}
        assert_eq!(client.available_connections(), Some(2));
    }
}
