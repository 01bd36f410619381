use super::rate_limit::RateLimiter;
use super::{Page, PageSource};
use crate::config::ScraperConfig;
use crate::error::FetchError;
use crate::events::{EngineEvent, EventSink};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;

/// Timing and retry knobs for [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Per-attempt request timeout.
    pub timeout: Duration,
    /// Minimum gap between any two requests issued by this fetcher.
    pub min_delay: Duration,
    pub jitter: Duration,
    /// Total attempts per URL, first try included.
    pub max_attempts: u32,
    /// First retry waits 2x this, then 4x, 8x...
    pub backoff: Duration,
    pub user_agent: String,
}

impl From<&ScraperConfig> for FetchPolicy {
    fn from(config: &ScraperConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            min_delay: Duration::from_millis(config.request_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
            user_agent: config.user_agent.clone(),
        }
    }
}

pub struct HttpFetcher {
    client: reqwest::Client,
    policy: FetchPolicy,
    limiter: RateLimiter,
    sink: Arc<dyn EventSink>,
}

impl HttpFetcher {
    pub fn new(policy: FetchPolicy, sink: Arc<dyn EventSink>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&policy.user_agent)
            .timeout(policy.timeout)
            .gzip(true)
            // Accept cookies so consent/session redirects resolve
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            limiter: RateLimiter::new(policy.min_delay, policy.jitter),
            policy,
            sink,
        })
    }

    /// Waits between attempts; one entry fewer than the attempt budget.
    fn backoff_schedule(&self) -> impl Iterator<Item = Duration> + Send {
        let factor = (self.policy.backoff.as_millis() as u64).max(1);
        let retries = self.policy.max_attempts.max(1) - 1;
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(Duration::from_secs(60))
            .take(retries as usize)
    }

    /// One rate-limited GET. Transport errors and non-2xx statuses are failures.
    async fn attempt(&self, url: &str, attempt: u32) -> Result<Page, String> {
        self.limiter.acquire().await;
        self.sink.emit(EngineEvent::RequestIssued {
            url: url.to_string(),
            attempt,
        });

        let result = async {
            let resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| format!("request error: {e}"))?;

            let status = resp.status();
            if !status.is_success() {
                return Err(format!("HTTP {status}"));
            }

            let body = resp
                .text()
                .await
                .map_err(|e| format!("failed to read response body: {e}"))?;

            Ok(Page {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            })
        }
        .await;

        if let Err(error) = &result {
            self.sink.emit(EngineEvent::RequestFailed {
                url: url.to_string(),
                attempt,
                error: error.clone(),
            });
        }
        result
    }
}

#[async_trait]
impl PageSource for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Page, FetchError> {
        let mut attempts = 0u32;
        let result = Retry::start(self.backoff_schedule(), || {
            attempts += 1;
            self.attempt(url, attempts)
        })
        .await;

        result.map_err(|message| {
            self.sink.emit(EngineEvent::FetchExhausted {
                url: url.to_string(),
                attempts,
                error: message.clone(),
            });
            FetchError {
                url: url.to_string(),
                attempts,
                message,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::MemorySink;
    use std::time::Instant;
    use tokio_test::{assert_err, assert_ok};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn policy(min_delay_ms: u64) -> FetchPolicy {
        FetchPolicy {
            timeout: Duration::from_millis(100),
            min_delay: Duration::from_millis(min_delay_ms),
            jitter: Duration::ZERO,
            max_attempts: 3,
            backoff: Duration::from_millis(10),
            user_agent: "snow-etl-test".to_string(),
        }
    }

    fn fetcher(min_delay_ms: u64) -> (HttpFetcher, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::default());
        let fetcher = HttpFetcher::new(policy(min_delay_ms), sink.clone()).unwrap();
        (fetcher, sink)
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/report"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Base Depth: 45 cm"))
            .expect(1)
            .mount(&server)
            .await;

        let (fetcher, _) = fetcher(10);
        let page = assert_ok!(fetcher.fetch(&format!("{}/report", server.uri())).await);
        assert_eq!(page.status, 200);
        assert_eq!(page.body, "Base Depth: 45 cm");
    }

    #[tokio::test]
    async fn test_retries_server_error_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/report"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/report"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let (fetcher, sink) = fetcher(10);
        let page = assert_ok!(fetcher.fetch(&format!("{}/report", server.uri())).await);
        assert_eq!(page.body, "ok");

        let failed = sink
            .events()
            .into_iter()
            .filter(|e| matches!(e, EngineEvent::RequestFailed { .. }))
            .count();
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn test_always_timing_out_makes_exactly_three_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .expect(3)
            .mount(&server)
            .await;

        let min_delay_ms = 150;
        let (fetcher, sink) = fetcher(min_delay_ms);
        let started = Instant::now();
        let err = assert_err!(fetcher.fetch(&format!("{}/slow", server.uri())).await);
        let elapsed = started.elapsed();

        assert_eq!(err.attempts, 3);
        assert!(err.message.contains("request error"), "{}", err.message);
        assert_eq!(server.received_requests().await.unwrap().len(), 3);

        // two gaps of at least the minimum delay between the three requests
        assert!(elapsed >= Duration::from_millis(2 * min_delay_ms), "{elapsed:?}");
        // 3 x timeout + backoff (20 + 40) + gaps, with slack
        assert!(elapsed < Duration::from_millis(1500), "{elapsed:?}");

        assert!(sink.events().iter().any(|e| matches!(
            e,
            EngineEvent::FetchExhausted { attempts: 3, .. }
        )));
    }

    #[tokio::test]
    async fn test_non_success_status_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(3)
            .mount(&server)
            .await;

        let (fetcher, _) = fetcher(5);
        let err = assert_err!(fetcher.fetch(&format!("{}/gone", server.uri())).await);
        assert!(err.message.contains("404"), "{}", err.message);
        assert!(err.url.ends_with("/gone"));
    }

    #[tokio::test]
    async fn test_fetch_first_falls_back_to_next_candidate() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/snow-report"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("home"))
            .mount(&server)
            .await;

        let (fetcher, _) = fetcher(5);
        let candidates = vec![
            format!("{}/snow-report", server.uri()),
            format!("{}/", server.uri()),
        ];
        let page = assert_ok!(fetcher.fetch_first(&candidates).await);
        assert_eq!(page.body, "home");
        assert!(page.url.ends_with('/'));
    }

    #[tokio::test]
    async fn test_fetch_first_with_no_candidates() {
        let (fetcher, _) = fetcher(5);
        let err = assert_err!(fetcher.fetch_first(&[]).await);
        assert_eq!(err.attempts, 0);
    }

    #[test]
    fn test_backoff_schedule_length_and_growth() {
        let (fetcher, _) = fetcher(5);
        let waits: Vec<Duration> = fetcher.backoff_schedule().collect();
        assert_eq!(waits, vec![Duration::from_millis(20), Duration::from_millis(40)]);
    }
}
