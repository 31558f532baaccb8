//! Paginated JSON archive + HTTP fetch utilities.

pub mod archive;

use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{info_span, warn, Instrument};

pub use archive::{ArchiveStore, IndexFile, PageDescriptor, PageFile, DEFAULT_PAGE_CAPACITY};

pub const CRATE_NAME: &str = "shogi-storage";

/// Whether a failed attempt is worth repeating under the configured backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

impl RetryDisposition {
    /// 5xx and 429 may clear up; every other non-success status is final.
    pub fn for_status(status: StatusCode) -> Self {
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Self::Retryable
        } else {
            Self::NonRetryable
        }
    }

    pub fn for_error(err: &reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::Retryable
        } else {
            Self::NonRetryable
        }
    }

    fn allows(self, attempt: usize, policy: &BackoffPolicy) -> bool {
        self == Self::Retryable && attempt < policy.max_retries
    }
}

/// Retry schedule for retryable fetch failures. The default performs a single
/// attempt; retries only happen when `max_retries` is raised explicitly.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpClientConfig {
    /// `None` leaves requests without a deadline.
    pub timeout: Option<Duration>,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: StatusCode,
    pub final_url: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().gzip(true).brotli(true);

        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    /// GETs `url` and returns the decoded body. Any non-success status is an error.
    pub async fn fetch_text(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let span = info_span!("http_fetch", url);
        self.fetch_text_inner(url).instrument(span).await
    }

    async fn fetch_text_inner(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let mut attempt = 0;
        loop {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp.text().await?;
                        return Ok(FetchedPage {
                            status,
                            final_url,
                            body,
                        });
                    }

                    if RetryDisposition::for_status(status).allows(attempt, &self.backoff) {
                        warn!(%status, attempt, "retryable status");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if RetryDisposition::for_error(&err).allows(attempt, &self.backoff) {
                        warn!(error = %err, attempt, "retryable request error");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Answers every connection with `status_line` and an empty body, counting requests.
    async fn serve_status(status_line: &'static str) -> (SocketAddr, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let response = format!(
                    "HTTP/1.1 {status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (addr, hits)
    }

    #[test]
    fn default_policy_never_retries() {
        assert_eq!(BackoffPolicy::default().max_retries, 0);
        assert!(!RetryDisposition::Retryable.allows(0, &BackoffPolicy::default()));
    }

    #[test]
    fn backoff_doubles_until_the_cap() {
        let policy = BackoffPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(40),
            max_delay: Duration::from_millis(100),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(40));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(80));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(100));
        assert!(RetryDisposition::Retryable.allows(2, &policy));
        assert!(!RetryDisposition::Retryable.allows(3, &policy));
        assert!(!RetryDisposition::NonRetryable.allows(0, &policy));
    }

    #[test]
    fn only_server_errors_and_throttling_are_retryable() {
        assert_eq!(
            RetryDisposition::for_status(StatusCode::SERVICE_UNAVAILABLE),
            RetryDisposition::Retryable
        );
        assert_eq!(
            RetryDisposition::for_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            RetryDisposition::for_status(StatusCode::NOT_FOUND),
            RetryDisposition::NonRetryable
        );
        assert_eq!(
            RetryDisposition::for_status(StatusCode::FORBIDDEN),
            RetryDisposition::NonRetryable
        );
    }

    #[test]
    fn client_builds_without_timeout() {
        let fetcher = HttpFetcher::new(HttpClientConfig::default());
        assert!(fetcher.is_ok());
    }

    #[tokio::test]
    async fn not_found_is_fatal_after_a_single_request() {
        let (addr, hits) = serve_status("404 Not Found").await;
        let fetcher = HttpFetcher::new(HttpClientConfig::default()).unwrap();

        let err = fetcher
            .fetch_text(&format!("http://{addr}/x"))
            .await
            .unwrap_err();

        match err {
            FetchError::HttpStatus { status, url } => {
                assert_eq!(status, 404);
                assert!(url.ends_with("/x"), "url {url}");
            }
            other => panic!("expected http status error, got {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn server_error_is_not_retried_by_default() {
        let (addr, hits) = serve_status("503 Service Unavailable").await;
        let fetcher = HttpFetcher::new(HttpClientConfig::default()).unwrap();

        let err = fetcher.fetch_text(&format!("http://{addr}/")).await.unwrap_err();

        assert!(matches!(err, FetchError::HttpStatus { status: 503, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn opt_in_retries_repeat_server_errors() {
        let (addr, hits) = serve_status("503 Service Unavailable").await;
        let fetcher = HttpFetcher::new(HttpClientConfig {
            backoff: BackoffPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            ..HttpClientConfig::default()
        })
        .unwrap();

        let err = fetcher.fetch_text(&format!("http://{addr}/")).await.unwrap_err();

        assert!(matches!(err, FetchError::HttpStatus { status: 503, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn not_found_is_never_retried_even_when_retries_are_enabled() {
        let (addr, hits) = serve_status("404 Not Found").await;
        let fetcher = HttpFetcher::new(HttpClientConfig {
            backoff: BackoffPolicy {
                max_retries: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            ..HttpClientConfig::default()
        })
        .unwrap();

        assert!(fetcher.fetch_text(&format!("http://{addr}/")).await.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
