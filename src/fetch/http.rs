use futures::StreamExt;
use reqwest::header::HeaderMap;
use std::time::Duration;
use thiserror::Error;

use super::headers::HeaderPool;
use super::retry::RetryPolicy;
use crate::config::Config;
use crate::util::parse_http_url;

/// Cap on article page bodies read for Open-Graph lookups.
const MAX_PAGE_SIZE: usize = 2 * 1024 * 1024; // 2MB

/// Errors that can occur during a fetch.
///
/// Transient variants (network, timeout, 5xx, 429, truncated body) are
/// retried by [`RetryPolicy`]; the rest fail immediately.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded its timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// The URL is not a fetchable http(s) URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Returns true if this error is transient and the request should be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout => true,
            FetchError::IncompleteResponse { .. } => true,
            FetchError::HttpStatus(status) => *status >= 500 || *status == 429,
            FetchError::ResponseTooLarge | FetchError::InvalidUrl(_) => false,
        }
    }
}

/// Bounded, retried HTTP GET/HEAD with rotating headers.
///
/// Cheap to clone: the underlying `reqwest::Client` and header pool are
/// reference counted.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    headers: HeaderPool,
    timeout: Duration,
    max_bytes: usize,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(
        client: reqwest::Client,
        headers: HeaderPool,
        timeout: Duration,
        max_bytes: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            headers,
            timeout,
            max_bytes,
            retry,
        }
    }

    /// Builds a fetcher (and its client) from the ingestion config.
    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout())
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self::new(
            client,
            HeaderPool::new(config.user_agents.clone()),
            config.request_timeout(),
            config.max_feed_bytes,
            config.retry_policy(),
        ))
    }

    /// Fetches a feed body with freshly randomized headers and the retry policy.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.fetch_with(url, self.headers.feed_headers()).await
    }

    /// Fetches a body with caller-supplied headers and the retry policy.
    pub async fn fetch_with(&self, url: &str, headers: HeaderMap) -> Result<Vec<u8>, FetchError> {
        self.retry
            .run(url, || {
                self.get_once(url, headers.clone(), self.timeout, self.max_bytes)
            })
            .await
    }

    /// Single-attempt page fetch for best-effort enrichment.
    ///
    /// Uses its own (usually shorter) timeout and never retries.
    pub async fn fetch_page(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let bytes = self
            .get_once(url, self.headers.page_headers(), timeout, MAX_PAGE_SIZE)
            .await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Single-attempt HEAD request, returning the status code on success.
    pub async fn head(&self, url: &str, timeout: Duration) -> Result<u16, FetchError> {
        parse_http_url(url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;

        let response = tokio::time::timeout(
            timeout,
            self.client
                .head(url)
                .headers(self.headers.page_headers())
                .send(),
        )
        .await
        .map_err(|_| FetchError::Timeout)?
        .map_err(FetchError::Network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }
        Ok(status.as_u16())
    }

    async fn get_once(
        &self,
        url: &str,
        headers: HeaderMap,
        timeout: Duration,
        limit: usize,
    ) -> Result<Vec<u8>, FetchError> {
        parse_http_url(url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;

        let request = async {
            let response = self
                .client
                .get(url)
                .headers(headers)
                .send()
                .await
                .map_err(FetchError::Network)?;

            // Status is checked before any of the body is read
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            read_limited_bytes(response, limit).await
        };

        tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| FetchError::Timeout)?
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Capture Content-Length for completeness check
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    // Fewer bytes than Content-Length means the transfer was cut short.
    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
