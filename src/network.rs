use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, USER_AGENT};
use std::time::Duration;
use tokio::time::timeout;

use crate::config::{Config, ProxyRoute};

/// One outgoing page request with the identity chosen by the dispatcher.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest<'a> {
    pub url: &'a str,
    pub user_agent: &'a str,
    pub cookie: Option<&'a str>,
}

/// Anything that can turn a `PageRequest` into a page.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, request: PageRequest<'_>) -> Result<FetchResult, FetchError>;
}

/// HTTP client tunneled through the local SOCKS proxy
#[derive(Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    timeout_duration: Duration,
    max_content_size: usize,
}

impl HttpClient {
    /// Create a client routed through `proxy` with the default content limit
    pub fn new(proxy: &ProxyRoute, timeout: Duration) -> Result<Self, FetchError> {
        Self::with_content_limit(proxy, timeout, Config::MAX_CONTENT_SIZE)
    }

    pub fn with_content_limit(
        proxy: &ProxyRoute,
        timeout: Duration,
        max_content_size: usize,
    ) -> Result<Self, FetchError> {
        let proxy = reqwest::Proxy::all(proxy.socks_url())
            .map_err(|e| FetchError::Proxy(e.to_string()))?;

        // No default user agent or cookie store: identity is set per request
        let client = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(Config::CONNECT_TIMEOUT_SECS))
            .pool_max_idle_per_host(1)
            .pool_idle_timeout(Duration::from_secs(30))
            .http1_only()
            .redirect(reqwest::redirect::Policy::limited(Config::MAX_REDIRECTS))
            .build()
            .map_err(|e| FetchError::Proxy(e.to_string()))?;

        Ok(Self {
            client,
            timeout_duration: timeout,
            max_content_size,
        })
    }

    /// Fetch once. Retry policy belongs to the crawl loop, not here.
    async fn fetch_once(&self, request: PageRequest<'_>) -> Result<FetchResult, FetchError> {
        let mut builder = self
            .client
            .get(request.url)
            .header(USER_AGENT, request.user_agent)
            .header(
                ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.5");

        if let Some(cookie) = request.cookie {
            builder = builder.header(COOKIE, cookie);
        }

        let response = timeout(self.timeout_duration, builder.send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(Self::classify_error)?;

        let status_code = response.status().as_u16();
        if !response.status().is_success() {
            return Err(FetchError::Status(status_code));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string());

        // Check content length header first
        if let Some(length) = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<usize>().ok())
        {
            if length > self.max_content_size {
                return Err(FetchError::ContentTooLarge(length, self.max_content_size));
            }
        }

        let content = timeout(self.timeout_duration, response.text())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(|e| FetchError::BodyError(e.to_string()))?;

        if content.len() > self.max_content_size {
            return Err(FetchError::ContentTooLarge(
                content.len(),
                self.max_content_size,
            ));
        }

        Ok(FetchResult {
            content,
            status_code,
            content_type,
        })
    }

    fn classify_error(error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            return FetchError::Timeout;
        }

        let error_msg = error.to_string().to_lowercase();

        if error_msg.contains("connection refused") {
            return FetchError::ConnectionRefused;
        }

        // The SOCKS handshake fails when the onion service is unreachable
        if error_msg.contains("socks") {
            return FetchError::Proxy(error.to_string());
        }

        FetchError::NetworkError(error.to_string())
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn get(&self, request: PageRequest<'_>) -> Result<FetchResult, FetchError> {
        self.fetch_once(request).await
    }
}

/// Result of a successful HTTP fetch
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub content: String,
    pub status_code: u16,
    pub content_type: Option<String>,
}

impl FetchResult {
    pub fn html(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            status_code: 200,
            content_type: Some("text/html".to_string()),
        }
    }
}

/// Errors that can occur during HTTP fetching
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection refused - proxy not accepting connections")]
    ConnectionRefused,

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    #[error("Failed to read response body: {0}")]
    BodyError(String),

    #[error("Content too large: {0} bytes (max: {1} bytes)")]
    ContentTooLarge(usize, usize),

    #[error("Request cancelled by shutdown")]
    Cancelled,
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_client_creation() {
        let client = HttpClient::new(&ProxyRoute::default(), Duration::from_secs(30));
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_invalid_url() {
        let client = HttpClient::new(&ProxyRoute::default(), Duration::from_secs(5)).unwrap();
        let request = PageRequest {
            url: "not-a-url",
            user_agent: "Mozilla/5.0",
            cookie: None,
        };

        // Any error is acceptable for an invalid URL
        assert!(client.get(request).await.is_err());
    }

    #[test]
    fn test_timeout_classification() {
        assert!(FetchError::Timeout.is_timeout());
        assert!(!FetchError::Status(503).is_timeout());
        assert_eq!(FetchError::Status(404).to_string(), "Unexpected HTTP status 404");
    }
}
