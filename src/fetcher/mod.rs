pub mod retry;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::StatusCode;
use reqwest::header::ACCEPT;

use crate::config::{Config, RetryConfig};
use crate::error::FetchError;
use retry::with_retry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// An HTML page for the page model
    Html,
    /// Raw file content
    Binary,
}

impl FetchMode {
    fn accept(self) -> &'static str {
        match self {
            FetchMode::Html => "text/html,application/xhtml+xml",
            FetchMode::Binary => "*/*",
        }
    }
}

/// A response body read chunk by chunk.
pub struct BodyStream {
    pub url: String,
    /// Length announced by the server, if any.
    pub content_length: Option<u64>,
    pub chunks: BoxStream<'static, Result<Bytes, FetchError>>,
}

impl BodyStream {
    /// A body that is already in memory, split into `parts` chunks.
    pub fn from_bytes(url: &str, body: Bytes, parts: usize) -> Self {
        let len = body.len();
        let step = len.div_ceil(parts.max(1)).max(1);
        let chunks: Vec<Result<Bytes, FetchError>> = (0..len)
            .step_by(step)
            .map(|start| Ok(body.slice(start..(start + step).min(len))))
            .collect();
        Self {
            url: url.to_string(),
            content_length: Some(len as u64),
            chunks: stream::iter(chunks).boxed(),
        }
    }
}

/// Byte-fetching primitive every network caller goes through.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Whole body, retried on transient failures.
    async fn fetch(&self, url: &str, mode: FetchMode) -> Result<Bytes, FetchError>;

    /// Starts a streaming download. One attempt only: a body that breaks off
    /// has to be fetched again from the start, so the caller owns retries.
    async fn open(&self, url: &str) -> Result<BodyStream, FetchError>;

    async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        let body = self.fetch(url, FetchMode::Html).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

/// reqwest client wrapped in the retry policy.
pub struct HttpFetcher {
    client: reqwest::Client,
    retry: RetryConfig,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self {
            client,
            retry: config.retry.clone(),
        })
    }

    async fn send(&self, url: &str, mode: FetchMode) -> Result<reqwest::Response, FetchError> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, mode.accept())
            .send()
            .await
            .map_err(|err| classify_request_error(url, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(url, status));
        }
        Ok(response)
    }

    async fn fetch_once(&self, url: &str, mode: FetchMode) -> Result<Bytes, FetchError> {
        let response = self.send(url, mode).await?;
        let status = response.status();

        let expected = response.content_length();
        let body = response
            .bytes()
            .await
            .map_err(|err| classify_request_error(url, err))?;

        if let Some(expected) = expected {
            if (body.len() as u64) < expected {
                return Err(FetchError::transient(
                    url,
                    Some(status.as_u16()),
                    format!("truncated body: got {} of {} bytes", body.len(), expected),
                ));
            }
        }

        tracing::trace!(url, bytes = body.len(), "fetched");
        Ok(body)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, mode: FetchMode) -> Result<Bytes, FetchError> {
        with_retry(&self.retry, || self.fetch_once(url, mode)).await
    }

    async fn open(&self, url: &str) -> Result<BodyStream, FetchError> {
        let response = self.send(url, FetchMode::Binary).await?;
        let content_length = response.content_length();
        let owned_url = url.to_string();
        let chunks = response
            .bytes_stream()
            .map_err(move |err| classify_request_error(&owned_url, err))
            .boxed();
        Ok(BodyStream {
            url: url.to_string(),
            content_length,
            chunks,
        })
    }
}

fn classify_status(url: &str, status: StatusCode) -> FetchError {
    let message = status
        .canonical_reason()
        .unwrap_or("unexpected status")
        .to_string();
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        FetchError::transient(url, Some(status.as_u16()), message)
    } else {
        FetchError::permanent(url, Some(status.as_u16()), message)
    }
}

fn classify_request_error(url: &str, err: reqwest::Error) -> FetchError {
    let status = err.status().map(|s| s.as_u16());
    if err.is_builder() || err.is_redirect() {
        FetchError::permanent(url, status, err.to_string())
    } else {
        // timeouts, refused/reset connections and cut-off bodies
        FetchError::transient(url, status, err.to_string())
    }
}
