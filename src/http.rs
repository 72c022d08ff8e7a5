//! Shared HTTP client for distributor downloads and snapshot paging

use crate::config::HttpConfig;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Invalid response body from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("Failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, HttpError>;

const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// GET client with bounded retries and exponential backoff
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    max_retries: u32,
    backoff_base: Duration,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| HttpError::RequestFailed(e.to_string()))?;

        Ok(Self {
            client,
            max_retries: config.max_retries.max(1),
            backoff_base: Duration::from_secs(1),
        })
    }

    /// Override the first retry delay (doubles per attempt)
    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// GET a resource, retrying transient failures
    pub async fn get_bytes(&self, url: &str) -> Result<Bytes> {
        self.with_retry(url, || self.get_once(url)).await
    }

    /// GET and decode a JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let bytes = self.get_bytes(url).await?;
        serde_json::from_slice(&bytes).map_err(|e| HttpError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// Stream a resource into `dest`, truncating it on every attempt;
    /// returns the number of bytes written
    pub async fn download_to(&self, url: &str, dest: &Path) -> Result<u64> {
        self.with_retry(url, || self.download_once(url, dest)).await
    }

    async fn with_retry<T, F, Fut>(&self, url: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match attempt().await {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(url, attempts, "Request succeeded after retry");
                    }
                    return Ok(value);
                }
                // 4xx will not change on retry
                Err(HttpError::Status { status, .. }) if (400..500).contains(&status) => {
                    return Err(HttpError::Status {
                        url: url.to_string(),
                        status,
                    });
                }
                Err(e @ HttpError::Io { .. }) => return Err(e),
                Err(e) if attempts >= self.max_retries => {
                    warn!(url, attempts, error = %e, "Request failed after retries");
                    return Err(e);
                }
                Err(e) => {
                    warn!(url, attempts, error = %e, "Request failed, retrying");
                    tokio::time::sleep(self.backoff(attempts)).await;
                }
            }
        }
    }

    /// Delay after the given failed attempt, doubling up to [`MAX_BACKOFF`]
    fn backoff(&self, attempts: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempts.saturating_sub(1));
        self.backoff_base.saturating_mul(factor).min(MAX_BACKOFF)
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response> {
        debug!(url, "Starting request");

        let response = self.client.get(url).send().await.map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn get_once(&self, url: &str) -> Result<Bytes> {
        let bytes = self
            .send(url)
            .await?
            .bytes()
            .await
            .map_err(|e| HttpError::RequestFailed(format!("Failed to read body: {}", e)))?;

        debug!(url, size = bytes.len(), "Request completed");

        Ok(bytes)
    }

    async fn download_once(&self, url: &str, dest: &Path) -> Result<u64> {
        let response = self.send(url).await?;
        let io_error = |source| HttpError::Io {
            path: dest.display().to_string(),
            source,
        };

        let mut file = tokio::fs::File::create(dest).await.map_err(io_error)?;
        let mut body = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(request_error)?;
            file.write_all(&chunk).await.map_err(io_error)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_error)?;

        debug!(url, size = written, "Download completed");
        Ok(written)
    }
}

fn request_error(e: reqwest::Error) -> HttpError {
    if e.is_timeout() {
        HttpError::Timeout
    } else {
        HttpError::RequestFailed(e.to_string())
    }
}
