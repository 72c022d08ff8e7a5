//! Destination object storage and upload endpoint selection
//! Uses the object_store crate; one backend per storage endpoint
//!
//! Uploads stream from the local file: HTTP storage nodes get a chunked
//! `PUT`, every other backend a multipart upload, so memory per transfer
//! stays bounded regardless of asset size.

use bytes::Bytes;
use object_store::{
    ClientOptions, ObjectStore, WriteMultipart, http::HttpBuilder, path::Path as StoragePath,
};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use super::queue::AssetKey;
use crate::config::HttpConfig;

const READ_CHUNK: usize = 64 * 1024;
const MAX_PARTS_IN_FLIGHT: usize = 2;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("No upload endpoints configured")]
    NoEndpoints,

    #[error("Invalid storage endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("Upload of {key} failed on all {attempts} endpoints, last error: {last}")]
    AllEndpointsFailed {
        key: String,
        attempts: usize,
        last: String,
    },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("PUT {url} failed: {reason}")]
    Put { url: String, reason: String },

    #[error("Object store error: {0}")]
    ObjectStoreError(#[from] object_store::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// One storage endpoint wrapping an object_store backend
#[derive(Clone)]
pub struct StorageClient {
    store: Arc<dyn ObjectStore>,
    /// Set for HTTP nodes, which accept plain `PUT` but no multipart upload
    http: Option<reqwest::Client>,
    pub endpoint: String,
}

impl StorageClient {
    pub fn new(store: Arc<dyn ObjectStore>, endpoint: impl Into<String>) -> Self {
        Self {
            store,
            http: None,
            endpoint: endpoint.into(),
        }
    }

    /// HTTP storage node accepting `PUT {endpoint}/{bucket}/{object}`
    pub fn http(endpoint: &str, http: &HttpConfig) -> Result<Self> {
        let invalid = |reason: String| StorageError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason,
        };

        let options = ClientOptions::new()
            .with_allow_http(true)
            .with_connect_timeout(http.connect_timeout())
            .with_timeout(http.request_timeout());

        let store = HttpBuilder::new()
            .with_url(endpoint)
            .with_client_options(options)
            .build()
            .map_err(|e| invalid(e.to_string()))?;

        // no overall timeout: large bodies legitimately take long
        let client = reqwest::Client::builder()
            .connect_timeout(http.connect_timeout())
            .user_agent(&http.user_agent)
            .build()
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            store: Arc::new(store),
            http: Some(client),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn in_memory(name: impl Into<String>) -> Self {
        Self::new(Arc::new(object_store::memory::InMemory::new()), name)
    }

    /// Stream `source` to `key`, returning the number of bytes sent
    pub async fn upload_file(&self, key: &str, source: &Path) -> Result<u64> {
        let size = match &self.http {
            Some(client) => self.put_streaming(client, key, source).await?,
            None => self.put_multipart(key, source).await?,
        };

        debug!(key, size, endpoint = %self.endpoint, "Uploaded to storage");
        Ok(size)
    }

    async fn put_streaming(&self, client: &reqwest::Client, key: &str, source: &Path) -> Result<u64> {
        let file = open(source).await?;
        let size = file
            .metadata()
            .await
            .map_err(|e| io_error(source, e))?
            .len();

        let url = format!("{}/{key}", self.endpoint);
        let put_error = |reason: String| StorageError::Put {
            url: url.clone(),
            reason,
        };

        let response = client
            .put(&url)
            .header(reqwest::header::CONTENT_LENGTH, size)
            .body(reqwest::Body::wrap_stream(ReaderStream::with_capacity(
                file, READ_CHUNK,
            )))
            .send()
            .await
            .map_err(|e| put_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(put_error(format!("HTTP {status}")));
        }
        Ok(size)
    }

    async fn put_multipart(&self, key: &str, source: &Path) -> Result<u64> {
        let mut file = open(source).await?;
        let upload = self.store.put_multipart(&StoragePath::from(key)).await?;
        let mut writer = WriteMultipart::new(upload);

        match feed(&mut file, &mut writer, source).await {
            Ok(size) => {
                writer.finish().await?;
                Ok(size)
            }
            Err(e) => {
                if let Err(abort) = writer.abort().await {
                    warn!(key, error = %abort, "Failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    pub async fn download(&self, key: &str) -> Result<Bytes> {
        let path = StoragePath::from(key);
        let bytes = self.store.get(&path).await?.bytes().await?;
        Ok(bytes)
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let path = StoragePath::from(key);

        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

async fn open(source: &Path) -> Result<tokio::fs::File> {
    tokio::fs::File::open(source)
        .await
        .map_err(|e| io_error(source, e))
}

fn io_error(source: &Path, e: std::io::Error) -> StorageError {
    StorageError::Io {
        path: source.display().to_string(),
        source: e,
    }
}

/// Copy the file into the multipart writer with bounded parts in flight
async fn feed(file: &mut tokio::fs::File, writer: &mut WriteMultipart, source: &Path) -> Result<u64> {
    let mut buf = vec![0u8; READ_CHUNK];
    let mut total = 0u64;

    loop {
        let n = file.read(&mut buf).await.map_err(|e| io_error(source, e))?;
        if n == 0 {
            return Ok(total);
        }
        writer.wait_for_capacity(MAX_PARTS_IN_FLIGHT).await?;
        writer.write(&buf[..n]);
        total += n as u64;
    }
}

/// Candidate upload targets; each upload starts at the next endpoint
/// round-robin and falls back across the rest
pub struct UploadPool {
    targets: Vec<StorageClient>,
    next: AtomicUsize,
}

impl UploadPool {
    pub fn new(targets: Vec<StorageClient>) -> Self {
        info!(endpoints = targets.len(), "Upload pool ready");
        Self {
            targets,
            next: AtomicUsize::new(0),
        }
    }

    pub fn from_endpoints(endpoints: &[String], http: &HttpConfig) -> Result<Self> {
        let targets = endpoints
            .iter()
            .map(|endpoint| StorageClient::http(endpoint, http))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(targets))
    }

    pub fn targets(&self) -> &[StorageClient] {
        &self.targets
    }

    pub async fn upload(&self, key: &AssetKey, source: &Path) -> Result<u64> {
        if self.targets.is_empty() {
            return Err(StorageError::NoEndpoints);
        }

        let count = self.targets.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % count;
        let object_path = key.object_path();
        let mut last = String::new();

        for offset in 0..count {
            let target = &self.targets[(start + offset) % count];
            match target.upload_file(&object_path, source).await {
                Ok(size) => return Ok(size),
                // every endpoint would fail the same way
                Err(e @ StorageError::Io { .. }) => return Err(e),
                Err(e) => {
                    warn!(key = %key, endpoint = %target.endpoint, error = %e, "Upload attempt failed");
                    last = e.to_string();
                }
            }
        }

        Err(StorageError::AllEndpointsFailed {
            key: key.to_string(),
            attempts: count,
            last,
        })
    }
}
