//! Remote file archives.
//!
//! The upstream buckets are plain HTTPS. [`LocalArchive`] serves the same
//! relative layout from a directory, for mirrors and tests.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::config::ArchiveConfig;
use crate::error::{FetchError, PipelineError, Result};

#[async_trait]
pub trait SourceArchive: Send + Sync {
    /// Fetch a whole file.
    async fn fetch(&self, url: &str) -> std::result::Result<Bytes, FetchError>;
}

/// Build the archive described by the configuration.
pub fn from_config(config: &ArchiveConfig) -> Result<Box<dyn SourceArchive>> {
    Ok(match config {
        ArchiveConfig::Http {
            request_timeout_secs,
        } => Box::new(HttpArchive::new(Duration::from_secs(*request_timeout_secs))?),
        ArchiveConfig::Local { root } => Box::new(LocalArchive::new(root)),
    })
}

pub struct HttpArchive {
    client: Client,
}

impl HttpArchive {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SourceArchive for HttpArchive {
    async fn fetch(&self, url: &str) -> std::result::Result<Bytes, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(FetchError::NotFound(url.to_string())),
            status => return Err(FetchError::Status(status.as_u16())),
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        debug!(url = %url, bytes = body.len(), "Fetched");
        Ok(body)
    }
}

/// Files under a local directory. URLs are paths relative to the root,
/// optionally prefixed with `file://`.
pub struct LocalArchive {
    root: PathBuf,
}

impl LocalArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, url: &str) -> PathBuf {
        let relative = url.strip_prefix("file://").unwrap_or(url);
        self.root.join(relative.trim_start_matches('/'))
    }
}

#[async_trait]
impl SourceArchive for LocalArchive {
    async fn fetch(&self, url: &str) -> std::result::Result<Bytes, FetchError> {
        let path = self.resolve(url);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FetchError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(FetchError::Io(format!("{}: {}", path.display(), e))),
        }
    }
}
