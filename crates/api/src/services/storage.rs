//! Document storage backends.
//!
//! The backend is chosen by `storage.provider`; both implement
//! [`FileStore`] and are interchangeable from the pipeline's point of view.

use domain::error::FetchError;
use domain::services::FileStore;
use reqwest::{Client, StatusCode, Url};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::StorageConfig;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Unknown storage provider: {0}")]
    UnknownProvider(String),

    #[error("Invalid storage base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Builds the configured backend.
pub fn build_file_store(config: &StorageConfig) -> Result<Arc<dyn FileStore>, StorageError> {
    match config.provider.as_str() {
        "local" => Ok(Arc::new(LocalFileStore::new(config.local_root.clone()))),
        "http" => Ok(Arc::new(HttpFileStore::new(
            &config.http_base_url,
            config.http_auth_token.clone(),
            Duration::from_secs(config.http_connect_timeout_secs),
        )?)),
        other => Err(StorageError::UnknownProvider(other.to_string())),
    }
}

/// Rejects absolute paths and any `..` component.
fn relative_storage_path(path: &str) -> Result<PathBuf, FetchError> {
    let candidate = Path::new(path);
    let mut clean = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return Err(FetchError::InvalidPath(path.to_string())),
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(FetchError::InvalidPath(path.to_string()));
    }
    Ok(clean)
}

/// Documents stored as files below a root directory.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait::async_trait]
impl FileStore for LocalFileStore {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        let full = self.root.join(relative_storage_path(path)?);
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FetchError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Documents served by an HTTP document service, `GET <base>/<path>`.
///
/// The per-request deadline is enforced by the archive generator; the
/// client only bounds connection setup.
#[derive(Debug, Clone)]
pub struct HttpFileStore {
    client: Client,
    base: Url,
    auth_token: Option<String>,
}

impl HttpFileStore {
    pub fn new(
        base_url: &str,
        auth_token: Option<String>,
        connect_timeout: Duration,
    ) -> Result<Self, StorageError> {
        // A base without a trailing slash would have its last segment
        // replaced by `Url::join`.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base =
            Url::parse(&normalized).map_err(|e| StorageError::InvalidBaseUrl(e.to_string()))?;

        let client = Client::builder().connect_timeout(connect_timeout).build()?;

        Ok(Self {
            client,
            base,
            auth_token,
        })
    }

    fn url_for(&self, path: &str) -> Result<Url, FetchError> {
        let relative = relative_storage_path(path)?;
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| FetchError::InvalidPath(path.to_string()))?;
            segments.pop_if_empty();
            for part in relative.components() {
                segments.push(&part.as_os_str().to_string_lossy());
            }
        }
        Ok(url)
    }
}

#[async_trait::async_trait]
impl FileStore for HttpFileStore {
    fn backend(&self) -> &'static str {
        "http"
    }

    async fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        let url = self.url_for(path)?;
        debug!(url = %url, "Fetching document over HTTP");

        let mut request = self.client.get(url);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Backend(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(FetchError::NotFound(path.to_string())),
            status if !status.is_success() => Err(FetchError::Backend(format!(
                "document service returned HTTP {}",
                status.as_u16()
            ))),
            _ => response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| FetchError::Backend(e.to_string())),
        }
    }
}
