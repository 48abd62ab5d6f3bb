//! Tile data source abstraction
//!
//! Provides the [`TileSource`] trait for fetching raw tile bytes by key,
//! with HTTP and local-directory implementations selected through
//! [`SourceConfig`]. Each worker owns its own source instance so connections
//! are reused across sequential jobs on one worker but never shared between
//! concurrently running workers.

mod file;
mod http;

pub use file::FileTileSource;
pub use http::{HttpTileSource, DEFAULT_FETCH_TIMEOUT};

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

use crate::coord::TileKey;

/// Errors produced while fetching raw tile bytes.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport-level HTTP failure (connect, TLS, read).
    #[error("http request failed: {0}")]
    Http(String),

    /// Non-success HTTP status.
    #[error("http status {status} for {url}")]
    Status { status: u16, url: String },

    /// The fetch exceeded its bounded timeout.
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    /// The source has no data for this key.
    #[error("tile not found: {0}")]
    NotFound(TileKey),

    /// Local I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Source construction failed.
    #[error("failed to create source: {0}")]
    Creation(String),
}

impl SourceError {
    /// Whether a retry with backoff may succeed.
    ///
    /// Transport failures, timeouts, server errors and local I/O hiccups are
    /// retryable; missing tiles and client errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::Http(_) | SourceError::Timeout(_) | SourceError::Io(_) => true,
            SourceError::Status { status, .. } => *status >= 500,
            SourceError::NotFound(_) | SourceError::Creation(_) => false,
        }
    }
}

/// Boxed fetch future returned by [`TileSource::fetch`].
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Bytes, SourceError>> + Send + 'a>>;

/// Pluggable fetch strategy producing raw tile bytes.
///
/// Implementations may hold a reusable connection; ownership of a single
/// source is never shared across concurrently running workers.
pub trait TileSource: Send {
    /// Fetches the raw bytes for one tile.
    fn fetch(&mut self, key: TileKey) -> FetchFuture<'_>;

    /// Releases held resources. Called once when the owning worker stops.
    fn close(&mut self) {}
}

/// Creates a fresh [`TileSource`] per worker.
pub trait SourceFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn TileSource>, SourceError>;
}

/// Source selection, resolved to a concrete plugin per worker.
#[derive(Debug, Clone)]
pub enum SourceConfig {
    /// HTTP fetch from a URL template containing `{z}`, `{x}` and `{y}`.
    Http {
        url_template: String,
        timeout: Duration,
    },
    /// Read tiles from a local directory laid out as `z/x/y.<extension>`.
    Directory { root: PathBuf, extension: String },
}

impl SourceConfig {
    /// HTTP source with the default fetch timeout.
    pub fn http(url_template: impl Into<String>) -> Self {
        Self::Http {
            url_template: url_template.into(),
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Local directory source.
    pub fn directory(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self::Directory {
            root: root.into(),
            extension: extension.into(),
        }
    }
}

impl SourceFactory for SourceConfig {
    fn create(&self) -> Result<Box<dyn TileSource>, SourceError> {
        match self {
            SourceConfig::Http {
                url_template,
                timeout,
            } => Ok(Box::new(HttpTileSource::new(url_template.clone(), *timeout)?)),
            SourceConfig::Directory { root, extension } => Ok(Box::new(FileTileSource::new(
                root.clone(),
                extension.clone(),
            ))),
        }
    }
}
