//! HTTP tile source backed by reqwest.

use std::time::Duration;

use bytes::Bytes;

use super::{FetchFuture, SourceError, TileSource};
use crate::coord::TileKey;

/// Default per-fetch timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches tiles over HTTP from a `{z}/{x}/{y}` URL template.
///
/// The underlying reqwest client pools connections, so sequential fetches on
/// the same worker reuse them. Every request carries a bounded timeout;
/// timeouts surface as retryable [`SourceError::Timeout`].
pub struct HttpTileSource {
    client: reqwest::Client,
    url_template: String,
    timeout: Duration,
}

impl HttpTileSource {
    /// Creates an HTTP source for the given URL template.
    ///
    /// The template must contain `{z}`, `{x}` and `{y}` placeholders, e.g.
    /// `https://tiles.example.com/{z}/{x}/{y}.pbf`.
    pub fn new(url_template: String, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Creation(e.to_string()))?;

        Ok(Self {
            client,
            url_template,
            timeout,
        })
    }

    fn url_for(&self, key: TileKey) -> String {
        self.url_template
            .replace("{z}", &key.zoom().to_string())
            .replace("{x}", &key.x().to_string())
            .replace("{y}", &key.y().to_string())
    }

    async fn get(&self, key: TileKey) -> Result<Bytes, SourceError> {
        let url = self.url_for(key);
        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout(self.timeout)
            } else {
                SourceError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(key));
        }
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                url,
            });
        }

        response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout(self.timeout)
            } else {
                SourceError::Http(e.to_string())
            }
        })
    }
}

impl TileSource for HttpTileSource {
    fn fetch(&mut self, key: TileKey) -> FetchFuture<'_> {
        Box::pin(async move { self.get(key).await })
    }
}
