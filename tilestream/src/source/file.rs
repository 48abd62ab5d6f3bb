//! Local-directory tile source.

use std::path::PathBuf;

use bytes::Bytes;

use super::{FetchFuture, SourceError, TileSource};
use crate::coord::TileKey;

/// Reads tiles from a local directory laid out as `root/z/x/y.<extension>`.
///
/// Stands in for any disk-level tile store; a persistent cache lives behind
/// this interface rather than inside the engine.
pub struct FileTileSource {
    root: PathBuf,
    extension: String,
}

impl FileTileSource {
    pub fn new(root: PathBuf, extension: String) -> Self {
        Self { root, extension }
    }

    /// Path for one tile under the source root.
    pub fn path_for(&self, key: TileKey) -> PathBuf {
        self.root
            .join(key.zoom().to_string())
            .join(key.x().to_string())
            .join(format!("{}.{}", key.y(), self.extension))
    }
}

impl TileSource for FileTileSource {
    fn fetch(&mut self, key: TileKey) -> FetchFuture<'_> {
        let path = self.path_for(key);
        Box::pin(async move {
            match tokio::fs::read(&path).await {
                Ok(data) => Ok(Bytes::from(data)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(SourceError::NotFound(key))
                }
                Err(e) => Err(SourceError::Io(e)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_layout() {
        let source = FileTileSource::new(PathBuf::from("/data/tiles"), "stv".to_string());
        let key = TileKey::new(3012, 1892, 14).unwrap();
        assert_eq!(
            source.path_for(key),
            PathBuf::from("/data/tiles/14/3012/1892.stv")
        );
    }

    #[tokio::test]
    async fn test_fetch_reads_tile_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = FileTileSource::new(dir.path().to_path_buf(), "stv".to_string());

        let key = TileKey::new(5, 7, 4).unwrap();
        let path = source.path_for(key);
        tokio::fs::create_dir_all(path.parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(&path, b"payload").await.unwrap();

        let bytes = source.fetch(key).await.unwrap();
        assert_eq!(&bytes[..], b"payload");
    }

    #[tokio::test]
    async fn test_fetch_missing_tile_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = FileTileSource::new(dir.path().to_path_buf(), "stv".to_string());

        let key = TileKey::new(0, 0, 1).unwrap();
        let result = source.fetch(key).await;
        assert!(matches!(result, Err(SourceError::NotFound(_))));
    }
}
