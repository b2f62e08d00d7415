//! # Remote Repository
//!
//! Thin wrapper over an `object_store` backend shared by every peer of a
//! cluster. Layout:
//!
//! ```text
//! <prefix>/<channel>/segment_000000
//! <prefix>/<channel>/segment_000001
//! <prefix>/<channel>/archive_manifest.json
//! ```
//!
//! Supported URLs:
//!
//! | URL | Backend |
//! |-----|---------|
//! | `memory://` | `InMemory`, process-local |
//! | `file:///var/archive` | `LocalFileSystem` rooted at the path |
//! | `s3://bucket/prefix` | `AmazonS3`, credentials from the environment |

use crate::domain::errors::{ArchiveError, ArchiveResult};
use crate::domain::manifest::{ArchiveManifest, MANIFEST_FILE_NAME};
use crate::domain::segment::segment_file_name;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct RemoteRepository {
    store: Arc<dyn ObjectStore>,
    /// Key prefix inside the store, possibly empty.
    prefix: Vec<String>,
    url: String,
}

impl std::fmt::Debug for RemoteRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteRepository")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl RemoteRepository {
    /// Wrap an existing store.
    pub fn new(store: Arc<dyn ObjectStore>, url: impl Into<String>) -> Self {
        Self {
            store,
            prefix: Vec::new(),
            url: url.into(),
        }
    }

    /// Process-local repository. Clones share contents.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "memory://")
    }

    pub fn from_url(url: &str) -> ArchiveResult<Self> {
        let bad = |reason: String| ArchiveError::Repository {
            message: format!("{url}: {reason}"),
        };

        if url == "memory://" || url == "memory:///" {
            return Ok(Self::in_memory());
        }

        if let Some(path) = url.strip_prefix("file://") {
            if path.is_empty() {
                return Err(bad("missing path".into()));
            }
            std::fs::create_dir_all(path)
                .map_err(|e| ArchiveError::io(format!("create {path}"), e))?;
            let store = LocalFileSystem::new_with_prefix(path).map_err(|e| bad(e.to_string()))?;
            return Ok(Self::new(Arc::new(store), url));
        }

        if let Some(rest) = url.strip_prefix("s3://") {
            let mut parts = rest.splitn(2, '/');
            let bucket = parts
                .next()
                .filter(|b| !b.is_empty())
                .ok_or_else(|| bad("missing bucket".into()))?;
            let store = AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .build()
                .map_err(|e| bad(e.to_string()))?;
            let prefix = parts
                .next()
                .map(|p| {
                    p.split('/')
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            return Ok(Self {
                store: Arc::new(store),
                prefix,
                url: url.to_string(),
            });
        }

        Err(bad("unsupported scheme".into()))
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn location(&self, channel_id: &str, name: &str) -> ObjectPath {
        ObjectPath::from_iter(
            self.prefix
                .iter()
                .map(String::as_str)
                .chain([channel_id, name]),
        )
    }

    #[must_use]
    pub fn segment_location(&self, channel_id: &str, segment: u64) -> ObjectPath {
        self.location(channel_id, &segment_file_name(segment))
    }

    #[must_use]
    pub fn manifest_location(&self, channel_id: &str) -> ObjectPath {
        self.location(channel_id, MANIFEST_FILE_NAME)
    }

    fn unreachable(
        channel_id: &str,
        location: &ObjectPath,
        err: object_store::Error,
    ) -> ArchiveError {
        ArchiveError::RemoteUnreachable {
            channel: channel_id.to_string(),
            target: location.to_string(),
            reason: err.to_string(),
        }
    }

    /// Size of a stored object, `None` when absent.
    pub async fn head_size(
        &self,
        channel_id: &str,
        location: &ObjectPath,
    ) -> ArchiveResult<Option<u64>> {
        match self.store.head(location).await {
            Ok(meta) => Ok(Some(meta.size as u64)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(Self::unreachable(channel_id, location, e)),
        }
    }

    /// Contents of a stored object, `None` when absent.
    pub async fn get_bytes(
        &self,
        channel_id: &str,
        location: &ObjectPath,
    ) -> ArchiveResult<Option<Bytes>> {
        let result = match self.store.get(location).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(Self::unreachable(channel_id, location, e)),
        };
        let bytes = result
            .bytes()
            .await
            .map_err(|e| Self::unreachable(channel_id, location, e))?;
        debug!(%location, size = bytes.len(), "[qc-02] Fetched archived object");
        Ok(Some(bytes))
    }

    pub async fn put_bytes(
        &self,
        channel_id: &str,
        location: &ObjectPath,
        data: Bytes,
    ) -> ArchiveResult<()> {
        self.store
            .put(location, data)
            .await
            .map(|_| ())
            .map_err(|e| Self::unreachable(channel_id, location, e))
    }

    /// The channel's manifest, `None` before the first archive.
    pub async fn load_manifest(&self, channel_id: &str) -> ArchiveResult<Option<ArchiveManifest>> {
        let location = self.manifest_location(channel_id);
        match self.get_bytes(channel_id, &location).await? {
            Some(bytes) => ArchiveManifest::from_json(&bytes).map(Some),
            None => Ok(None),
        }
    }

    pub async fn store_manifest(&self, manifest: &ArchiveManifest) -> ArchiveResult<()> {
        let location = self.manifest_location(&manifest.channel_id);
        let json = manifest.to_json()?;
        self.put_bytes(&manifest.channel_id, &location, Bytes::from(json))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::watermark::ArchiveWatermark;
    use tempfile::TempDir;

    #[test]
    fn test_locations() {
        let repo = RemoteRepository::in_memory();
        assert_eq!(
            repo.segment_location("mychannel", 7).to_string(),
            "mychannel/segment_000007"
        );
        assert_eq!(
            repo.manifest_location("mychannel").to_string(),
            "mychannel/archive_manifest.json"
        );
    }

    #[test]
    fn test_unsupported_scheme() {
        assert!(matches!(
            RemoteRepository::from_url("ftp://host/dir"),
            Err(ArchiveError::Repository { .. })
        ));
        assert!(RemoteRepository::from_url("file://").is_err());
    }

    #[tokio::test]
    async fn test_missing_objects_are_none() {
        let repo = RemoteRepository::in_memory();
        let location = repo.segment_location("mychannel", 0);
        assert_eq!(repo.head_size("mychannel", &location).await.unwrap(), None);
        assert!(repo.get_bytes("mychannel", &location).await.unwrap().is_none());
        assert!(repo.load_manifest("mychannel").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_backend_manifest() {
        let dir = TempDir::new().unwrap();
        let url = format!("file://{}", dir.path().join("archive").display());
        let repo = RemoteRepository::from_url(&url).unwrap();

        let manifest =
            ArchiveManifest::from_index("mychannel", ArchiveWatermark::new(0, 9), &[(0, 9)]);
        repo.store_manifest(&manifest).await.unwrap();

        let loaded = repo.load_manifest("mychannel").await.unwrap().unwrap();
        assert_eq!(loaded, manifest);
        assert!(dir.path().join("archive/mychannel/archive_manifest.json").exists());
    }
}
