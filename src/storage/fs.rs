use crate::storage::{
    BlobMetadata, BlobStore, ByteRange, ByteStream, ReadTracker, StorageError, pump_reader,
};
use async_trait::async_trait;
use mime_guess::from_path;
use std::path::{Component, Path, PathBuf};
use tokio::io::{AsyncReadExt as _, AsyncSeekExt as _};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Blob store rooted at a local directory
#[derive(Clone, Debug)]
pub struct FsBlobStore {
    root: PathBuf,
    reads: ReadTracker,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            reads: ReadTracker::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn active_reads(&self) -> usize {
        self.reads.active()
    }

    /// Map a locator to a path under the root, refusing anything that could
    /// escape it
    fn resolve(&self, locator: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(locator);
        let clean = !locator.is_empty()
            && !locator.contains('\\')
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !clean {
            return Err(StorageError::InvalidLocator(locator.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn exists(&self, locator: &str) -> Result<bool, StorageError> {
        let path = self.resolve(locator)?;
        match tokio::fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(StorageError::from_io(error, locator)),
        }
    }

    async fn metadata(&self, locator: &str) -> Result<BlobMetadata, StorageError> {
        let path = self.resolve(locator)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|error| StorageError::from_io(error, locator))?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(locator.to_string()));
        }

        Ok(BlobMetadata {
            size: metadata.len(),
            content_type: from_path(&path).first_or_octet_stream().to_string(),
        })
    }

    async fn read_range(
        &self,
        locator: &str,
        range: ByteRange,
        cancel: CancellationToken,
    ) -> Result<ByteStream, StorageError> {
        let path = self.resolve(locator)?;
        let mut fh = tokio::fs::File::open(&path)
            .await
            .map_err(|error| StorageError::from_io(error, locator))?;
        fh.seek(std::io::SeekFrom::Start(range.start))
            .await
            .map_err(|error| StorageError::from_io(error, locator))?;

        debug!(?path, start = range.start, end = range.end, "Reading blob range");
        Ok(pump_reader(fh.take(range.len()), cancel, self.reads.clone()))
    }
}
