use crate::entitlement::{EntitlementStore, SubscriptionRecord};
use crate::storage::{
    BlobMetadata, BlobStore, ByteRange, ByteStream, ReadTracker, StorageError, VideoRecord,
    VideoStore, pump_reader,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

struct StoredVideo {
    record: VideoRecord,
    access_count: Arc<AtomicU64>,
}

/// In-process document store for video records
#[derive(Clone, Default)]
pub struct MemoryVideoStore {
    videos: Arc<RwLock<HashMap<String, StoredVideo>>>,
}

impl MemoryVideoStore {
    pub fn upsert(&self, record: VideoRecord) {
        let mut videos = self.videos.write();
        match videos.get_mut(&record.id) {
            Some(stored) => {
                stored.access_count.store(record.access_count, Ordering::SeqCst);
                stored.record = record;
            }
            None => {
                let access_count = Arc::new(AtomicU64::new(record.access_count));
                videos.insert(
                    record.id.clone(),
                    StoredVideo {
                        record,
                        access_count,
                    },
                );
            }
        }
    }

    /// Owner-driven activation toggle. Returns false for unknown ids.
    pub fn set_active(&self, id: &str, active: bool) -> bool {
        match self.videos.write().get_mut(id) {
            Some(stored) => {
                stored.record.is_active = active;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl VideoStore for MemoryVideoStore {
    async fn video(&self, id: &str) -> Result<Option<VideoRecord>, StorageError> {
        let videos = self.videos.read();
        Ok(videos.get(id).map(|stored| VideoRecord {
            access_count: stored.access_count.load(Ordering::SeqCst),
            ..stored.record.clone()
        }))
    }

    async fn increment_access_count(&self, id: &str) -> Result<u64, StorageError> {
        let videos = self.videos.read();
        let stored = videos
            .get(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        Ok(stored.access_count.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// In-process subscription store
#[derive(Clone, Default)]
pub struct MemorySubscriptionStore {
    records: Arc<RwLock<HashMap<String, SubscriptionRecord>>>,
}

impl MemorySubscriptionStore {
    /// Records without a subject id cannot be addressed and are ignored
    pub fn upsert(&self, record: SubscriptionRecord) -> bool {
        let Some(subject_id) = record.subject_id.clone() else {
            return false;
        };
        self.records.write().insert(subject_id, record);
        true
    }
}

#[async_trait]
impl EntitlementStore for MemorySubscriptionStore {
    async fn subscription(
        &self,
        subject_id: &str,
    ) -> Result<Option<SubscriptionRecord>, StorageError> {
        Ok(self.records.read().get(subject_id).cloned())
    }
}

/// In-process blob store
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<String, (Bytes, String)>>>,
    reads: ReadTracker,
}

impl MemoryBlobStore {
    pub fn insert(&self, locator: &str, content_type: &str, data: impl Into<Bytes>) {
        self.blobs
            .write()
            .insert(locator.to_string(), (data.into(), content_type.to_string()));
    }

    /// Reads whose backing task is still alive
    pub fn active_reads(&self) -> usize {
        self.reads.active()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn exists(&self, locator: &str) -> Result<bool, StorageError> {
        Ok(self.blobs.read().contains_key(locator))
    }

    async fn metadata(&self, locator: &str) -> Result<BlobMetadata, StorageError> {
        let blobs = self.blobs.read();
        let (data, content_type) = blobs
            .get(locator)
            .ok_or_else(|| StorageError::NotFound(locator.to_string()))?;
        Ok(BlobMetadata {
            size: data.len() as u64,
            content_type: content_type.clone(),
        })
    }

    async fn read_range(
        &self,
        locator: &str,
        range: ByteRange,
        cancel: CancellationToken,
    ) -> Result<ByteStream, StorageError> {
        let data = self
            .blobs
            .read()
            .get(locator)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| StorageError::NotFound(locator.to_string()))?;

        if range.end >= data.len() as u64 {
            return Err(StorageError::Unavailable(format!(
                "{locator}: range {}-{} beyond {} bytes",
                range.start,
                range.end,
                data.len()
            )));
        }

        let window = data.slice(range.start as usize..=range.end as usize);
        Ok(pump_reader(Cursor::new(window), cancel, self.reads.clone()))
    }
}
