//! Narrow interfaces over the document store and the blob store.
//!
//! Everything above this module talks to storage through [`VideoStore`],
//! [`crate::entitlement::EntitlementStore`] and [`BlobStore`], so the
//! validator, pipeline and streaming engine run against in-memory fakes in
//! tests and against the filesystem in the binary.

pub mod catalog;
pub mod fs;
pub mod memory;

use crate::entitlement::Tier;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub use catalog::Catalog;
pub use fs::FsBlobStore;
pub use memory::{MemoryBlobStore, MemorySubscriptionStore, MemoryVideoStore};

const CHUNK_SIZE: usize = 64 * 1024;
const PUMP_DEPTH: usize = 4;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid storage locator: {0}")]
    InvalidLocator(String),
}

impl StorageError {
    pub(crate) fn from_io(error: io::Error, locator: &str) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(locator.to_string()),
            _ => StorageError::Unavailable(format!("{locator}: {error}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub id: String,
    pub owner_id: String,
    pub is_active: bool,
    /// Public videos need only a valid token, not a tier
    #[serde(default)]
    pub is_public: bool,
    /// Hard cutoff independent of token expiry
    #[serde(default)]
    pub link_expires_at: Option<DateTime<Utc>>,
    pub storage_locator: String,
    #[serde(default)]
    pub access_count: u64,
    pub tier_required: Tier,
}

/// Document-store operations consumed by the access path
#[async_trait]
pub trait VideoStore: Send + Sync {
    async fn video(&self, id: &str) -> Result<Option<VideoRecord>, StorageError>;

    /// Atomically bump the access counter, returning the new value
    async fn increment_access_count(&self, id: &str) -> Result<u64, StorageError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMetadata {
    pub size: u64,
    pub content_type: String,
}

/// Inclusive byte window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Blob-store operations consumed by the streaming engine
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn exists(&self, locator: &str) -> Result<bool, StorageError>;

    async fn metadata(&self, locator: &str) -> Result<BlobMetadata, StorageError>;

    /// Stream exactly `range`. Cancelling `cancel` must stop the backing
    /// read promptly.
    async fn read_range(
        &self,
        locator: &str,
        range: ByteRange,
        cancel: CancellationToken,
    ) -> Result<ByteStream, StorageError>;
}

/// Counts reads currently holding backing resources
#[derive(Debug, Clone, Default)]
pub struct ReadTracker(Arc<AtomicUsize>);

impl ReadTracker {
    pub fn active(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn enter(self) -> ActiveRead {
        self.0.fetch_add(1, Ordering::SeqCst);
        ActiveRead(self)
    }
}

struct ActiveRead(ReadTracker);

impl Drop for ActiveRead {
    fn drop(&mut self) {
        self.0.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Move `reader` onto its own task and hand back a bounded channel of
/// chunks. The task stops on cancellation, on a read error, or as soon as
/// the receiving side is dropped.
pub(crate) fn pump_reader<R>(reader: R, cancel: CancellationToken, tracker: ReadTracker) -> ByteStream
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(PUMP_DEPTH);

    tokio::spawn(async move {
        let _active = tracker.enter();
        let mut chunks = ReaderStream::with_capacity(reader, CHUNK_SIZE);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Blob read cancelled");
                    break;
                }
                _ = tx.closed() => break,
                next = chunks.next() => next,
            };

            let Some(chunk) = next else { break };
            let failed = chunk.is_err();

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Blob read cancelled");
                    break;
                }
                sent = tx.send(chunk) => {
                    if sent.is_err() || failed {
                        break;
                    }
                }
            }
        }
    });

    ReceiverStream::new(rx).boxed()
}
