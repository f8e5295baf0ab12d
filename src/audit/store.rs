use crate::audit::entry::{AuditEntry, AuditKind};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt as _;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audit entry encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Investigation query; unset fields match everything
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFilter {
    pub video_id: Option<String>,
    pub subject_id: Option<String>,
    pub kind: Option<AuditKind>,
    pub requires_investigation: Option<bool>,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.video_id.as_ref().is_none_or(|id| *id == entry.video_id)
            && self
                .subject_id
                .as_ref()
                .is_none_or(|id| entry.subject_id.as_ref() == Some(id))
            && self.kind.is_none_or(|kind| kind == entry.kind)
            && self
                .requires_investigation
                .is_none_or(|flag| flag == entry.requires_investigation)
    }
}

/// A stored line that no longer decodes as an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadableLine {
    /// 1-based line number
    pub line: usize,
    pub raw: String,
    pub error: String,
}

/// Everything a store returned for one investigation
#[derive(Debug, Default)]
pub struct AuditScan {
    pub entries: Vec<AuditEntry>,
    pub unreadable: Vec<UnreadableLine>,
}

/// Append-only persistence. Entries are never updated or deleted.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<(), AuditError>;

    /// Entries in append order
    async fn entries(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, AuditError>;

    /// Matching entries together with stored records that no longer
    /// decode. Those cannot be matched against a filter, so every scan
    /// returns all of them.
    async fn scan(&self, filter: &AuditFilter) -> Result<AuditScan, AuditError> {
        Ok(AuditScan {
            entries: self.entries(filter).await?,
            unreadable: Vec::new(),
        })
    }
}

#[derive(Clone, Default)]
pub struct MemoryAuditStore {
    entries: Arc<RwLock<Vec<AuditEntry>>>,
}

impl MemoryAuditStore {
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        self.entries.write().push(entry.clone());
        Ok(())
    }

    async fn entries(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect())
    }
}

/// One JSON document per line, opened in append mode for every write
pub struct JsonlAuditStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditStore for JsonlAuditStore {
    async fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut fh = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        fh.write_all(&line).await?;
        fh.flush().await?;
        Ok(())
    }

    async fn entries(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(self.scan(filter).await?.entries)
    }

    async fn scan(&self, filter: &AuditFilter) -> Result<AuditScan, AuditError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(AuditScan::default());
            }
            Err(error) => return Err(error.into()),
        };

        let mut scan = AuditScan::default();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(line) {
                Ok(entry) if filter.matches(&entry) => scan.entries.push(entry),
                Ok(_) => {}
                Err(error) => {
                    warn!(path = ?self.path, line = index + 1, %error, "Unreadable audit line");
                    scan.unreadable.push(UnreadableLine {
                        line: index + 1,
                        raw: line.to_string(),
                        error: error.to_string(),
                    });
                }
            }
        }
        Ok(scan)
    }
}
