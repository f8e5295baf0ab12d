use crate::audit::entry::{AuditDraft, AuditEntry, AuditKind, Integrity};
use crate::audit::store::{AuditError, AuditFilter, AuditStore, UnreadableLine};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Sealed entries waiting for the writer before `record` starts spilling
/// into per-entry tasks
pub const AUDIT_QUEUE_DEPTH: usize = 1024;

enum WriterCommand {
    Append(Box<AuditEntry>),
    Flush(oneshot::Sender<()>),
}

/// An entry as read back for investigation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestigatedEntry {
    #[serde(flatten)]
    pub entry: AuditEntry,
    pub integrity: Integrity,
}

/// Result of re-reading the trail
#[derive(Debug, Clone, Default)]
pub struct Investigation {
    pub entries: Vec<InvestigatedEntry>,
    /// Stored records that no longer decode; always suspect
    pub unreadable: Vec<UnreadableLine>,
}

impl Investigation {
    pub fn tamper_suspected(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.integrity == Integrity::TamperSuspected)
            .count()
            + self.unreadable.len()
    }
}

/// Audit & Violation Logger.
///
/// Entries are sealed on the caller's task at the point of decision and
/// handed to a single writer task, so appends happen in decision order and
/// off the response path.
#[derive(Clone)]
pub struct AuditLogger {
    store: Arc<dyn AuditStore>,
    queue: mpsc::Sender<WriterCommand>,
}

impl AuditLogger {
    /// Start the writer task. Must be called inside a tokio runtime.
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        let (queue, commands) = mpsc::channel(AUDIT_QUEUE_DEPTH);
        tokio::spawn(write_entries(store.clone(), commands));
        Self { store, queue }
    }

    pub fn record(&self, draft: AuditDraft) {
        let entry = AuditEntry::seal(draft, Utc::now());

        if entry.kind == AuditKind::SecurityViolation {
            warn!(
                audit_id = %entry.id,
                video_id = %entry.video_id,
                violation = ?entry.context.violation,
                severity = ?entry.context.severity,
                requires_investigation = entry.requires_investigation,
                "Security violation"
            );
        }

        match self.queue.try_send(WriterCommand::Append(Box::new(entry))) {
            Ok(()) => {}
            Err(TrySendError::Full(command)) => {
                debug!("Audit queue full, waiting for the writer");
                let queue = self.queue.clone();
                tokio::spawn(async move {
                    if queue.send(command).await.is_err() {
                        warn!("Audit writer stopped, entry dropped");
                    }
                });
            }
            Err(TrySendError::Closed(command)) => {
                if let WriterCommand::Append(entry) = command {
                    warn!(audit_id = %entry.id, video_id = %entry.video_id, "Audit writer stopped, entry dropped");
                }
            }
        }
    }

    /// Wait until every entry queued before this call has been handed to
    /// the store
    pub async fn flush(&self) {
        let (done, flushed) = oneshot::channel();
        if self.queue.send(WriterCommand::Flush(done)).await.is_err() {
            warn!("Audit writer stopped before flush");
            return;
        }
        if flushed.await.is_err() {
            warn!("Audit writer stopped during flush");
        }
    }

    /// Read matching entries back, re-verifying every checksum
    pub async fn investigate(&self, filter: &AuditFilter) -> Result<Investigation, AuditError> {
        let scan = self.store.scan(filter).await?;
        let entries = scan
            .entries
            .into_iter()
            .map(|entry| {
                let integrity = entry.verify();
                if integrity == Integrity::TamperSuspected {
                    warn!(audit_id = %entry.id, video_id = %entry.video_id, "Audit entry checksum mismatch");
                }
                InvestigatedEntry { entry, integrity }
            })
            .collect::<Vec<_>>();

        let investigation = Investigation {
            entries,
            unreadable: scan.unreadable,
        };
        info!(
            count = investigation.entries.len(),
            unreadable = investigation.unreadable.len(),
            tamper_suspected = investigation.tamper_suspected(),
            ?filter,
            "Audit investigation"
        );
        Ok(investigation)
    }
}

async fn write_entries(store: Arc<dyn AuditStore>, mut commands: mpsc::Receiver<WriterCommand>) {
    while let Some(command) = commands.recv().await {
        match command {
            WriterCommand::Append(entry) => {
                if let Err(error) = store.append(&entry).await {
                    warn!(audit_id = %entry.id, video_id = %entry.video_id, %error, "Audit write failed");
                }
            }
            WriterCommand::Flush(done) => {
                _ = done.send(());
            }
        }
    }
    debug!("Audit writer finished");
}
