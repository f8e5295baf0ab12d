//! Tamper-evident audit trail.
//!
//! Every access decision becomes one [`AuditEntry`] sealed with a SHA-256
//! checksum over its canonical JSON. Stores only ever append.

pub mod entry;
pub mod logger;
pub mod store;

pub use entry::{AuditContext, AuditDraft, AuditEntry, AuditKind, Integrity};
pub use logger::{AUDIT_QUEUE_DEPTH, AuditLogger, InvestigatedEntry, Investigation};
pub use store::{
    AuditError, AuditFilter, AuditScan, AuditStore, JsonlAuditStore, MemoryAuditStore,
    UnreadableLine,
};
