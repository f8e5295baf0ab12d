use crate::security::{Severity, ViolationKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    AccessGranted,
    AccessDenied,
    SecurityViolation,
}

/// Request details captured with each decision
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditContext {
    pub request_id: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    pub violation: Option<ViolationKind>,
    pub severity: Option<Severity>,
    /// Machine-readable outcome code, e.g. `EXPIRED_TOKEN`
    pub code: Option<String>,
    pub status: Option<u16>,
}

/// Everything about a decision except what the logger stamps on it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditDraft {
    pub kind: AuditKind,
    pub subject_id: Option<String>,
    pub video_id: String,
    pub context: AuditContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: AuditKind,
    pub subject_id: Option<String>,
    pub video_id: String,
    pub context: AuditContext,
    pub requires_investigation: bool,
    pub checksum: String,
}

/// Field set covered by the checksum, in a fixed order
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Canonical<'a> {
    id: &'a Uuid,
    timestamp_ms: i64,
    kind: AuditKind,
    subject_id: Option<&'a str>,
    video_id: &'a str,
    context: &'a AuditContext,
    requires_investigation: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Integrity {
    Intact,
    TamperSuspected,
}

impl AuditEntry {
    /// Stamp id, timestamp and triage flag onto `draft` and seal it
    pub fn seal(draft: AuditDraft, now: DateTime<Utc>) -> Self {
        // Stored with millisecond precision so the persisted form hashes
        // the same as the in-memory one
        let timestamp = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
        let requires_investigation = draft
            .context
            .severity
            .is_some_and(Severity::requires_investigation);

        let mut entry = Self {
            id: Uuid::new_v4(),
            timestamp,
            kind: draft.kind,
            subject_id: draft.subject_id,
            video_id: draft.video_id,
            context: draft.context,
            requires_investigation,
            checksum: String::new(),
        };
        entry.checksum = entry.compute_checksum();
        entry
    }

    pub fn compute_checksum(&self) -> String {
        let canonical = Canonical {
            id: &self.id,
            timestamp_ms: self.timestamp.timestamp_millis(),
            kind: self.kind,
            subject_id: self.subject_id.as_deref(),
            video_id: &self.video_id,
            context: &self.context,
            requires_investigation: self.requires_investigation,
        };
        let json = serde_json::to_vec(&canonical).unwrap_or_default();
        hex::encode(Sha256::digest(&json))
    }

    pub fn verify(&self) -> Integrity {
        if self.compute_checksum() == self.checksum {
            Integrity::Intact
        } else {
            Integrity::TamperSuspected
        }
    }
}
