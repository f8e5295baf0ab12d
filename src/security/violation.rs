use crate::entitlement::Tier;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Violation categories reported to callers and the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    UnauthorizedAccess,
    ExpiredUrl,
    InvalidSubscription,
    RateLimitExceeded,
    SessionMismatch,
}

impl ViolationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationKind::UnauthorizedAccess => "unauthorized_access",
            ViolationKind::ExpiredUrl => "expired_url",
            ViolationKind::InvalidSubscription => "invalid_subscription",
            ViolationKind::RateLimitExceeded => "rate_limit_exceeded",
            ViolationKind::SessionMismatch => "session_mismatch",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// High and critical violations are flagged for operational triage
    pub fn requires_investigation(self) -> bool {
        self >= Severity::High
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What made a check fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialCause {
    TokenVideoMismatch { token_video_id: String },
    VideoInactive,
    LinkExpired,
    TierTooLow { required: Tier, actual: Tier },
    TooManyRequests { retry_after: Duration },
    SubjectMismatch,
}

/// A failed security check. Kind, severity and response code all derive
/// from the cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub check: &'static str,
    pub cause: DenialCause,
}

impl Violation {
    pub fn new(check: &'static str, cause: DenialCause) -> Self {
        Self { check, cause }
    }

    pub fn kind(&self) -> ViolationKind {
        match self.cause {
            DenialCause::TokenVideoMismatch { .. } => ViolationKind::UnauthorizedAccess,
            DenialCause::VideoInactive | DenialCause::LinkExpired => ViolationKind::ExpiredUrl,
            DenialCause::TierTooLow { .. } => ViolationKind::InvalidSubscription,
            DenialCause::TooManyRequests { .. } => ViolationKind::RateLimitExceeded,
            DenialCause::SubjectMismatch => ViolationKind::SessionMismatch,
        }
    }

    pub fn severity(&self) -> Severity {
        match self.cause {
            DenialCause::TokenVideoMismatch { .. } | DenialCause::SubjectMismatch => Severity::High,
            DenialCause::TierTooLow { .. } | DenialCause::TooManyRequests { .. } => {
                Severity::Medium
            }
            DenialCause::VideoInactive | DenialCause::LinkExpired => Severity::Low,
        }
    }

    pub fn code(&self) -> &'static str {
        match self.cause {
            DenialCause::TokenVideoMismatch { .. } => "BINDING_MISMATCH",
            DenialCause::VideoInactive | DenialCause::LinkExpired => "RESOURCE_UNAVAILABLE",
            DenialCause::TierTooLow { .. } => "ENTITLEMENT_INSUFFICIENT",
            DenialCause::TooManyRequests { .. } => "RATE_LIMITED",
            DenialCause::SubjectMismatch => "SESSION_MISMATCH",
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self.cause {
            DenialCause::TooManyRequests { retry_after } => Some(retry_after),
            _ => None,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            DenialCause::TokenVideoMismatch { token_video_id } => {
                write!(f, "Token is bound to video {token_video_id}")
            }
            DenialCause::VideoInactive => f.write_str("Video is not active"),
            DenialCause::LinkExpired => f.write_str("Video link has expired"),
            DenialCause::TierTooLow { required, actual } => {
                write!(f, "Subscription tier {actual} does not satisfy {required}")
            }
            DenialCause::TooManyRequests { retry_after } => {
                write!(f, "Too many requests, retry after {}s", retry_after.as_secs())
            }
            DenialCause::SubjectMismatch => {
                f.write_str("Authenticated subject does not match token subject")
            }
        }
    }
}

impl std::error::Error for Violation {}
