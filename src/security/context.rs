use crate::entitlement::Entitlement;
use crate::storage::VideoRecord;
use crate::token::AccessToken;
use chrono::{DateTime, Utc};
use std::time::Instant;

/// Connection details used for rate limiting and the audit trail
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
}

/// Immutable view of one request, built after token validation and passed
/// to every check. Lives exactly as long as the request.
#[derive(Debug, Clone)]
pub struct AccessContext {
    pub request_id: String,
    pub token: AccessToken,
    /// Safe-to-log stand-in for the raw token
    pub token_fingerprint: String,
    pub video: VideoRecord,
    pub entitlement: Entitlement,
    /// Subject proven by a bearer credential, if one was presented
    pub authenticated_subject: Option<String>,
    pub client: ClientInfo,
    pub now: DateTime<Utc>,
    pub at: Instant,
}

impl AccessContext {
    /// Rate-limit window key: the token, narrowed by client address
    pub fn rate_limit_key(&self) -> String {
        match &self.client.ip {
            Some(ip) => format!("{}@{ip}", self.token_fingerprint),
            None => self.token_fingerprint.clone(),
        }
    }

    /// Subject to attribute the request to, preferring the proven one
    pub fn subject_id(&self) -> Option<&str> {
        self.authenticated_subject
            .as_deref()
            .or(self.token.subject_id.as_deref())
    }
}
