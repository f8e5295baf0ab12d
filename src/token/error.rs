use crate::token::payload::Permission;
use thiserror::Error;

/// Reasons an access token is refused by the validator
#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum TokenError {
    #[error("Malformed access token: {0}")]
    Malformed(String),

    #[error("Access token expired at {expires_at}")]
    Expired { expires_at: u64 },

    #[error("Access token does not grant the {0} permission")]
    PermissionDenied(Permission),
}

impl TokenError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        TokenError::Malformed(reason.into())
    }

    /// Machine-readable denial code surfaced to callers
    pub fn code(&self) -> &'static str {
        match self {
            TokenError::Malformed(_) => "MALFORMED_TOKEN",
            TokenError::Expired { .. } => "EXPIRED_TOKEN",
            TokenError::PermissionDenied(_) => "PERMISSION_DENIED",
        }
    }
}
