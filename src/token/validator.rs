use crate::entitlement::{
    Entitlement, EntitlementError, EntitlementResolver, EntitlementSource, Freshness,
};
use crate::token::error::TokenError;
use crate::token::manager::TokenManager;
use crate::token::payload::{AccessToken, EntitlementMode, Permission};

/// Tolerated clock drift for `issued_at` lying in the future
pub const MAX_CLOCK_SKEW_SECS: u64 = 60;

/// Access Token Validator.
///
/// [`TokenValidator::validate`] is a pure check: it performs no I/O and
/// records nothing. Callers log the outcome.
#[derive(Clone)]
pub struct TokenValidator {
    manager: TokenManager,
    resolver: EntitlementResolver,
}

impl TokenValidator {
    pub fn new(manager: TokenManager, resolver: EntitlementResolver) -> Self {
        Self { manager, resolver }
    }

    pub fn manager(&self) -> &TokenManager {
        &self.manager
    }

    /// Check structure, expiry and permission, in that order. An expired
    /// token is reported as expired whatever else it carries.
    pub fn validate(
        &self,
        token: &str,
        required: Permission,
        now_unix: u64,
    ) -> Result<AccessToken, TokenError> {
        let decoded = self.manager.open_token(token)?;

        if decoded.is_expired_at(now_unix) {
            return Err(TokenError::Expired {
                expires_at: decoded.expires_at,
            });
        }
        if decoded.issued_at > now_unix.saturating_add(MAX_CLOCK_SKEW_SECS) {
            return Err(TokenError::malformed("issued in the future"));
        }
        if !decoded.permissions.allows(required) {
            return Err(TokenError::PermissionDenied(required));
        }

        Ok(decoded)
    }

    /// Entitlement governing a validated token. Snapshot tokens carry their
    /// tier; live tokens consult the resolver.
    pub async fn entitlement(&self, token: &AccessToken) -> Result<Entitlement, EntitlementError> {
        match token.entitlement {
            EntitlementMode::Snapshot(tier) => Ok(Entitlement {
                subject_id: token.subject_id.clone(),
                tier,
                source: EntitlementSource::Snapshot,
            }),
            EntitlementMode::Live => {
                self.resolver
                    .entitlement_for(token.subject_id.as_deref(), Freshness::Cached)
                    .await
            }
        }
    }
}
