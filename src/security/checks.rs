use crate::entitlement::Tier;
use crate::security::context::AccessContext;
use crate::security::rate_limit::SlidingWindowLimiter;
use crate::security::violation::{DenialCause, Violation};

/// One predicate over an [`AccessContext`]
pub trait SecurityCheck: Send + Sync {
    fn name(&self) -> &'static str;

    fn check(&self, ctx: &AccessContext) -> Result<(), Violation>;
}

/// The token must be bound to the requested video
pub struct TokenBinding;

impl SecurityCheck for TokenBinding {
    fn name(&self) -> &'static str {
        "token_binding"
    }

    fn check(&self, ctx: &AccessContext) -> Result<(), Violation> {
        if ctx.token.video_id == ctx.video.id {
            return Ok(());
        }
        Err(Violation::new(
            self.name(),
            DenialCause::TokenVideoMismatch {
                token_video_id: ctx.token.video_id.clone(),
            },
        ))
    }
}

/// The video must be active and its link unexpired
pub struct ResourceAvailability;

impl SecurityCheck for ResourceAvailability {
    fn name(&self) -> &'static str {
        "resource_availability"
    }

    fn check(&self, ctx: &AccessContext) -> Result<(), Violation> {
        if !ctx.video.is_active {
            return Err(Violation::new(self.name(), DenialCause::VideoInactive));
        }
        if let Some(cutoff) = ctx.video.link_expires_at
            && ctx.now >= cutoff
        {
            return Err(Violation::new(self.name(), DenialCause::LinkExpired));
        }
        Ok(())
    }
}

/// Resolved tier must satisfy the video's requirement. Owners always pass;
/// public videos require nothing beyond the free tier.
pub struct EntitlementCheck;

impl SecurityCheck for EntitlementCheck {
    fn name(&self) -> &'static str {
        "entitlement"
    }

    fn check(&self, ctx: &AccessContext) -> Result<(), Violation> {
        if ctx.subject_id() == Some(ctx.video.owner_id.as_str()) {
            return Ok(());
        }

        let required = if ctx.video.is_public {
            Tier::Free
        } else {
            ctx.video.tier_required
        };
        if ctx.entitlement.tier.satisfies(required) {
            return Ok(());
        }

        Err(Violation::new(
            self.name(),
            DenialCause::TierTooLow {
                required,
                actual: ctx.entitlement.tier,
            },
        ))
    }
}

pub struct RateLimitCheck {
    limiter: SlidingWindowLimiter,
}

impl RateLimitCheck {
    pub fn new(limiter: SlidingWindowLimiter) -> Self {
        Self { limiter }
    }
}

impl SecurityCheck for RateLimitCheck {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn check(&self, ctx: &AccessContext) -> Result<(), Violation> {
        self.limiter
            .check(&ctx.rate_limit_key(), ctx.at)
            .map_err(|retry_after| {
                Violation::new(self.name(), DenialCause::TooManyRequests { retry_after })
            })
    }
}

/// A bearer-proven subject must match the token's subject when both exist
pub struct SubjectConsistency;

impl SecurityCheck for SubjectConsistency {
    fn name(&self) -> &'static str {
        "subject_consistency"
    }

    fn check(&self, ctx: &AccessContext) -> Result<(), Violation> {
        match (&ctx.authenticated_subject, &ctx.token.subject_id) {
            (Some(proven), Some(claimed)) if proven != claimed => {
                Err(Violation::new(self.name(), DenialCause::SubjectMismatch))
            }
            _ => Ok(()),
        }
    }
}
