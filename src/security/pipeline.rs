use crate::security::checks::{
    EntitlementCheck, RateLimitCheck, ResourceAvailability, SecurityCheck, SubjectConsistency,
    TokenBinding,
};
use crate::security::context::AccessContext;
use crate::security::rate_limit::SlidingWindowLimiter;
use crate::security::violation::Violation;
use tracing::debug;

/// Ordered checks, stopping at the first failure
pub struct SecurityPipeline {
    checks: Vec<Box<dyn SecurityCheck>>,
}

impl SecurityPipeline {
    pub fn new(checks: Vec<Box<dyn SecurityCheck>>) -> Self {
        Self { checks }
    }

    /// Binding, availability, entitlement, rate limit, then subject
    /// consistency
    pub fn standard(limiter: SlidingWindowLimiter) -> Self {
        Self::new(vec![
            Box::new(TokenBinding),
            Box::new(ResourceAvailability),
            Box::new(EntitlementCheck),
            Box::new(RateLimitCheck::new(limiter)),
            Box::new(SubjectConsistency),
        ])
    }

    pub fn check_names(&self) -> Vec<&'static str> {
        self.checks.iter().map(|check| check.name()).collect()
    }

    pub fn evaluate(&self, ctx: &AccessContext) -> Result<(), Violation> {
        for check in &self.checks {
            if let Err(violation) = check.check(ctx) {
                debug!(
                    request_id = %ctx.request_id,
                    check = check.name(),
                    violation = %violation.kind(),
                    "Security check failed"
                );
                return Err(violation);
            }
        }
        Ok(())
    }
}
