//! Security check pipeline.
//!
//! Checks are pure predicates over an [`AccessContext`]; the only state
//! behind them is the rate limiter's window store.

pub mod checks;
pub mod context;
pub mod pipeline;
pub mod rate_limit;
pub mod violation;

pub use checks::SecurityCheck;
pub use context::{AccessContext, ClientInfo};
pub use pipeline::SecurityPipeline;
pub use rate_limit::SlidingWindowLimiter;
pub use violation::{DenialCause, Severity, Violation, ViolationKind};
