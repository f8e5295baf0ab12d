pub mod internal;
pub mod middleware;
pub mod stream;

pub use internal::{
    AuditReport, EntitlementReport, IssueTokenRequest, IssueTokenResponse, health,
    inspect_entitlement, investigate_audit, issue_token,
};
pub use middleware::log_request_errors;
pub use stream::{ACCESS_TOKEN_HEADER, SESSION_HEADER, StreamQuery, stream_video};
