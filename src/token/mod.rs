pub mod error;
mod header;
pub mod manager;
pub mod payload;
pub mod validator;

pub use error::TokenError;
pub use manager::TokenManager;
pub use payload::{AccessToken, EntitlementMode, Permission, Permissions};
pub use validator::{MAX_CLOCK_SKEW_SECS, TokenValidator};

use sha2::{Digest, Sha256};

/// Short stable identifier for a raw token, safe to log and to key
/// rate-limit windows with
pub fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..8])
}
