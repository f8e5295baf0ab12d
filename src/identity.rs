//! Bearer credentials attributing a request to a subject.
//!
//! A credential is `base64url(subject).expires_at.hex(hmac_sha256)` with the
//! MAC taken over the first two dot-separated parts.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Malformed credential")]
    Malformed,

    #[error("Credential signature mismatch")]
    BadSignature,

    #[error("Credential expired at {0}")]
    Expired(u64),

    #[error("Bearer credentials are not accepted")]
    Disabled,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Subject proven by `credential`
    async fn verify(&self, credential: &str, now_unix: u64) -> Result<String, IdentityError>;
}

/// Rejects every credential
pub struct DisabledIdentityProvider;

#[async_trait]
impl IdentityProvider for DisabledIdentityProvider {
    async fn verify(&self, _: &str, _: u64) -> Result<String, IdentityError> {
        Err(IdentityError::Disabled)
    }
}

pub struct HmacIdentityProvider {
    secret: Vec<u8>,
}

impl HmacIdentityProvider {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn mac(&self, signed: &str) -> Result<HmacSha256, IdentityError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| IdentityError::Disabled)?;
        mac.update(signed.as_bytes());
        Ok(mac)
    }

    pub fn issue(&self, subject_id: &str, expires_at: u64) -> Result<String, IdentityError> {
        let signed = format!("{}.{expires_at}", URL_SAFE_NO_PAD.encode(subject_id));
        let tag = self.mac(&signed)?.finalize().into_bytes();
        Ok(format!("{signed}.{}", hex::encode(tag)))
    }
}

#[async_trait]
impl IdentityProvider for HmacIdentityProvider {
    async fn verify(&self, credential: &str, now_unix: u64) -> Result<String, IdentityError> {
        let (signed, signature) = credential.rsplit_once('.').ok_or(IdentityError::Malformed)?;
        let (subject, expires_at) = signed.split_once('.').ok_or(IdentityError::Malformed)?;

        let signature = hex::decode(signature).map_err(|_| IdentityError::Malformed)?;
        self.mac(signed)?
            .verify_slice(&signature)
            .map_err(|_| IdentityError::BadSignature)?;

        let expires_at = expires_at
            .parse::<u64>()
            .map_err(|_| IdentityError::Malformed)?;
        if now_unix >= expires_at {
            return Err(IdentityError::Expired(expires_at));
        }

        let subject = URL_SAFE_NO_PAD
            .decode(subject)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .filter(|subject| !subject.is_empty())
            .ok_or(IdentityError::Malformed)?;
        Ok(subject)
    }
}
