use crate::token::error::TokenError;
use crate::token::header::{HEADER_SIZE, TAG_SIZE, TokenHeader};
use crate::token::payload::AccessToken;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::{Result, anyhow};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use std::collections::HashMap;
use std::sync::Arc;

/// Key ring for sealing and opening access tokens.
///
/// The ring is fixed at startup. Tokens are sealed with the highest key id
/// and any key in the ring opens them, so a key is rotated by configuring a
/// higher kid next to the old one and restarting.
#[derive(Clone, Debug)]
pub struct TokenManager {
    keys: Arc<HashMap<u8, [u8; 32]>>,
    current_kid: u8,
}

impl TokenManager {
    /// Ring with a single random key under kid 1
    pub fn new() -> Self {
        let mut key = [0u8; 32];
        use rand::RngCore;
        rand::thread_rng().fill_bytes(&mut key);
        Self::with_key(1, key)
    }

    /// Build from configured keys, falling back to a random key when none
    /// are configured. The highest kid becomes the signing key.
    pub fn from_config(config_keys: Vec<(u8, [u8; 32])>) -> Self {
        let Some(newest_kid) = config_keys.iter().map(|(kid, _)| *kid).max() else {
            return Self::new();
        };

        Self {
            keys: Arc::new(HashMap::from_iter(config_keys)),
            current_kid: newest_kid,
        }
    }

    pub fn with_key(kid: u8, key: [u8; 32]) -> Self {
        Self {
            keys: Arc::new(HashMap::from([(kid, key)])),
            current_kid: kid,
        }
    }

    /// Key id used for newly sealed tokens
    pub fn current_kid(&self) -> u8 {
        self.current_kid
    }

    /// Seal a payload into a base64url token
    pub fn sign_token(&self, token: &AccessToken) -> Result<String> {
        let kid = self.current_kid;
        let key = self
            .keys
            .get(&kid)
            .ok_or_else(|| anyhow!("Key ID {kid} not found"))?;

        let header = TokenHeader::new(kid);
        let header_bytes = header.to_bytes();
        let payload_bytes = token.to_bytes()?;

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&header.nonce),
                Payload {
                    msg: &payload_bytes,
                    aad: &header_bytes,
                },
            )
            .map_err(|error| anyhow!("Encryption failed: {error}"))?;

        let mut token_bytes = header_bytes.to_vec();
        token_bytes.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(token_bytes))
    }

    /// Authenticate and decode a token. Only structure and cryptography are
    /// checked here; expiry and permissions are the validator's job.
    pub fn open_token(&self, token: &str) -> Result<AccessToken, TokenError> {
        let token_bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| TokenError::malformed("not base64url"))?;

        if token_bytes.len() < HEADER_SIZE + TAG_SIZE {
            return Err(TokenError::malformed("token too short"));
        }

        let header = TokenHeader::from_bytes(&token_bytes[..HEADER_SIZE])?;

        let key = self
            .keys
            .get(&header.kid)
            .ok_or_else(|| TokenError::malformed(format!("unknown key id {}", header.kid)))?;

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        let payload_bytes = cipher
            .decrypt(
                Nonce::from_slice(&header.nonce),
                Payload {
                    msg: &token_bytes[HEADER_SIZE..],
                    aad: &header.to_bytes(),
                },
            )
            .map_err(|_| TokenError::malformed("authentication failed"))?;

        AccessToken::from_bytes(&payload_bytes)
    }
}

impl Default for TokenManager {
    fn default() -> Self {
        Self::new()
    }
}
