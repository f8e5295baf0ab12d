use crate::token::error::TokenError;

pub(crate) const MAGIC: &[u8; 4] = b"VAT1";
pub(crate) const VERSION: u8 = 1;
pub(crate) const ALG_AES_256_GCM: u8 = 1;

// magic(4) + ver(1) + kid(1) + alg(1) + rsv(1) + nonce(12)
pub(crate) const HEADER_SIZE: usize = 20;
pub(crate) const TAG_SIZE: usize = 16;

/// Plaintext token header, authenticated as AEAD associated data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TokenHeader {
    pub kid: u8,
    pub alg: u8,
    pub nonce: [u8; 12],
}

impl TokenHeader {
    pub fn new(kid: u8) -> Self {
        let mut nonce = [0u8; 12];
        use rand::RngCore;
        rand::thread_rng().fill_bytes(&mut nonce);

        Self {
            kid,
            alg: ALG_AES_256_GCM,
            nonce,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(MAGIC);
        bytes[4] = VERSION;
        bytes[5] = self.kid;
        bytes[6] = self.alg;
        bytes[7] = 0;
        bytes[8..20].copy_from_slice(&self.nonce);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TokenError> {
        if bytes.len() < HEADER_SIZE {
            return Err(TokenError::malformed("header too short"));
        }
        if &bytes[0..4] != MAGIC {
            return Err(TokenError::malformed("bad magic"));
        }
        if bytes[4] != VERSION {
            return Err(TokenError::malformed(format!(
                "unsupported version {}",
                bytes[4]
            )));
        }
        let alg = bytes[6];
        if alg != ALG_AES_256_GCM {
            return Err(TokenError::malformed(format!("unsupported algorithm {alg}")));
        }

        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&bytes[8..20]);

        Ok(Self {
            kid: bytes[5],
            alg,
            nonce,
        })
    }
}
