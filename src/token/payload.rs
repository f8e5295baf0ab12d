use crate::entitlement::Tier;
use crate::token::error::TokenError;
use serde::{Deserialize, Serialize};
use std::fmt;

const PERM_STREAM: u8 = 0b01;
const PERM_DOWNLOAD: u8 = 0b10;
const ENTITLEMENT_LIVE: u8 = 0;

/// A single permission a request can require from a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Stream,
    Download,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Stream => f.write_str("stream"),
            Permission::Download => f.write_str("download"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    pub can_stream: bool,
    pub can_download: bool,
}

impl Permissions {
    pub fn allows(&self, permission: Permission) -> bool {
        match permission {
            Permission::Stream => self.can_stream,
            Permission::Download => self.can_download,
        }
    }

    fn to_bits(self) -> u8 {
        let mut bits = 0;
        if self.can_stream {
            bits |= PERM_STREAM;
        }
        if self.can_download {
            bits |= PERM_DOWNLOAD;
        }
        bits
    }

    fn from_bits(bits: u8) -> Result<Self, TokenError> {
        if bits & !(PERM_STREAM | PERM_DOWNLOAD) != 0 {
            return Err(TokenError::malformed("unknown permission bits"));
        }
        Ok(Self {
            can_stream: bits & PERM_STREAM != 0,
            can_download: bits & PERM_DOWNLOAD != 0,
        })
    }
}

/// How the entitlement for a token is established at access time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "tier")]
pub enum EntitlementMode {
    /// Tier captured when the token was issued
    Snapshot(Tier),
    /// Ask the entitlement resolver on every access
    Live,
}

/// Decoded access token payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    /// `None` for anonymous grants
    pub subject_id: Option<String>,
    pub video_id: String,
    pub permissions: Permissions,
    pub entitlement: EntitlementMode,
    /// Unix seconds
    pub issued_at: u64,
    /// Unix seconds
    pub expires_at: u64,
}

impl AccessToken {
    pub fn is_expired_at(&self, now_unix: u64) -> bool {
        now_unix >= self.expires_at
    }

    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>, TokenError> {
        let mut bytes = Vec::with_capacity(32 + self.video_id.len());

        bytes.extend_from_slice(&self.issued_at.to_le_bytes());
        bytes.extend_from_slice(&self.expires_at.to_le_bytes());
        bytes.push(self.permissions.to_bits());
        bytes.push(match self.entitlement {
            EntitlementMode::Live => ENTITLEMENT_LIVE,
            EntitlementMode::Snapshot(tier) => tier.code(),
        });

        if self.video_id.is_empty() {
            return Err(TokenError::malformed("empty video id"));
        }
        push_short_str(&mut bytes, &self.video_id, "video id")?;

        match &self.subject_id {
            Some(subject) if subject.is_empty() => {
                return Err(TokenError::malformed("empty subject id"));
            }
            Some(subject) => push_short_str(&mut bytes, subject, "subject id")?,
            None => bytes.push(0),
        }

        Ok(bytes)
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self, TokenError> {
        let mut cursor = Cursor { bytes, offset: 0 };

        let issued_at = cursor.u64()?;
        let expires_at = cursor.u64()?;
        let permissions = Permissions::from_bits(cursor.u8()?)?;
        let entitlement = match cursor.u8()? {
            ENTITLEMENT_LIVE => EntitlementMode::Live,
            code => EntitlementMode::Snapshot(
                Tier::from_code(code).ok_or_else(|| TokenError::malformed("unknown tier"))?,
            ),
        };

        let video_id = cursor.short_str()?;
        if video_id.is_empty() {
            return Err(TokenError::malformed("empty video id"));
        }
        let subject = cursor.short_str()?;

        if cursor.offset != bytes.len() {
            return Err(TokenError::malformed("trailing payload bytes"));
        }

        Ok(Self {
            subject_id: (!subject.is_empty()).then_some(subject),
            video_id,
            permissions,
            entitlement,
            issued_at,
            expires_at,
        })
    }
}

fn push_short_str(bytes: &mut Vec<u8>, value: &str, what: &str) -> Result<(), TokenError> {
    let raw = value.as_bytes();
    let len = u8::try_from(raw.len()).map_err(|_| TokenError::malformed(format!("{what} too long")))?;
    bytes.push(len);
    bytes.extend_from_slice(raw);
    Ok(())
}

struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl Cursor<'_> {
    fn take(&mut self, len: usize) -> Result<&[u8], TokenError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| TokenError::malformed("truncated payload"))?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, TokenError> {
        Ok(self.take(1)?[0])
    }

    fn u64(&mut self) -> Result<u64, TokenError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn short_str(&mut self) -> Result<String, TokenError> {
        let len = self.u8()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| TokenError::malformed("invalid utf-8"))
    }
}
