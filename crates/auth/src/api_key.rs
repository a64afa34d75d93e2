//! API keys.
//!
//! A key is shown to its owner once, at creation. Only a short display prefix
//! and a keyed SHA-256 digest (HMAC with a process-wide pepper) are stored, so
//! lookups go by digest and the raw value cannot be recovered from the store.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::Serialize;
use sha2::Sha256;

use forgecrm_core::{ApiKeyId, UserId};

/// Every raw key starts with this marker.
pub const API_KEY_PREFIX: &str = "fcrm_";

/// Characters of the raw key kept for display (marker included).
const DISPLAY_PREFIX_LEN: usize = 12;

const KEY_BYTES: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// A stored API key record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiKey {
    pub id: ApiKeyId,
    pub user_id: UserId,
    pub name: String,
    pub prefix: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Insert payload for a new key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewApiKey {
    pub user_id: UserId,
    pub name: String,
    pub prefix: String,
    pub key_hash: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A freshly created key together with its raw value.
///
/// The only place the raw value ever exists outside the caller's hands.
#[derive(Clone)]
pub struct IssuedApiKey {
    pub key: ApiKey,
    pub raw: String,
}

impl core::fmt::Debug for IssuedApiKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IssuedApiKey")
            .field("key", &self.key)
            .field("raw", &"<redacted>")
            .finish()
    }
}

/// Keyed digest of raw API keys.
#[derive(Clone)]
pub struct ApiKeyHasher {
    mac: HmacSha256,
}

impl ApiKeyHasher {
    pub fn new(pepper: &[u8]) -> Result<Self, hmac::digest::InvalidLength> {
        Ok(Self {
            mac: HmacSha256::new_from_slice(pepper)?,
        })
    }

    /// Hex digest of `raw`; identical inputs always give identical digests.
    pub fn hash(&self, raw: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(raw.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

impl core::fmt::Debug for ApiKeyHasher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ApiKeyHasher").finish_non_exhaustive()
    }
}

/// Generate a new raw key from the OS random source.
pub fn generate_raw_key() -> String {
    let mut bytes = [0u8; KEY_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    format!("{API_KEY_PREFIX}{}", hex::encode(bytes))
}

/// The display prefix stored next to the digest.
pub fn display_prefix(raw: &str) -> String {
    raw.chars().take(DISPLAY_PREFIX_LEN).collect()
}
