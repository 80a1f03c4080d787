//! Secure token caching (§4.5 "Token caching is a specialization").

use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCategory {
    AppTokens,
    UserTokens,
}

impl TokenCategory {
    pub fn into_cache_category(self) -> super::Category {
        match self {
            TokenCategory::AppTokens => super::Category::AppTokens,
            TokenCategory::UserTokens => super::Category::UserTokens,
        }
    }
}

/// `(plaintext, expiresAt, checksum, encryptedBlob?)` (§3). The checksum is
/// recomputed on every retrieval; a mismatch is corruption, treated as a
/// cache miss with eviction rather than propagated as a hard error, so a
/// caller simply re-fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecureToken {
    pub plaintext: String,
    #[serde(skip, default = "Instant::now")]
    pub expires_at_instant: Instant,
    pub checksum: u64,
    pub encrypted_blob: Option<Vec<u8>>,
}

impl SecureToken {
    pub fn new(plaintext: impl Into<String>, ttl: std::time::Duration) -> Self {
        let plaintext = plaintext.into();
        let checksum = Self::compute_checksum(&plaintext);
        Self {
            plaintext,
            expires_at_instant: Instant::now() + ttl,
            checksum,
            encrypted_blob: None,
        }
    }

    fn compute_checksum(plaintext: &str) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        plaintext.hash(&mut hasher);
        hasher.finish()
    }

    /// Returns `None` on checksum mismatch — the caller should treat this
    /// exactly like a miss and evict the entry.
    pub fn verify(&self) -> Option<&str> {
        if Self::compute_checksum(&self.plaintext) == self.checksum {
            Some(&self.plaintext)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_mismatch_is_detected() {
        let mut token = SecureToken::new("t-abc", std::time::Duration::from_secs(60));
        assert!(token.verify().is_some());
        token.checksum = token.checksum.wrapping_add(1);
        assert!(token.verify().is_none());
    }
}
