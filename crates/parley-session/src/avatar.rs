//! Avatar tokens and the avatar requirements advertised to hosts.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use sha1::{Digest, Sha1};

/// Raw avatar image as carried in a vCard photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarData {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl AvatarData {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    /// Token identifying this image.
    pub fn token(&self) -> String {
        avatar_token(&self.bytes)
    }
}

/// Lowercase hex SHA-1 of the image, matching the hash advertised in
/// `vcard-temp:x:update` presence.
pub fn avatar_token(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Constraints on avatars we accept for our own vCard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvatarSpec {
    pub mime_types: Vec<String>,
    pub min_width: u32,
    pub min_height: u32,
    pub recommended_width: u32,
    pub recommended_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub max_bytes: u32,
}

impl Default for AvatarSpec {
    fn default() -> Self {
        Self {
            mime_types: vec!["image/png".to_string(), "image/jpeg".to_string()],
            min_width: 0,
            min_height: 0,
            recommended_width: 256,
            recommended_height: 256,
            max_width: 512,
            max_height: 512,
            max_bytes: 1024 * 1024,
        }
    }
}

/// Known avatar tokens per contact identity.
#[derive(Debug, Default)]
pub struct AvatarTokens {
    tokens: DashMap<String, String>,
    own_vcard_fetched: AtomicBool,
}

impl AvatarTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a token, returning `true` if it differs from the known one.
    pub fn update(&self, identity: &str, token: &str) -> bool {
        match self.tokens.insert(identity.to_string(), token.to_string()) {
            Some(previous) => previous != token,
            None => true,
        }
    }

    pub fn token(&self, identity: &str) -> Option<String> {
        self.tokens.get(identity).map(|t| t.value().clone())
    }

    pub fn mark_own_vcard_fetched(&self) {
        self.own_vcard_fetched.store(true, Ordering::Release);
    }

    pub fn own_vcard_fetched(&self) -> bool {
        self.own_vcard_fetched.load(Ordering::Acquire)
    }

    /// Forget per-connection state.
    pub fn reset(&self) {
        self.own_vcard_fetched.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avatar_token_is_hex_sha1() {
        assert_eq!(avatar_token(b""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(avatar_token(b"abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn test_avatar_spec_defaults() {
        let spec = AvatarSpec::default();
        assert_eq!(spec.max_width, 512);
        assert_eq!(spec.recommended_height, 256);
        assert_eq!(spec.max_bytes, 1_048_576);
        assert!(spec.mime_types.contains(&"image/jpeg".to_string()));
    }

    #[test]
    fn test_token_update_reports_changes() {
        let tokens = AvatarTokens::new();
        assert!(tokens.update("alice@example.com", "aaaa"));
        assert!(!tokens.update("alice@example.com", "aaaa"));
        assert!(tokens.update("alice@example.com", "bbbb"));
        assert_eq!(tokens.token("alice@example.com").as_deref(), Some("bbbb"));
    }
}
