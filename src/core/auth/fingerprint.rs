//! Device fingerprinting
//!
//! A fingerprint is a SHA-256 over the user agent, client IP and Accept-Language
//! of a request. It binds a refresh token to the device that received it. It is a
//! heuristic signal, not an authenticator.

use sha2::{Digest, Sha256};

/// Provenance of a request, as seen by the auth endpoints
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMetadata {
    pub ip_address: String,
    pub user_agent: String,
    pub accept_language: String,
}

impl RequestMetadata {
    pub fn new(
        ip_address: impl Into<String>,
        user_agent: impl Into<String>,
        accept_language: impl Into<String>,
    ) -> Self {
        Self {
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
            accept_language: accept_language.into(),
        }
    }

    /// Fingerprint of the device that sent this request
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.user_agent, &self.ip_address, &self.accept_language)
    }
}

/// Derive a stable device fingerprint. Missing inputs are passed as empty strings.
pub fn fingerprint(user_agent: &str, ip: &str, accept_language: &str) -> String {
    let mut hasher = Sha256::new();
    // Length prefixes keep ("ab", "c") and ("a", "bc") apart
    for part in [user_agent, ip, accept_language] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = fingerprint("Mozilla/5.0", "10.0.0.1", "en-US");
        let b = fingerprint("Mozilla/5.0", "10.0.0.1", "en-US");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_changes_with_each_input() {
        let base = fingerprint("Mozilla/5.0", "10.0.0.1", "en-US");

        assert_ne!(base, fingerprint("curl/8.0", "10.0.0.1", "en-US"));
        assert_ne!(base, fingerprint("Mozilla/5.0", "10.0.0.2", "en-US"));
        assert_ne!(base, fingerprint("Mozilla/5.0", "10.0.0.1", "de-DE"));
    }

    #[test]
    fn test_fingerprint_field_boundaries() {
        assert_ne!(fingerprint("ab", "c", ""), fingerprint("a", "bc", ""));
        assert_ne!(fingerprint("", "", "x"), fingerprint("x", "", ""));
    }

    #[test]
    fn test_fingerprint_empty_inputs() {
        let empty = fingerprint("", "", "");
        assert_eq!(empty.len(), 64);
        assert_eq!(empty, RequestMetadata::default().fingerprint());
    }

    #[test]
    fn test_metadata_fingerprint_matches_free_function() {
        let meta = RequestMetadata::new("192.168.1.7", "Firefox", "fr");
        assert_eq!(meta.fingerprint(), fingerprint("Firefox", "192.168.1.7", "fr"));
    }
}
