//! Content fingerprinting for the score cache.

use sha2::{Digest, Sha256};

/// SHA-256 hex digest of the raw (pre-redaction) message text.
///
/// Used as the content component of the score-cache key; the cache scopes it
/// per (group, sender) so identical text in different conversations does not
/// collide.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        assert_eq!(fingerprint("hello"), fingerprint("hello"));
        assert_ne!(fingerprint("hello"), fingerprint("hello!"));
    }

    #[test]
    fn hex_encoded_sha256() {
        let fp = fingerprint("");
        assert_eq!(fp.len(), 64);
        assert_eq!(
            fp,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
