use std::fmt;

use sha2::{Digest, Sha256};

/// Hex encoded SHA-256 digest of a submitted document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_bytes_share_a_fingerprint() {
        let a = Fingerprint::of(b"# Title\n- a\n- b");
        let b = Fingerprint::of(b"# Title\n- a\n- b");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn single_byte_difference_changes_fingerprint() {
        let a = Fingerprint::of(b"# Title\n- a\n- b");
        let b = Fingerprint::of(b"# Title\n- a\n- c");
        assert_ne!(a, b);
    }

    #[test]
    fn known_digest() {
        assert_eq!(
            Fingerprint::of(b"").as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
