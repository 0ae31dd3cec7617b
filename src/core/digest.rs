//! Content fingerprinting
//!
//! Every digest is tagged with its algorithm (`sha256:<hex>`) so recorded
//! values stay comparable if the algorithm ever changes.

use sha2::{Digest, Sha256};

/// Algorithm tag prefixed to every digest string
pub const ALGORITHM: &str = "sha256";

/// Digest and byte length of one piece of content
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    /// Tagged digest, e.g. `sha256:9f86d0...`
    pub digest: String,
    /// Length of the hashed bytes
    pub size: u64,
}

impl Fingerprint {
    /// Fingerprint a byte slice
    ///
    /// # Examples
    ///
    /// ```
    /// use codex_cartridge::Fingerprint;
    ///
    /// let fp = Fingerprint::of(b"test");
    /// assert_eq!(fp.size, 4);
    /// assert!(fp.digest.starts_with("sha256:"));
    /// assert_eq!(fp, Fingerprint::of(b"test"));
    /// ```
    pub fn of(bytes: &[u8]) -> Self {
        Fingerprint {
            digest: tagged_sha256(bytes),
            size: bytes.len() as u64,
        }
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} bytes)", self.digest, self.size)
    }
}

/// `sha256:<hex>` of the given bytes
pub fn tagged_sha256(bytes: &[u8]) -> String {
    format!("{}:{}", ALGORITHM, hex::encode(Sha256::digest(bytes)))
}

/// Check that a recorded digest is well-formed (`sha256:` + 64 lowercase hex)
pub fn is_well_formed(digest: &str) -> bool {
    match digest.split_once(':') {
        Some((ALGORITHM, hex)) => {
            hex.len() == 64 && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        }
        _ => false,
    }
}
