//! Checksum utilities for batch and snapshot identification

use sha2::{Digest, Sha256};

/// Compute the SHA-256 digest of a byte slice as lowercase hex.
///
/// Used to tag load batches and staging snapshots so re-ingestions of the
/// same source content can be spotted in logs and reports.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_sha256_hex_empty() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_sha256_hex_differs_on_content() {
        assert_ne!(sha256_hex(b"batch-1"), sha256_hex(b"batch-2"));
    }
}
