//! Cache key composition.
//!
//! Keys are composed of a resource identifier plus, for query-shaped
//! lookups, a fingerprint of the query parameters so distinct queries
//! never collide on one key.

use sha2::{Digest, Sha256};

/// Build a stable fingerprint for a query-shaped cache key.
///
/// The parts are joined and hashed; equal part sequences always produce the
/// same fingerprint.
pub fn query_fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0u8]);
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable() {
        let a = query_fingerprint(&["project = X", "50"]);
        let b = query_fingerprint(&["project = X", "50"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_distinguishes_parts() {
        // The separator prevents ["ab", "c"] and ["a", "bc"] colliding.
        assert_ne!(
            query_fingerprint(&["ab", "c"]),
            query_fingerprint(&["a", "bc"])
        );
        assert_ne!(
            query_fingerprint(&["project = X", "50"]),
            query_fingerprint(&["project = X", "10"])
        );
    }
}
