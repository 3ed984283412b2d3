//! Consistent-hash ring used to pick the owner of a key.
//!
//! Every endpoint is placed on the ring at `replicas` virtual points. A key
//! belongs to the first point at or after its own hash, wrapping around at the
//! end. Hashes are the leading 8 bytes of SHA-256 so that two nodes built from
//! different toolchains still agree on ownership.

use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Virtual points per endpoint when none is configured.
pub const DEFAULT_REPLICAS: usize = 50;

/// Immutable consistent-hash ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRing {
    /// Sorted `(point hash, index into endpoints)` pairs.
    points: Vec<(u64, usize)>,
    endpoints: Vec<String>,
    replicas: usize,
}

impl HashRing {
    /// Build a ring from a set of endpoints.
    ///
    /// Duplicate endpoints are collapsed and placement does not depend on the
    /// order they are supplied in.
    pub fn new<I, S>(endpoints: I, replicas: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let replicas = replicas.max(1);
        let endpoints: Vec<String> = endpoints
            .into_iter()
            .map(Into::into)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut points = Vec::with_capacity(endpoints.len() * replicas);
        for (idx, endpoint) in endpoints.iter().enumerate() {
            for replica in 0..replicas {
                let point = hash64(format!("{}{}", replica, endpoint).as_bytes());
                points.push((point, idx));
            }
        }
        // Ties on the hash are broken by endpoint order so the ring stays total.
        points.sort_unstable();

        Self {
            points,
            endpoints,
            replicas,
        }
    }

    /// Owner of `key`, or `None` for an empty ring.
    pub fn owner(&self, key: &str) -> Option<&str> {
        if self.points.is_empty() {
            return None;
        }
        let hash = hash64(key.as_bytes());
        let idx = self.points.partition_point(|(point, _)| *point < hash);
        let (_, endpoint_idx) = self.points[idx % self.points.len()];
        Some(self.endpoints[endpoint_idx].as_str())
    }

    /// Endpoints on the ring, sorted.
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

/// Stable 64-bit hash: leading 8 bytes of SHA-256, big-endian.
pub fn hash64(data: &[u8]) -> u64 {
    let digest = Sha256::digest(data);
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn peers(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("http://10.0.0.{}:5000", i + 1)).collect()
    }

    #[test]
    fn test_empty_ring_has_no_owner() {
        let ring = HashRing::new(Vec::<String>::new(), DEFAULT_REPLICAS);
        assert!(ring.is_empty());
        assert_eq!(ring.owner("db-password"), None);
    }

    #[test]
    fn test_single_endpoint_owns_everything() {
        let ring = HashRing::new(["http://10.0.0.1:5000"], DEFAULT_REPLICAS);
        for key in ["a", "b", "db-password", ""] {
            assert_eq!(ring.owner(key), Some("http://10.0.0.1:5000"));
        }
    }

    #[test]
    fn test_input_order_and_duplicates_do_not_matter() {
        let forward = HashRing::new(peers(4), DEFAULT_REPLICAS);
        let mut shuffled = peers(4);
        shuffled.reverse();
        shuffled.push(shuffled[0].clone());
        let backward = HashRing::new(shuffled, DEFAULT_REPLICAS);
        assert_eq!(forward, backward);
        assert_eq!(backward.len(), 4);
    }

    #[test]
    fn test_keys_spread_over_all_endpoints() {
        let ring = HashRing::new(peers(3), DEFAULT_REPLICAS);
        let mut counts: HashMap<String, usize> = HashMap::new();
        for i in 0..3000 {
            let key = format!("secret-{}", i);
            if let Some(owner) = ring.owner(&key) {
                *counts.entry(owner.to_string()).or_default() += 1;
            }
        }
        assert_eq!(counts.len(), 3);
        for (endpoint, count) in counts {
            assert!(count > 300, "{} only owns {} keys", endpoint, count);
        }
    }

    #[test]
    fn test_hash64_is_stable() {
        // Pinned so ownership never silently changes between releases.
        assert_eq!(hash64(b""), 0xe3b0_c442_98fc_1c14);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Property: ownership is a pure function of (endpoints, key).
        #[test]
        fn prop_owner_is_deterministic(key in ".{0,40}", n in 1usize..8) {
            let a = HashRing::new(peers(n), DEFAULT_REPLICAS);
            let b = HashRing::new(peers(n), DEFAULT_REPLICAS);
            prop_assert_eq!(a.owner(&key), b.owner(&key));
            prop_assert_eq!(a.owner(&key), a.owner(&key));
        }

        /// Property: adding an endpoint only moves keys onto the new endpoint.
        #[test]
        fn prop_join_moves_keys_only_to_newcomer(key in "[a-z0-9-]{1,32}", n in 1usize..6) {
            let before = HashRing::new(peers(n), DEFAULT_REPLICAS);
            let after = HashRing::new(peers(n + 1), DEFAULT_REPLICAS);
            let newcomer = format!("http://10.0.0.{}:5000", n + 1);

            let old_owner = before.owner(&key);
            let new_owner = after.owner(&key);
            prop_assert!(new_owner == old_owner || new_owner == Some(newcomer.as_str()));
        }
    }
}
