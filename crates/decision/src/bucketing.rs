//! Deterministic hash bucketing
//!
//! Maps a `(subject, experiment)` pair onto a fixed integer bucket space.
//! The mapping is a pure function of its inputs: no seeds, no process state,
//! so an allocation evicted from the cache is always recomputed identically.

use sha2::{Digest, Sha256};

/// Size of the bucket space; one bucket is 0.01% of traffic
pub const BUCKET_SPACE: u32 = 10_000;

/// Bucket of a subject within an experiment, in `[0, BUCKET_SPACE)`.
///
/// Hashes `"{experiment_id}:{subject_id}"` with SHA-256 and reduces the first
/// 32 bits (big-endian) of the digest.
pub fn bucket(subject_id: &str, experiment_id: &str) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(experiment_id.as_bytes());
    hasher.update(b":");
    hasher.update(subject_id.as_bytes());
    let digest = hasher.finalize();

    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    prefix % BUCKET_SPACE
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_bucket_is_stable() {
        let first = bucket("user-123", "exp-checkout");
        for _ in 0..100 {
            assert_eq!(bucket("user-123", "exp-checkout"), first);
        }
    }

    #[test]
    fn test_bucket_depends_on_experiment() {
        // The same subject lands in independent buckets across experiments
        let differing = (0..200)
            .filter(|i| {
                let subject = format!("user-{}", i);
                bucket(&subject, "exp-a") != bucket(&subject, "exp-b")
            })
            .count();
        assert!(differing > 190);
    }

    #[test]
    fn test_bucket_known_value() {
        // Key layout is "{experiment}:{subject}"
        let expected = {
            let digest = Sha256::digest(b"exp:user");
            u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) % BUCKET_SPACE
        };
        assert_eq!(bucket("user", "exp"), expected);
    }

    #[test]
    fn test_buckets_spread_evenly() {
        let mut tenths = [0u32; 10];
        for i in 0..50_000 {
            let b = bucket(&format!("subject-{}", i), "exp-spread");
            tenths[(b / 1000) as usize] += 1;
        }
        for count in tenths {
            assert!((4_500..=5_500).contains(&count), "uneven decile: {}", count);
        }
    }

    proptest! {
        #[test]
        fn prop_bucket_in_range(subject in ".*", experiment in ".*") {
            prop_assert!(bucket(&subject, &experiment) < BUCKET_SPACE);
        }

        #[test]
        fn prop_bucket_deterministic(subject in "[a-z0-9-]{1,40}", experiment in "[a-z0-9-]{1,40}") {
            prop_assert_eq!(bucket(&subject, &experiment), bucket(&subject, &experiment));
        }
    }
}
