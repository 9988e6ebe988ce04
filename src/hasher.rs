/// Deterministic key-to-shard assignment.
///
/// Hashes the key with MurmurHash3 x64_128 and maps the resulting 128-bit
/// value onto `[0, num_buckets)` by treating it as a fraction of the hash
/// space. The same key always lands in the same bucket on every node and
/// every release, which is the only property the rest of the system leans
/// on — the specific hash function is an implementation detail.
use std::io::Cursor;

const MURMUR_SEED: u32 = 0;

/// Maps `key` onto a bucket index in `[0, num_buckets)`.
///
/// # Panics
///
/// Panics if `num_buckets` is zero; callers never construct a `View` with
/// zero buckets.
pub fn assign(key: &str, num_buckets: usize) -> usize {
    assert!(num_buckets > 0, "num_buckets must be positive");

    let hash: u128 = murmur3::murmur3_x64_128(&mut Cursor::new(key.as_bytes()), MURMUR_SEED)
        .expect("hashing an in-memory buffer cannot fail");

    let p = hash as f64 / 2f64.powi(128);
    let index = (p * num_buckets as f64).floor() as usize;
    index.min(num_buckets - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_is_deterministic() {
        for key in ["a", "hello", "key-with-dashes-123", ""] {
            assert_eq!(assign(key, 4), assign(key, 4));
        }
    }

    #[test]
    fn assignment_is_always_in_range() {
        for n in 1..=17 {
            for i in 0..500 {
                let key = format!("key-{i}");
                let bucket = assign(&key, n);
                assert!(bucket < n, "bucket {bucket} out of range for n={n}");
            }
        }
    }

    #[test]
    fn single_bucket_always_wins() {
        for i in 0..100 {
            assert_eq!(assign(&format!("k{i}"), 1), 0);
        }
    }

    #[test]
    fn distribution_is_reasonably_spread() {
        let num_buckets = 4;
        let mut counts = vec![0usize; num_buckets];
        let total = 4000;
        for i in 0..total {
            let bucket = assign(&format!("distribution-key-{i}"), num_buckets);
            counts[bucket] += 1;
        }
        let expected = total / num_buckets;
        for count in counts {
            let deviation = (count as isize - expected as isize).unsigned_abs();
            assert!(
                deviation < expected / 2,
                "bucket count {count} too far from expected {expected}"
            );
        }
    }
}
