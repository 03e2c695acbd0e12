//! Key Hashing
//!
//! Fixed, deterministic string hashes shared by every coordinator and replica:
//! a 64-bit polynomial hash that places keys and replicas on the ring, and a
//! 32-bit polynomial hash that picks a cache set.
//!
//! Both hashes walk the key as UTF-16 code units so ids computed here agree
//! with ids produced by other implementations of the same polynomial.

/// Seed of the 64-bit ring hash
const RING_HASH_SEED: u64 = 1125899906842597;

/// Hash a string onto the 64-bit ring: `h = 1125899906842597; h = 31*h + c`.
///
/// Arithmetic wraps, so the result is the same bit pattern a signed 64-bit
/// implementation produces; it is always compared as unsigned.
pub fn hash64(key: &str) -> u64 {
    key.encode_utf16().fold(RING_HASH_SEED, |h, c| {
        h.wrapping_mul(31).wrapping_add(c as u64)
    })
}

/// 32-bit polynomial string hash (`h = 31*h + c`, seed 0) used for cache-set selection
pub fn hash32(key: &str) -> i32 {
    key.encode_utf16()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(c as i32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash64_empty_is_seed() {
        assert_eq!(hash64(""), RING_HASH_SEED);
    }

    #[test]
    fn test_hash64_is_polynomial() {
        let expected = RING_HASH_SEED
            .wrapping_mul(31)
            .wrapping_add(b'a' as u64)
            .wrapping_mul(31)
            .wrapping_add(b'b' as u64);
        assert_eq!(hash64("ab"), expected);
        assert_eq!(hash64("ab"), hash64("ab"));
        assert_ne!(hash64("ab"), hash64("ba"));
    }

    #[test]
    fn test_hash32_matches_known_values() {
        assert_eq!(hash32(""), 0);
        assert_eq!(hash32("a"), 97);
        assert_eq!(hash32("hello"), 99162322);
        // overflow wraps, this one lands exactly on i32::MIN
        assert_eq!(hash32("polygenelubricants"), i32::MIN);
    }
}
