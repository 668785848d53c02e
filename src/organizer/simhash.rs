//! Locality-sensitive fingerprint for near-duplicate detection (§4.6 rule
//! 2). 64-bit SimHash over whitespace-shingled tokens; no simhash/minhash
//! crate appears anywhere in the retrieved corpus, so this is hand-rolled
//! the same way the teacher hand-rolls its own p95/backoff arithmetic
//! rather than reaching for a stats crate for every small computation.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

fn token_hash(token: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    hasher.finish()
}

/// Computes the 64-bit SimHash fingerprint of `text` over 3-token shingles.
pub fn simhash(text: &str) -> u64 {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() {
        return 0;
    }

    let shingle_size = 3.min(tokens.len());
    let mut weights = [0i64; 64];

    for window in tokens.windows(shingle_size) {
        let shingle = window.join(" ");
        let hash = token_hash(&shingle);
        for bit in 0..64 {
            if (hash >> bit) & 1 == 1 {
                weights[bit] += 1;
            } else {
                weights[bit] -= 1;
            }
        }
    }

    let mut fingerprint: u64 = 0;
    for (bit, weight) in weights.iter().enumerate() {
        if *weight > 0 {
            fingerprint |= 1 << bit;
        }
    }
    fingerprint
}

pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// True if `a` and `b` are near-duplicates under `threshold` (max differing
/// bits out of 64).
pub fn is_near_duplicate(a: u64, b: u64, threshold: u32) -> bool {
    hamming_distance(a, b) <= threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_has_zero_distance() {
        let text = "Governo anuncia credito extraordinario para o orgao federal";
        assert_eq!(hamming_distance(simhash(text), simhash(text)), 0);
    }

    #[test]
    fn near_identical_text_has_small_distance() {
        let a = simhash("Governo anuncia credito extraordinario para o orgao federal hoje");
        let b = simhash("Governo anuncia credito extraordinario para o orgao federal ontem");
        assert!(hamming_distance(a, b) < 20);
    }

    #[test]
    fn unrelated_text_is_not_near_duplicate_at_tight_threshold() {
        let a = simhash("Governo anuncia credito extraordinario para o orgao federal");
        let b = simhash("Time local vence campeonato estadual de futebol no domingo");
        assert!(!is_near_duplicate(a, b, 2));
    }
}
