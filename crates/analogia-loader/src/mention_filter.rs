//! Bloom filter over entity mentions, used to estimate distinct mentions.

use std::hash::BuildHasher;

use ahash::RandomState;

#[derive(Debug, Clone)]
pub struct MentionFilter {
    bits: Vec<u64>,
    num_bits: u64,
    hashes: u32,
    hasher: RandomState,
}

impl MentionFilter {
    /// Sized for `capacity` insertions at false-positive rate `fpp`.
    pub fn new(capacity: usize, fpp: f64) -> Self {
        let n = capacity.max(1) as f64;
        let p = if fpp > 0.0 && fpp < 1.0 { fpp } else { 0.01 };
        let ln2 = std::f64::consts::LN_2;
        let num_bits = ((-n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let hashes = ((num_bits as f64 / n) * ln2).round().max(1.0) as u32;
        Self {
            bits: vec![0; num_bits.div_ceil(64) as usize],
            num_bits,
            hashes,
            hasher: RandomState::with_seeds(0x6d65, 0x6e74, 0x696f, 0x6e73),
        }
    }

    fn positions(&self, item: &str) -> impl Iterator<Item = u64> + '_ {
        let hash = BuildHasher::hash_one(&self.hasher, item);
        let h1 = hash as u32 as u64;
        let h2 = hash >> 32;
        (1..=self.hashes as u64).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits)
    }

    /// Record a mention. Returns `true` if any bit changed.
    pub fn put(&mut self, item: &str) -> bool {
        let positions: Vec<u64> = self.positions(item).collect();
        let mut changed = false;
        for bit in positions {
            let (word, mask) = ((bit / 64) as usize, 1u64 << (bit % 64));
            changed |= self.bits[word] & mask == 0;
            self.bits[word] |= mask;
        }
        changed
    }

    pub fn might_contain(&self, item: &str) -> bool {
        self.positions(item)
            .all(|bit| self.bits[(bit / 64) as usize] & (1u64 << (bit % 64)) != 0)
    }

    /// Estimated number of distinct items put so far.
    pub fn approximate_count(&self) -> u64 {
        let set: u64 = self.bits.iter().map(|w| w.count_ones() as u64).sum();
        let m = self.num_bits as f64;
        let estimate = -m / self.hashes as f64 * (1.0 - set as f64 / m).ln();
        if estimate.is_finite() {
            estimate.round() as u64
        } else {
            u64::MAX
        }
    }
}
