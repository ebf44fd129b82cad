use serde::{Deserialize, Serialize};

/// Band hash functions mapping a signature slice into `[0, buckets)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashFunction {
    /// Fletcher-16 style checksum, for MinHash signatures.
    Numeric,
    /// Binary-weighted sum `Σ v_i · 2^i`, for SimHash bit vectors.
    Boolean,
}

impl HashFunction {
    pub fn hash(self, band: &[u64], buckets: usize) -> usize {
        if buckets == 0 {
            return 0;
        }
        let modulus = buckets as u64;
        match self {
            HashFunction::Numeric => {
                let (mut sum1, mut sum2) = (0u64, 0u64);
                for v in band {
                    sum1 = (sum1 + v % 255) % 255;
                    sum2 = (sum2 + sum1) % 255;
                }
                (((sum2 << 8) | sum1) % modulus) as usize
            }
            HashFunction::Boolean => {
                let (mut sum, mut weight) = (0u64, 1 % modulus);
                for v in band {
                    sum = (sum + (v % modulus) * weight) % modulus;
                    weight = (weight * 2) % modulus;
                }
                sum as usize
            }
        }
    }
}
