//! Element shingles and their integer encoding.

use std::collections::BTreeSet;

/// All ordered `k`-tuples over `elements` (cartesian power), minus the tuples
/// whose members are all equal. For `k == 1` every element is its own shingle.
pub fn shingles<T: Clone + Ord>(elements: &BTreeSet<T>, k: usize) -> BTreeSet<Vec<T>> {
    let items: Vec<&T> = elements.iter().collect();
    let mut out = BTreeSet::new();
    if k == 0 || items.is_empty() {
        return out;
    }
    if k == 1 {
        out.extend(items.into_iter().map(|e| vec![e.clone()]));
        return out;
    }

    let n = items.len();
    let mut digits = vec![0usize; k];
    loop {
        if digits.iter().any(|d| *d != digits[0]) {
            out.insert(digits.iter().map(|d| items[*d].clone()).collect());
        }
        // Odometer increment.
        let mut pos = k;
        loop {
            if pos == 0 {
                return out;
            }
            pos -= 1;
            digits[pos] += 1;
            if digits[pos] < n {
                break;
            }
            digits[pos] = 0;
        }
    }
}

fn decimal_digits(v: u64) -> u32 {
    if v == 0 {
        0
    } else {
        v.ilog10() + 1
    }
}

/// Decimal concatenation `b + a · 10^digits(b)`; `None` on overflow.
pub fn concat(a: u64, b: u64) -> Option<u64> {
    10u64
        .checked_pow(decimal_digits(b))
        .and_then(|scale| a.checked_mul(scale))
        .and_then(|shifted| shifted.checked_add(b))
}

/// Size of the shingle index space for a universe of `universe` elements.
pub fn dimension(universe: usize, k: usize) -> Option<u64> {
    let base = universe as u64;
    let mut dim = base;
    for _ in 1..k {
        dim = concat(dim, base)?;
    }
    dim.checked_add(1)
}

/// Index of one shingle: member positions sorted ascending, then concatenated.
pub fn shingle_index(mut positions: Vec<u64>) -> Option<u64> {
    positions.sort_unstable();
    let mut iter = positions.into_iter();
    let first = iter.next()?;
    iter.try_fold(first, concat)
}
