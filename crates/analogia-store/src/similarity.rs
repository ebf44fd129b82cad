//! Similarity and distance helpers shared by indexing and ranking.

use std::hash::Hash;

use ahash::AHashSet;

/// Cosine similarity clamped to `[-1, 1]`; `0.0` if either vector has zero norm.
///
/// Extra trailing components of the longer vector are ignored.
pub fn cosine<A, B>(a: &[A], b: &[B]) -> f64
where
    A: Copy + Into<f64>,
    B: Copy + Into<f64>,
{
    let (mut dot, mut norm_a, mut norm_b) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        let (x, y): (f64, f64) = ((*x).into(), (*y).into());
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// Jaccard similarity of two element collections (duplicates ignored).
pub fn jaccard<T: Eq + Hash>(a: &[T], b: &[T]) -> f64 {
    let a: AHashSet<&T> = a.iter().collect();
    let b: AHashSet<&T> = b.iter().collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// Weighted Jaccard: sum of intersection weights over sum of union weights.
///
/// Elements for which `weight` returns `None` do not contribute.
pub fn weighted_jaccard<T, F>(a: &[T], b: &[T], weight: F) -> f64
where
    T: Eq + Hash,
    F: Fn(&T) -> Option<f64>,
{
    let a: AHashSet<&T> = a.iter().collect();
    let b: AHashSet<&T> = b.iter().collect();
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let numerator: f64 = a.intersection(&b).filter_map(|e| weight(*e)).sum();
    let denominator: f64 = a.union(&b).filter_map(|e| weight(*e)).sum();
    if denominator == 0.0 {
        return 0.0;
    }
    numerator / denominator
}

/// Number of differing positions; `None` if the lengths differ.
pub fn hamming<T: PartialEq>(a: &[T], b: &[T]) -> Option<usize> {
    if a.len() != b.len() {
        return None;
    }
    Some(a.iter().zip(b).filter(|(x, y)| x != y).count())
}

/// Component-wise mean of equally sized vectors. `None` for an empty input.
pub fn average_vector<'a, I>(vectors: I) -> Option<Vec<f64>>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut sum: Option<Vec<f64>> = None;
    let mut count = 0usize;
    for vector in vectors {
        let acc = sum.get_or_insert_with(|| vec![0.0; vector.len()]);
        for (s, v) in acc.iter_mut().zip(vector) {
            *s += *v as f64;
        }
        count += 1;
    }
    sum.map(|mut acc| {
        acc.iter_mut().for_each(|s| *s /= count as f64);
        acc
    })
}

/// Scale weights so they sum to 1. All-zero (or empty) input is returned unchanged.
pub fn normalize_sum(weights: &[f64]) -> Vec<f64> {
    let total: f64 = weights.iter().sum();
    if total == 0.0 {
        return weights.to_vec();
    }
    weights.iter().map(|w| w / total).collect()
}

/// `sqrt(sum(w_i * (a_i - b_i)^2))`.
pub fn weighted_euclidean(a: &[f64], b: &[f64], weights: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .zip(weights)
        .map(|((x, y), w)| w * (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Per-column mean over score rows of equal width `columns`.
pub fn column_average(rows: &[Vec<f64>], columns: usize) -> Vec<f64> {
    (0..columns)
        .map(|c| {
            let column: Vec<f64> = rows.iter().filter_map(|r| r.get(c).copied()).collect();
            mean(&column)
        })
        .collect()
}

/// Per-column maximum over score rows; `0.0` for empty columns.
pub fn column_max(rows: &[Vec<f64>], columns: usize) -> Vec<f64> {
    (0..columns)
        .map(|c| {
            rows.iter()
                .filter_map(|r| r.get(c).copied())
                .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
                .unwrap_or(0.0)
        })
        .collect()
}
