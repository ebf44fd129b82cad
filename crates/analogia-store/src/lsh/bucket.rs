use ahash::AHashMap;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use super::hash::HashFunction;

/// Multiset of `(key, table)` pairs. Tables are interned `u32` ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bucket<K> {
    keys: Vec<K>,
    values: Vec<u32>,
}

impl<K: PartialEq> Bucket<K> {
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn add(&mut self, key: K, value: u32) {
        self.keys.push(key);
        self.values.push(value);
    }

    /// Tables stored under `key`.
    pub fn find(&self, key: &K) -> RoaringBitmap {
        self.keys
            .iter()
            .zip(&self.values)
            .filter(|(k, _)| *k == key)
            .map(|(_, v)| *v)
            .collect()
    }

    pub fn all(&self) -> RoaringBitmap {
        self.values.iter().copied().collect()
    }

    /// Remove every pair stored under `key`.
    pub fn delete(&mut self, key: &K) -> bool {
        let before = self.keys.len();
        let mut i = 0;
        while i < self.keys.len() {
            if self.keys[i] == *key {
                self.keys.swap_remove(i);
                self.values.swap_remove(i);
            } else {
                i += 1;
            }
        }
        before != self.keys.len()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// One band: a fixed number of buckets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketGroup<K> {
    buckets: Vec<Bucket<K>>,
}

impl<K: PartialEq> BucketGroup<K> {
    pub fn new(buckets: usize) -> Self {
        Self {
            buckets: (0..buckets).map(|_| Bucket::new()).collect(),
        }
    }

    pub fn add(&mut self, bucket: usize, key: K, value: u32) {
        if let Some(b) = self.buckets.get_mut(bucket) {
            b.add(key, value);
        }
    }

    pub fn get(&self, bucket: usize) -> RoaringBitmap {
        self.buckets
            .get(bucket)
            .map(Bucket::all)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn buckets(&self) -> &[Bucket<K>] {
        &self.buckets
    }
}

/// `groups` bands of `group_size` buckets each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketIndex<K> {
    groups: Vec<BucketGroup<K>>,
}

impl<K: PartialEq> BucketIndex<K> {
    pub fn new(groups: usize, group_size: usize) -> Self {
        Self {
            groups: (0..groups).map(|_| BucketGroup::new(group_size)).collect(),
        }
    }

    pub fn groups(&self) -> &[BucketGroup<K>] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn group_size(&self) -> usize {
        self.groups.first().map_or(0, BucketGroup::len)
    }

    pub fn add(&mut self, group: usize, bucket: usize, key: K, value: u32) {
        if let Some(g) = self.groups.get_mut(group) {
            g.add(bucket, key, value);
        }
    }

    /// Insert `key -> value` in every band under its band key.
    pub fn add_all(&mut self, band_keys: &[usize], key: K, value: u32)
    where
        K: Clone,
    {
        for (group, bucket) in band_keys.iter().enumerate() {
            self.add(group, *bucket, key.clone(), value);
        }
    }

    pub fn get(&self, group: usize, bucket: usize) -> RoaringBitmap {
        self.groups
            .get(group)
            .map(|g| g.get(bucket))
            .unwrap_or_default()
    }

    /// Values found in at least `vote` of the bands addressed by `band_keys`.
    pub fn search(&self, band_keys: &[usize], vote: usize) -> RoaringBitmap {
        let mut tally: AHashMap<u32, usize> = AHashMap::new();
        for (group, bucket) in band_keys.iter().enumerate() {
            for value in &self.get(group, *bucket) {
                *tally.entry(value).or_insert(0) += 1;
            }
        }
        tally
            .into_iter()
            .filter(|(_, count)| *count >= vote)
            .map(|(value, _)| value)
            .collect()
    }
}

/// Cut a signature into bands of `band_size` (the last may be shorter) and
/// hash each band into `[0, group_size)`.
pub fn create_keys(
    signature: &[u64],
    band_size: usize,
    group_size: usize,
    hash: HashFunction,
) -> Vec<usize> {
    if band_size == 0 {
        return Vec::new();
    }
    signature
        .chunks(band_size)
        .map(|band| hash.hash(band, group_size))
        .collect()
}
