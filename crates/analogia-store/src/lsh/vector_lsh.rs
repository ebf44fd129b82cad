//! SimHash (random hyperplane) LSH over entity embeddings.

use std::collections::BTreeSet;
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::bucket::{create_keys, BucketIndex};
use super::hash::HashFunction;
use super::{LshParams, NamedTable, TableNames, VectorSource};
use crate::error::LshError;
use crate::ids::Id;
use crate::linking::EntityLinking;
use crate::similarity::average_vector;
use crate::table::ColumnAggregator;

pub const DEFAULT_CACHE_CAPACITY: usize = 500;

type KeyCache = Mutex<LruCache<Id, Vec<usize>>>;

/// A zero capacity still keeps one entry.
fn key_cache(capacity: usize) -> KeyCache {
    Mutex::new(LruCache::new(
        NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
    ))
}

fn default_cache() -> KeyCache {
    key_cache(DEFAULT_CACHE_CAPACITY)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Projector {
    projections: Vec<Vec<f64>>,
    band_size: usize,
    hash: HashFunction,
}

impl Projector {
    fn dimension(&self) -> usize {
        self.projections.first().map_or(0, Vec::len)
    }

    /// One bit per projection: 1 when the dot product is positive.
    fn bit_vector(&self, vector: &[f32]) -> Result<Vec<u64>, LshError> {
        let expected = self.dimension();
        if vector.len() != expected {
            return Err(LshError::DimensionMismatch {
                expected,
                found: vector.len(),
            });
        }
        Ok(self
            .projections
            .iter()
            .map(|p| {
                let dot: f64 = p.iter().zip(vector).map(|(a, b)| a * *b as f64).sum();
                u64::from(dot > 0.0)
            })
            .collect())
    }

    fn keys(&self, vector: &[f32], group_size: usize) -> Result<Vec<usize>, LshError> {
        let bits = self.bit_vector(vector)?;
        Ok(create_keys(&bits, self.band_size, group_size, self.hash))
    }
}

/// Banded SimHash index from entity embeddings to tables.
#[derive(Debug, Serialize, Deserialize)]
pub struct VectorLshIndex {
    projector: Projector,
    aggregate_columns: bool,
    tables: TableNames,
    buckets: BucketIndex<Id>,
    #[serde(skip, default = "default_cache")]
    cache: KeyCache,
}

impl VectorLshIndex {
    /// Build over `tables`. The embedding dimension is taken from the first
    /// entity that has a vector; a vector of any other length is an error.
    pub fn build<V: VectorSource>(
        params: LshParams,
        cache_capacity: usize,
        tables: &[NamedTable],
        linker: &EntityLinking,
        source: &V,
    ) -> Result<Self, LshError> {
        params.validate()?;
        if tables.is_empty() {
            return Err(LshError::EmptyCorpus);
        }
        let dimension = tables
            .iter()
            .flat_map(|(_, t)| t.rows().iter().flatten())
            .find_map(|uri| source.vector(uri))
            .map(|v| v.len())
            .ok_or(LshError::MissingDimension)?;

        let mut rng = StdRng::seed_from_u64(params.seed);
        let projections = (0..params.permutations)
            .map(|_| (0..dimension).map(|_| rng.gen_range(-1.0..1.0)).collect())
            .collect();
        let projector = Projector {
            projections,
            band_size: params.band_size,
            hash: HashFunction::Boolean,
        };

        let mut names = TableNames::new();
        let table_ids: Vec<u32> = tables.iter().map(|(name, _)| names.intern(name)).collect();
        let group_size = params.buckets_per_group();
        let cache = key_cache(cache_capacity);
        let inserts: Mutex<Vec<(Vec<usize>, Id, u32)>> = Mutex::new(Vec::new());

        tracing::debug!(dimension, tables = tables.len(), "building vector LSH index");

        let pool = params.thread_pool()?;
        pool.install(|| {
            tables
                .par_iter()
                .zip(table_ids.par_iter())
                .try_for_each(|((_, table), table_id)| -> Result<(), LshError> {
                    let mut local = Vec::new();

                    if params.aggregate_columns {
                        let averages = ColumnAggregator::new(table).aggregate(
                            |uri| source.vector(uri),
                            |column| {
                                average_vector(column.iter().map(Vec::as_slice))
                                    .map(|avg| avg.into_iter().map(|x| x as f32).collect())
                                    .unwrap_or_default()
                            },
                        );
                        for average in averages.iter().filter(|v| !v.is_empty()) {
                            local.push((projector.keys(average, group_size)?, Id::ANY));
                        }
                    } else {
                        for uri in table.rows().iter().flatten() {
                            let Some(id) = linker.kg_uri_lookup(uri) else {
                                continue;
                            };
                            if let Some(keys) = cache.lock().get(&id).cloned() {
                                local.push((keys, id));
                                continue;
                            }
                            let Some(vector) = source.vector(uri) else {
                                continue;
                            };
                            let keys = projector.keys(&vector, group_size)?;
                            cache.lock().put(id, keys.clone());
                            local.push((keys, id));
                        }
                    }

                    inserts
                        .lock()
                        .extend(local.into_iter().map(|(keys, id)| (keys, id, *table_id)));
                    Ok(())
                })
        })?;

        let mut inserts = inserts.into_inner();
        inserts.sort_unstable_by_key(|(_, id, table_id)| (*table_id, *id));
        let mut buckets = BucketIndex::new(params.bucket_groups(), group_size);
        for (keys, id, table_id) in inserts {
            buckets.add_all(&keys, id, table_id);
        }

        Ok(Self {
            projector,
            aggregate_columns: params.aggregate_columns,
            tables: names,
            buckets,
            cache,
        })
    }

    fn band_keys(&self, vector: &[f32]) -> Result<Vec<usize>, LshError> {
        self.projector.keys(vector, self.buckets.group_size())
    }

    /// Tables sharing at least `vote` bands with the entity's embedding.
    pub fn search<V: VectorSource>(
        &self,
        uri: &str,
        vote: usize,
        source: &V,
    ) -> Result<BTreeSet<String>, LshError> {
        let Some(vector) = source.vector(uri) else {
            return Ok(BTreeSet::new());
        };
        let hits = self.buckets.search(&self.band_keys(&vector)?, vote);
        Ok(self.tables.resolve(&hits))
    }

    /// Search with the mean embedding of the given entities. Entities without
    /// an embedding are skipped; if none has one, nothing matches.
    pub fn aggregated_search<V: VectorSource, S: AsRef<str>>(
        &self,
        vote: usize,
        uris: &[S],
        source: &V,
    ) -> Result<BTreeSet<String>, LshError> {
        let vectors: Vec<Vec<f32>> = uris
            .iter()
            .filter_map(|uri| source.vector(uri.as_ref()))
            .collect();
        let Some(average) = average_vector(vectors.iter().map(Vec::as_slice)) else {
            return Ok(BTreeSet::new());
        };
        let average: Vec<f32> = average.into_iter().map(|x| x as f32).collect();
        let hits = self.buckets.search(&self.band_keys(&average)?, vote);
        Ok(self.tables.resolve(&hits))
    }

    /// Index one more entity occurrence; `false` when the entity is unknown
    /// to the linker or has no embedding.
    pub fn insert<V: VectorSource>(
        &mut self,
        uri: &str,
        table: &str,
        linker: &EntityLinking,
        source: &V,
    ) -> Result<bool, LshError> {
        let Some(id) = linker.kg_uri_lookup(uri) else {
            return Ok(false);
        };
        let cached = self.cache.lock().get(&id).cloned();
        let keys = match cached {
            Some(keys) => keys,
            None => {
                let Some(vector) = source.vector(uri) else {
                    return Ok(false);
                };
                let keys = self.band_keys(&vector)?;
                self.cache.lock().put(id, keys.clone());
                keys
            }
        };
        let table_id = self.tables.intern(table);
        self.buckets.add_all(&keys, id, table_id);
        Ok(true)
    }

    /// Replace the key cache (it is not persisted) with an empty one.
    pub fn set_cache_capacity(&mut self, capacity: usize) {
        self.cache = key_cache(capacity);
    }

    pub fn cached_entities(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn dimension(&self) -> usize {
        self.projector.dimension()
    }

    pub fn projection_count(&self) -> usize {
        self.projector.projections.len()
    }

    pub fn band_size(&self) -> usize {
        self.projector.band_size
    }

    pub fn aggregates_columns(&self) -> bool {
        self.aggregate_columns
    }

    pub fn table_names(&self) -> &TableNames {
        &self.tables
    }

    pub fn buckets(&self) -> &BucketIndex<Id> {
        &self.buckets
    }
}
