//! Locality-sensitive hashing over entity type/predicate sets and embeddings.
//!
//! Both index flavours share the banded [`BucketIndex`]: a signature of length
//! `P` is cut into `P / band_size` bands, each band is hashed into one of
//! `2^band_size` buckets of its group, and a table becomes a candidate when it
//! shares a bucket with the query in at least `vote` groups.
//!
//! ```text
//!   entity ──► bit vector ──► signature[P] ──► band keys[G] ──► buckets ──► tables
//!              (shingles |     (MinHash |
//!               SimHash)        signs)
//! ```

pub mod bucket;
pub mod element_stats;
pub mod hash;
pub mod set_lsh;
pub mod shingles;
pub mod vector_lsh;

pub use bucket::{create_keys, Bucket, BucketGroup, BucketIndex};
pub use element_stats::ElementStats;
pub use hash::HashFunction;
pub use set_lsh::{SetLshConfig, SetLshIndex};
pub use vector_lsh::VectorLshIndex;

use std::collections::BTreeSet;

use ahash::AHashMap;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use crate::connector::{EmbeddingStore, KnowledgeGraph};
use crate::embeddings_index::EmbeddingsIndex;
use crate::entity::{Entity, EntityTable};
use crate::error::{ConnectorError, LshError};
use crate::linking::EntityLinking;
use crate::table::Table;

/// Widest band accepted; a group holds `2^band_size` buckets.
pub const MAX_BAND_SIZE: usize = 24;

/// A table to index: its name plus the KG entity URIs of its cells.
pub type NamedTable = (String, Table<String>);

/// Which entity set a [`SetLshIndex`] hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntitySet {
    Types,
    Predicates,
}

impl EntitySet {
    /// The entity's elements of this kind (type labels or predicates).
    pub fn of(self, entity: &Entity) -> Vec<String> {
        match self {
            EntitySet::Types => entity.types().iter().map(|t| t.label().to_string()).collect(),
            EntitySet::Predicates => entity.predicates().to_vec(),
        }
    }
}

/// Shared banding parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LshParams {
    /// Permutation (MinHash) or projection (SimHash) vectors: the signature length.
    pub permutations: usize,
    pub band_size: usize,
    pub threads: usize,
    pub seed: u64,
    pub aggregate_columns: bool,
}

impl Default for LshParams {
    fn default() -> Self {
        Self {
            permutations: 30,
            band_size: 10,
            threads: 4,
            seed: 0,
            aggregate_columns: false,
        }
    }
}

impl LshParams {
    pub fn validate(&self) -> Result<(), LshError> {
        if self.band_size == 0 {
            return Err(LshError::ZeroBandSize);
        }
        if self.permutations % self.band_size != 0 {
            return Err(LshError::IndivisibleBands {
                permutations: self.permutations,
                band_size: self.band_size,
            });
        }
        if self.band_size > MAX_BAND_SIZE {
            return Err(LshError::BandTooWide {
                band_size: self.band_size,
            });
        }
        Ok(())
    }

    pub fn bucket_groups(&self) -> usize {
        self.permutations / self.band_size.max(1)
    }

    pub fn buckets_per_group(&self) -> usize {
        1 << self.band_size.min(MAX_BAND_SIZE)
    }

    pub(crate) fn thread_pool(&self) -> Result<rayon::ThreadPool, LshError> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads.max(1))
            .build()
            .map_err(|e| LshError::ThreadPool(e.to_string()))
    }
}

// ============================================================================
// Table name interning
// ============================================================================

/// Table names interned to dense `u32` ids so bucket values fit a roaring bitmap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct TableNames {
    names: Vec<String>,
    index: AHashMap<String, u32>,
}

impl TableNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, name: &str) -> u32 {
        if let Some(id) = self.index.get(name) {
            return *id;
        }
        let id = self.names.len() as u32;
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), id);
        id
    }

    pub fn get(&self, name: &str) -> Option<u32> {
        self.index.get(name).copied()
    }

    pub fn name(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    pub fn resolve(&self, ids: &RoaringBitmap) -> BTreeSet<String> {
        ids.iter()
            .filter_map(|id| self.name(id))
            .map(str::to_string)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl From<Vec<String>> for TableNames {
    fn from(names: Vec<String>) -> Self {
        let index = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i as u32))
            .collect();
        Self { names, index }
    }
}

impl From<TableNames> for Vec<String> {
    fn from(names: TableNames) -> Self {
        names.names
    }
}

// ============================================================================
// Element and vector sources
// ============================================================================

/// Supplies an entity's type or predicate set.
pub trait ElementSource: Sync {
    fn elements(&self, uri: &str, set: EntitySet) -> Result<Vec<String>, ConnectorError>;
}

/// Elements as recorded in the entity store (types already filtered at load time).
pub struct StoredElements<'a> {
    pub linker: &'a EntityLinking,
    pub entities: &'a EntityTable,
}

impl ElementSource for StoredElements<'_> {
    fn elements(&self, uri: &str, set: EntitySet) -> Result<Vec<String>, ConnectorError> {
        Ok(self
            .linker
            .kg_uri_lookup(uri)
            .and_then(|id| self.entities.find(id))
            .map(|entity| set.of(entity))
            .unwrap_or_default())
    }
}

/// Elements fetched live from the knowledge graph.
pub struct GraphElements<'a>(pub &'a dyn KnowledgeGraph);

impl ElementSource for GraphElements<'_> {
    fn elements(&self, uri: &str, set: EntitySet) -> Result<Vec<String>, ConnectorError> {
        match set {
            EntitySet::Types => self.0.search_types(uri),
            EntitySet::Predicates => self.0.search_predicates(uri),
        }
    }
}

/// Supplies an entity's embedding.
pub trait VectorSource: Sync {
    fn vector(&self, uri: &str) -> Option<Vec<f32>>;
}

/// Embeddings recorded in the snapshot's embeddings index.
pub struct StoredVectors<'a> {
    pub linker: &'a EntityLinking,
    pub embeddings: &'a EmbeddingsIndex,
}

impl VectorSource for StoredVectors<'_> {
    fn vector(&self, uri: &str) -> Option<Vec<f32>> {
        self.linker
            .kg_uri_lookup(uri)
            .and_then(|id| self.embeddings.find(id))
            .filter(|v| !v.is_empty())
            .map(<[f32]>::to_vec)
    }
}

/// Embeddings fetched from an external store.
pub struct StoreVectors<'a>(pub &'a dyn EmbeddingStore);

impl VectorSource for StoreVectors<'_> {
    fn vector(&self, uri: &str) -> Option<Vec<f32>> {
        self.0.select(uri).filter(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_validation() {
        assert!(LshParams::default().validate().is_ok());
        let params = LshParams {
            permutations: 30,
            band_size: 7,
            ..LshParams::default()
        };
        assert!(matches!(
            params.validate(),
            Err(LshError::IndivisibleBands { permutations: 30, band_size: 7 })
        ));
        let params = LshParams {
            band_size: 0,
            ..LshParams::default()
        };
        assert!(matches!(params.validate(), Err(LshError::ZeroBandSize)));
        assert_eq!(LshParams::default().bucket_groups(), 3);
        assert_eq!(LshParams::default().buckets_per_group(), 1024);
    }

    #[test]
    fn test_table_names_round_trip() {
        let mut names = TableNames::new();
        assert_eq!(names.intern("a.json"), 0);
        assert_eq!(names.intern("b.json"), 1);
        assert_eq!(names.intern("a.json"), 0);

        let restored = TableNames::from(Vec::<String>::from(names.clone()));
        assert_eq!(restored, names);

        let mut bits = RoaringBitmap::new();
        bits.insert(1);
        bits.insert(7);
        assert_eq!(
            names.resolve(&bits).into_iter().collect::<Vec<_>>(),
            vec!["b.json".to_string()]
        );
    }
}
