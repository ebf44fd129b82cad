//! Index construction settings.

use std::path::Path;

use analogia_store::lsh::{EntitySet, LshParams, SetLshConfig};
use analogia_store::LshError;
use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Names of every artifact written into an index directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileNames {
    pub entity_linker: String,
    pub entity_table: String,
    pub entity_to_tables: String,
    pub embeddings_index: String,
    pub types_lsh: String,
    pub predicates_lsh: String,
    pub embeddings_lsh: String,
    pub table_to_entities: String,
    pub table_to_types: String,
    pub statistics_dir: String,
    pub link_to_entities_frequency: String,
    pub cell_to_links_frequency: String,
    pub table_stats: String,
    pub id_store: String,
}

impl Default for FileNames {
    fn default() -> Self {
        Self {
            entity_linker: "entity_linker.ser".to_string(),
            entity_table: "entity_table.ser".to_string(),
            entity_to_tables: "entity_to_tables.ser".to_string(),
            embeddings_index: "embeddings_idx.ser".to_string(),
            types_lsh: "types_lsh.ser".to_string(),
            predicates_lsh: "predicates_lsh.ser".to_string(),
            embeddings_lsh: "embeddings_lsh.ser".to_string(),
            table_to_entities: "tableIDToEntities.ttl".to_string(),
            table_to_types: "tableIDToTypes.ttl".to_string(),
            statistics_dir: "statistics".to_string(),
            link_to_entities_frequency: "wikilinkToNumEntitiesFrequency.json".to_string(),
            cell_to_links_frequency: "cellToNumLinksFrequency.json".to_string(),
            table_stats: "perTableStats.json".to_string(),
            id_store: "ids.json".to_string(),
        }
    }
}

/// Settings for [`IndexWriter`](crate::writer::IndexWriter) and
/// [`IndexReader`](crate::reader::IndexReader).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub permutation_vectors: usize,
    pub band_size: usize,
    pub threads: usize,
    pub input_prefix: String,
    pub kg_prefix: String,
    pub disallowed_types: Vec<String>,
    pub aggregate_columns: bool,
    pub seed: u64,
    pub unimportant_table_fraction: f64,
    pub types_shingle_size: usize,
    pub predicates_shingle_size: usize,
    pub vector_cache_capacity: usize,
    pub mention_filter_capacity: usize,
    pub mention_filter_fpp: f64,
    /// Skip the embeddings LSH index (e.g. when no embedding store is wired in).
    pub build_embeddings_lsh: bool,
    pub file_names: FileNames,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            permutation_vectors: 30,
            band_size: 10,
            threads: 4,
            input_prefix: "http://www.wikipedia.org/".to_string(),
            kg_prefix: "http://dbpedia.org/".to_string(),
            disallowed_types: vec!["http://www.w3.org/2002/07/owl#Thing".to_string()],
            aggregate_columns: false,
            seed: 0,
            unimportant_table_fraction: 0.5,
            types_shingle_size: 2,
            predicates_shingle_size: 1,
            vector_cache_capacity: 500,
            mention_filter_capacity: 5_000_000,
            mention_filter_fpp: 0.01,
            build_embeddings_lsh: true,
            file_names: FileNames::default(),
        }
    }
}

impl IndexConfig {
    /// Load from a JSON file; absent fields keep their defaults.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read index config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse index config {}", path.display()))
    }

    pub fn lsh_params(&self) -> LshParams {
        LshParams {
            permutations: self.permutation_vectors,
            band_size: self.band_size,
            threads: self.threads,
            seed: self.seed,
            aggregate_columns: self.aggregate_columns,
        }
    }

    pub fn set_lsh_config(&self, set: EntitySet) -> SetLshConfig {
        let shingle_size = match set {
            EntitySet::Types => self.types_shingle_size,
            EntitySet::Predicates => self.predicates_shingle_size,
        };
        SetLshConfig {
            set,
            shingle_size,
            params: self.lsh_params(),
            unimportant_fraction: self.unimportant_table_fraction,
        }
    }

    /// Fixed-size pool shared by table loading, LSH construction and index reads.
    pub fn thread_pool(&self) -> Result<rayon::ThreadPool, rayon::ThreadPoolBuildError> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads.max(1))
            .build()
    }

    /// Checks that must pass before any table is read.
    pub fn validate(&self) -> Result<(), LshError> {
        self.lsh_params().validate()?;
        if self.types_shingle_size == 0 || self.predicates_shingle_size == 0 {
            return Err(LshError::ZeroShingleSize);
        }
        Ok(())
    }
}
