//! Analogous table search.
//!
//! Every candidate table is scored against the query independently: each
//! table row with at least one linked entity yields, per query tuple, a
//! vector of entity similarities (one component per query entity). Those
//! vectors are folded per column (average or maximum), compared against the
//! all-ones vector, and the tuple scores are averaged into the table score.
//!
//! With `single_column_per_query_entity`, query entities are first aligned to
//! table columns by a maximum-weight assignment over summed column scores,
//! and only the aligned cell is compared.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use ahash::AHashMap;
use analogia_loader::stats::TableStatsBuilder;
use analogia_loader::table_file::{parse_table, JsonTable};
use analogia_loader::{IndexSnapshot, TableStats};
use analogia_store::similarity::{
    column_average, column_max, cosine, jaccard, mean, normalize_sum, weighted_jaccard,
    weighted_euclidean,
};
use analogia_store::{Entity, EntityLinking, Table};
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::SearchError;
use crate::hungarian;
use crate::prefilter::{Prefilter, PrefilterMode};
use crate::result::TopK;

/// Upper bound for the similarity of two distinct entities in adjusted mode.
pub const ADJUSTED_CAP: f64 = 0.95;

const PROGRESS_EVERY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitySimilarity {
    JaccardTypes,
    JaccardPredicates,
    /// `(cos + 1) / 2`
    EmbeddingsNorm,
    /// `|cos|`
    EmbeddingsAbs,
    /// `1 - acos(cos) / π`
    EmbeddingsAng,
}

impl EntitySimilarity {
    pub fn uses_embeddings(self) -> bool {
        matches!(
            self,
            EntitySimilarity::EmbeddingsNorm
                | EntitySimilarity::EmbeddingsAbs
                | EntitySimilarity::EmbeddingsAng
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntitySimilarity::JaccardTypes => "jaccard_types",
            EntitySimilarity::JaccardPredicates => "jaccard_predicates",
            EntitySimilarity::EmbeddingsNorm => "embeddings_norm",
            EntitySimilarity::EmbeddingsAbs => "embeddings_abs",
            EntitySimilarity::EmbeddingsAng => "embeddings_ang",
        }
    }
}

impl fmt::Display for EntitySimilarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntitySimilarity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "jaccard_types" | "types" => Ok(EntitySimilarity::JaccardTypes),
            "jaccard_predicates" | "predicates" => Ok(EntitySimilarity::JaccardPredicates),
            "embeddings_norm" | "norm_cos" => Ok(EntitySimilarity::EmbeddingsNorm),
            "embeddings_abs" | "abs_cos" => Ok(EntitySimilarity::EmbeddingsAbs),
            "embeddings_ang" | "ang_cos" | "embeddings" => Ok(EntitySimilarity::EmbeddingsAng),
            other => Err(format!("unknown entity similarity `{other}`")),
        }
    }
}

/// How a tuple's aggregated vector is turned into a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMeasure {
    /// Cosine to the all-ones vector.
    Cosine,
    /// `1 / (1 + d)` with `d` the IDF-weighted distance to the all-ones vector.
    Euclidean,
}

impl FromStr for SimilarityMeasure {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(SimilarityMeasure::Cosine),
            "euclidean" => Ok(SimilarityMeasure::Euclidean),
            other => Err(format!("unknown similarity measure `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub top_k: usize,
    pub threads: usize,
    pub entity_similarity: EntitySimilarity,
    pub similarity_measure: SimilarityMeasure,
    pub single_column_per_query_entity: bool,
    /// IDF-weighted Jaccard (types only).
    pub weighted_jaccard: bool,
    pub adjusted_similarity: bool,
    pub use_max_similarity_per_column: bool,
    /// Reuse the first tuple's column alignment for every tuple.
    pub same_alignment_across_tuples: bool,
    pub prefilter: Option<PrefilterMode>,
    pub vote: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 100,
            threads: 4,
            entity_similarity: EntitySimilarity::JaccardTypes,
            similarity_measure: SimilarityMeasure::Euclidean,
            single_column_per_query_entity: false,
            weighted_jaccard: false,
            adjusted_similarity: false,
            use_max_similarity_per_column: false,
            same_alignment_across_tuples: false,
            prefilter: None,
            vote: 1,
        }
    }
}

impl SearchConfig {
    /// One-line description of the ranking setup, used in search reports.
    pub fn algorithm(&self) -> String {
        let prefix = self
            .prefilter
            .map(|mode| format!("{mode} "))
            .unwrap_or_default();
        let aggregation = if self.use_max_similarity_per_column {
            "max"
        } else {
            "average"
        };
        let similarity = if self.entity_similarity.uses_embeddings() {
            format!("embeddings - {}", self.entity_similarity)
        } else {
            format!(
                "{} - {} adjusted entity similarity",
                self.entity_similarity,
                if self.adjusted_similarity { "with" } else { "without" }
            )
        };
        format!("{prefix}brute-force with {aggregation} similarity per column aggregation ({similarity})")
    }
}

/// Diagnostic tallies shared by the per-table workers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchCounters {
    pub embedding_comparisons: usize,
    pub non_embedding_comparisons: usize,
    pub embedding_coverage_successes: usize,
    pub embedding_coverage_fails: usize,
    pub query_entities_missing_coverage: BTreeSet<String>,
}

/// Per-query-tuple column alignment; `None` marks an unaligned entity.
type Alignment = Vec<Vec<Option<usize>>>;

pub struct AnalogousSearch<'a> {
    index: &'a IndexSnapshot,
    config: SearchConfig,
    table_dir: PathBuf,
    corpus: BTreeSet<String>,
    prefilter: Option<Prefilter<'a>>,
    counters: Mutex<SearchCounters>,
    table_stats: BTreeMap<String, TableStats>,
    parsed_tables: usize,
    reduction: f64,
    elapsed: Option<Duration>,
}

impl<'a> AnalogousSearch<'a> {
    /// The corpus starts as every table the index knows about; table files
    /// are read from the directory recorded at index time.
    pub fn new(index: &'a IndexSnapshot, config: SearchConfig) -> Self {
        let corpus = index.entity_table_link.tables();
        let table_dir = PathBuf::from(index.entity_table_link.directory().unwrap_or_default());
        Self {
            index,
            config,
            table_dir,
            corpus,
            prefilter: None,
            counters: Mutex::new(SearchCounters::default()),
            table_stats: BTreeMap::new(),
            parsed_tables: 0,
            reduction: 0.0,
            elapsed: None,
        }
    }

    pub fn with_prefilter(mut self, prefilter: Prefilter<'a>) -> Self {
        self.prefilter = Some(prefilter);
        self
    }

    pub fn with_table_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.table_dir = dir.into();
        self
    }

    /// Restrict the corpus to these tables; only the file names are kept.
    pub fn set_corpus<I, S>(&mut self, files: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.corpus = files
            .into_iter()
            .map(|f| {
                let f = f.as_ref();
                f.rsplit('/').next().unwrap_or(f).to_string()
            })
            .collect();
    }

    pub fn corpus(&self) -> &BTreeSet<String> {
        &self.corpus
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn table_dir(&self) -> &Path {
        &self.table_dir
    }

    /// Rank the corpus against `query`. Every query entity must be linked.
    pub fn search(&mut self, query: &Table<String>) -> Result<TopK, SearchError> {
        let start = Instant::now();
        self.check_query(query)?;
        *self.counters.get_mut() = SearchCounters::default();
        self.table_stats.clear();

        if let Some(prefilter) = self.prefilter.as_mut() {
            let initial = self.corpus.len();
            let candidates = prefilter.search(query)?;
            self.corpus = candidates;
            self.reduction = if initial > 0 {
                1.0 - self.corpus.len() as f64 / initial as f64
            } else {
                0.0
            };
            info!(
                mode = %prefilter.mode(),
                before = initial,
                after = self.corpus.len(),
                elapsed_secs = prefilter.elapsed().unwrap_or_default().as_secs_f64(),
                "prefiltered corpus"
            );
        }

        let total = self.corpus.len();
        info!(tables = total, "scoring candidate tables");
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.threads.max(1))
            .build()
            .map_err(|e| SearchError::ThreadPool(e.to_string()))?;
        let done = AtomicUsize::new(0);
        let this: &Self = self;
        let scored: Vec<(String, f64, TableStats)> = pool.install(|| {
            this.corpus
                .par_iter()
                .filter_map(|table| {
                    let result = this.score_table(query, table);
                    let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                    if finished % PROGRESS_EVERY == 0 {
                        info!(finished, total, "processed tables");
                    }
                    result.map(|(score, stats)| (table.clone(), score, stats))
                })
                .collect()
        });

        self.parsed_tables = scored.len();
        let mut scores = Vec::with_capacity(scored.len());
        for (table, score, stats) in scored {
            self.table_stats.insert(table.clone(), stats);
            scores.push((table, score));
        }
        let elapsed = start.elapsed();
        self.elapsed = Some(elapsed);
        info!(
            parsed = self.parsed_tables,
            elapsed_secs = elapsed.as_secs_f64(),
            "search finished"
        );
        if self.config.entity_similarity.uses_embeddings() {
            let c = self.counters.get_mut();
            info!(
                comparisons = c.embedding_comparisons,
                missing = c.non_embedding_comparisons,
                coverage_successes = c.embedding_coverage_successes,
                coverage_fails = c.embedding_coverage_fails,
                uncovered_query_entities = c.query_entities_missing_coverage.len(),
                "embedding coverage"
            );
        }
        Ok(TopK::new(self.config.top_k, scores))
    }

    fn check_query(&self, query: &Table<String>) -> Result<(), SearchError> {
        if query.rows().iter().all(Vec::is_empty) {
            return Err(SearchError::EmptyQuery);
        }
        let linker = &self.index.linker;
        match query
            .rows()
            .iter()
            .flatten()
            .find(|uri| linker.kg_uri_lookup(uri).is_none())
        {
            Some(uri) => Err(SearchError::UnlinkedQueryEntity(uri.clone())),
            None => Ok(()),
        }
    }

    /// `None` when the table file cannot be read or has no data rows.
    fn score_table(&self, query: &Table<String>, table: &str) -> Option<(f64, TableStats)> {
        let path = self.table_dir.join(table);
        let json = match parse_table(&path) {
            Ok(json) => json,
            Err(err) => {
                warn!(error = %err, "skipping candidate table");
                return None;
            }
        };
        if json.num_data_rows == 0 || json.data_rows().is_empty() {
            return None;
        }
        let row_entities = row_entities(&json, &self.index.linker);
        let mut stats = TableStats::builder();

        let alignment = if self.config.single_column_per_query_entity {
            let alignment = self.align_columns(query, &json, &row_entities);
            let names = alignment
                .iter()
                .map(|tuple| {
                    tuple
                        .iter()
                        .flatten()
                        .filter_map(|c| json.headers.get(*c).map(|h| h.text.clone()))
                        .collect()
                })
                .collect();
            stats = stats.tuple_query_alignment(names);
            Some(alignment)
        } else {
            None
        };

        let mapped_rows = row_entities.iter().filter(|r| !r.is_empty()).count();
        // Per query tuple: one similarity vector per qualifying table row.
        let mut tuple_vectors: Vec<Vec<Vec<f64>>> = Vec::with_capacity(query.row_count());
        for (q, tuple) in query.rows().iter().enumerate() {
            let aligned = alignment.as_ref().and_then(|a| a.get(q)).map(Vec::as_slice);
            let mut vectors = Vec::new();
            for columns in row_entities.iter().filter(|r| !r.is_empty()) {
                if self.config.entity_similarity.uses_embeddings()
                    && !self.has_embedding_coverage(tuple, columns, aligned)
                {
                    continue;
                }
                let vector = tuple
                    .iter()
                    .enumerate()
                    .map(|(i, query_entity)| match aligned {
                        Some(aligned) => aligned
                            .get(i)
                            .copied()
                            .flatten()
                            .and_then(|c| columns.get(&c))
                            .map_or(0.0, |e| self.entity_similarity(query_entity, e)),
                        None => columns
                            .values()
                            .map(|e| self.entity_similarity(query_entity, e))
                            .fold(0.0, f64::max),
                    })
                    .collect();
                vectors.push(vector);
            }
            tuple_vectors.push(vectors);
        }

        stats = stats
            .entity_mapped_rows(mapped_rows)
            .fraction_of_entity_mapped_rows(mapped_rows as f64 / json.num_data_rows as f64);
        let (score, stats) = self.aggregate(query, &tuple_vectors, stats);
        Some((score, stats.finish()))
    }

    /// Sum each query entity's similarity over every cell of each column,
    /// then pick the maximum-weight one-to-one alignment per tuple.
    fn align_columns(
        &self,
        query: &Table<String>,
        json: &JsonTable,
        row_entities: &[BTreeMap<usize, String>],
    ) -> Alignment {
        let columns = json
            .data_rows()
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
            .max(json.num_cols);
        let mut alignment: Alignment = query
            .rows()
            .iter()
            .map(|tuple| {
                let mut totals = vec![vec![0.0f64; columns]; tuple.len()];
                for row in row_entities {
                    for (&column, entity) in row {
                        for (i, query_entity) in tuple.iter().enumerate() {
                            totals[i][column] += self.entity_similarity(query_entity, entity);
                        }
                    }
                }
                let cost: Vec<Vec<f64>> = totals
                    .into_iter()
                    .map(|row| row.into_iter().map(|s| -s).collect())
                    .collect();
                hungarian::assign(&cost)
            })
            .collect();

        if self.config.same_alignment_across_tuples {
            if let Some(first) = alignment.first().cloned() {
                for tuple in alignment.iter_mut().skip(1) {
                    *tuple = first.clone();
                }
            }
        }
        alignment
    }

    /// Every query entity, and every relevant row entity, must have an
    /// embedding; at least one row entity must be relevant.
    fn has_embedding_coverage(
        &self,
        tuple: &[String],
        columns: &BTreeMap<usize, String>,
        aligned: Option<&[Option<usize>]>,
    ) -> bool {
        let mut counters = self.counters.lock();
        if let Some(missing) = tuple.iter().find(|e| !self.has_embedding(e)) {
            counters.embedding_coverage_fails += 1;
            counters.query_entities_missing_coverage.insert(missing.clone());
            return false;
        }
        let relevant: Vec<&String> = match aligned {
            Some(aligned) => aligned
                .iter()
                .flatten()
                .filter_map(|c| columns.get(c))
                .collect(),
            None => columns.values().collect(),
        };
        if relevant.is_empty() || relevant.iter().any(|e| !self.has_embedding(e)) {
            counters.embedding_coverage_fails += 1;
            return false;
        }
        counters.embedding_coverage_successes += 1;
        true
    }

    fn has_embedding(&self, uri: &str) -> bool {
        self.index
            .linker
            .kg_uri_lookup(uri)
            .is_some_and(|id| self.index.embeddings.contains(id))
    }

    /// Similarity of two KG entities in `[0, 1]`.
    pub fn entity_similarity(&self, a: &str, b: &str) -> f64 {
        let similarity = match self.config.entity_similarity {
            EntitySimilarity::JaccardTypes | EntitySimilarity::JaccardPredicates => {
                self.jaccard_similarity(a, b)
            }
            _ if self.has_embedding(a) && self.has_embedding(b) => self.embedding_similarity(a, b),
            _ => {
                self.counters.lock().non_embedding_comparisons += 1;
                0.0
            }
        };
        if self.config.adjusted_similarity {
            adjusted(a, b, similarity)
        } else {
            similarity
        }
    }

    fn jaccard_similarity(&self, a: &str, b: &str) -> f64 {
        let entity = |uri: &str| {
            self.index
                .linker
                .kg_uri_lookup(uri)
                .and_then(|id| self.index.entity_table.find(id))
        };
        let (a, b) = (entity(a), entity(b));

        if self.config.entity_similarity == EntitySimilarity::JaccardPredicates {
            let predicates = |e: Option<&Entity>| {
                e.map(|e| e.predicates().to_vec()).unwrap_or_default()
            };
            return jaccard(&predicates(a), &predicates(b));
        }

        fn labels(e: Option<&Entity>) -> Vec<&str> {
            e.map(|e| e.types().iter().map(|t| t.label()).collect())
                .unwrap_or_default()
        }
        let (la, lb) = (labels(a), labels(b));
        if !self.config.weighted_jaccard {
            return jaccard(&la, &lb);
        }
        let weights: AHashMap<&str, f64> = a
            .into_iter()
            .chain(b)
            .flat_map(|e| e.types())
            .filter(|t| t.idf() >= 0.0)
            .map(|t| (t.label(), t.idf()))
            .collect();
        weighted_jaccard(&la, &lb, |label| weights.get(label).copied())
    }

    fn embedding_similarity(&self, a: &str, b: &str) -> f64 {
        let vector = |uri: &str| {
            self.index
                .linker
                .kg_uri_lookup(uri)
                .and_then(|id| self.index.embeddings.find(id))
        };
        let (Some(va), Some(vb)) = (vector(a), vector(b)) else {
            return 0.0;
        };
        let cos = cosine(va, vb).clamp(-1.0, 1.0);
        let similarity = match self.config.entity_similarity {
            EntitySimilarity::EmbeddingsNorm => (cos + 1.0) / 2.0,
            EntitySimilarity::EmbeddingsAbs => cos.abs(),
            _ => 1.0 - cos.acos() / std::f64::consts::PI,
        };
        self.counters.lock().embedding_comparisons += 1;
        similarity
    }

    fn aggregate(
        &self,
        query: &Table<String>,
        tuple_vectors: &[Vec<Vec<f64>>],
        stats: TableStatsBuilder,
    ) -> (f64, TableStatsBuilder) {
        let mut scores = Vec::with_capacity(tuple_vectors.len());
        let mut vectors = Vec::new();
        for (tuple, rows) in query.rows().iter().zip(tuple_vectors) {
            if rows.is_empty() {
                scores.push(0.0);
                continue;
            }
            let width = tuple.len();
            let vector = if self.config.use_max_similarity_per_column {
                column_max(rows, width)
            } else {
                column_average(rows, width)
            };
            let ones = vec![1.0; width];
            let score = match self.config.similarity_measure {
                SimilarityMeasure::Cosine => cosine(&vector, &ones),
                SimilarityMeasure::Euclidean => {
                    let weights = normalize_sum(&self.idf_weights(tuple));
                    1.0 / (1.0 + weighted_euclidean(&vector, &ones, &weights))
                }
            };
            scores.push(score);
            vectors.push(vector);
        }
        let table_score = mean(&scores);
        let stats = stats.query_row_scores(scores).query_row_vectors(vectors);
        (table_score, stats)
    }

    fn idf_weights(&self, tuple: &[String]) -> Vec<f64> {
        tuple
            .iter()
            .map(|uri| {
                self.index
                    .linker
                    .kg_uri_lookup(uri)
                    .and_then(|id| self.index.entity_table.find(id))
                    .map_or(0.0, |e| e.idf().max(0.0))
            })
            .collect()
    }

    pub fn table_stats(&self) -> &BTreeMap<String, TableStats> {
        &self.table_stats
    }

    pub fn counters(&self) -> SearchCounters {
        self.counters.lock().clone()
    }

    pub fn parsed_tables(&self) -> usize {
        self.parsed_tables
    }

    /// Fraction of the corpus removed by the prefilter.
    pub fn reduction(&self) -> f64 {
        self.reduction
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }
}

/// Identical entities score 1.0; distinct ones at most [`ADJUSTED_CAP`].
pub fn adjusted(a: &str, b: &str, similarity: f64) -> f64 {
    if a == b {
        1.0
    } else {
        similarity.min(ADJUSTED_CAP)
    }
}

/// For every data row: column index -> the first linked entity of that cell.
fn row_entities(json: &JsonTable, linker: &EntityLinking) -> Vec<BTreeMap<usize, String>> {
    json.data_rows()
        .iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .filter_map(|(column, cell)| {
                    cell.links
                        .iter()
                        .find_map(|link| linker.map_to(link).ok().flatten())
                        .map(|uri| (column, uri))
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjusted_cap() {
        assert_eq!(adjusted("a", "a", 0.2), 1.0);
        assert_eq!(adjusted("a", "b", 1.0), ADJUSTED_CAP);
        assert_eq!(adjusted("a", "b", 0.3), 0.3);
    }

    #[test]
    fn test_parse_modes() {
        assert_eq!("ang_cos".parse(), Ok(EntitySimilarity::EmbeddingsAng));
        assert_eq!("jaccard-types".parse(), Ok(EntitySimilarity::JaccardTypes));
        assert!("nope".parse::<EntitySimilarity>().is_err());
        assert_eq!("Cosine".parse(), Ok(SimilarityMeasure::Cosine));
    }

    #[test]
    fn test_algorithm_description() {
        let config = SearchConfig {
            prefilter: Some(PrefilterMode::LshTypes),
            use_max_similarity_per_column: true,
            ..SearchConfig::default()
        };
        assert_eq!(
            config.algorithm(),
            "LSH_TYPES brute-force with max similarity per column aggregation (jaccard_types - without adjusted entity similarity)"
        );
    }
}
