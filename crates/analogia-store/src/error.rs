use thiserror::Error;

use crate::ids::Id;

/// Usage errors raised by the entity linker.
///
/// "Not found" is never an error: lookups return `Option`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("uri `{uri}` does not start with prefix `{prefix}`")]
    MissingPrefix { uri: String, prefix: String },
}

/// Failures reported by external collaborators (knowledge graph, embedding store).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectorError {
    #[error("backend unreachable: {0}")]
    Unavailable(String),
    #[error("backend rejected credentials: {0}")]
    Unauthenticated(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// Configuration and construction errors for the LSH indexes.
#[derive(Debug, Error)]
pub enum LshError {
    #[error("band size must be greater than 0")]
    ZeroBandSize,
    #[error("shingle size must be greater than 0")]
    ZeroShingleSize,
    #[error("permutation count {permutations} is not divisible by band size {band_size}")]
    IndivisibleBands { permutations: usize, band_size: usize },
    #[error("band size {band_size} yields too many buckets per group")]
    BandTooWide { band_size: usize },
    #[error("shingle index space overflows for a universe of {universe} elements")]
    DimensionTooLarge { universe: usize },
    #[error("percentile must be between 0.0 and 1.0, got {0}")]
    InvalidPercentile(f64),
    #[error("no tables to build the LSH index from")]
    EmptyCorpus,
    #[error("no embeddings exist for table entities")]
    MissingDimension,
    #[error("vector dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("failed to start LSH worker pool: {0}")]
    ThreadPool(String),
    #[error(transparent)]
    Connector(#[from] ConnectorError),
}

/// Vectors the embeddings index refuses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmbeddingError {
    #[error("embedding for {id} is empty")]
    Empty { id: Id },
    #[error("embedding for {id} has dimension {found}, index holds {expected}")]
    DimensionMismatch { id: Id, expected: usize, found: usize },
}

/// Errors decoding the row-oriented entity location schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("unsupported entity location schema: {found} (expected {expected})")]
    Version { found: String, expected: &'static str },
    #[error("row {index} has a partial location ({row}, {column})")]
    PartialLocation { index: usize, row: i64, column: i64 },
}
