//! Analogia search: ranks indexed tables by how analogous their rows are to
//! a set of query tuples.
//!
//! - [`analogous::AnalogousSearch`] scores every candidate table.
//! - [`prefilter::Prefilter`] narrows the candidates with the LSH indexes or
//!   a keyword backend before scoring.
//! - [`query`] reads query files and links query entities into a snapshot.
//! - [`output`] writes per-query reports.

pub mod analogous;
pub mod error;
pub mod hungarian;
pub mod output;
pub mod prefilter;
pub mod query;
pub mod result;

pub use analogous::{AnalogousSearch, EntitySimilarity, SearchConfig, SimilarityMeasure};
pub use error::SearchError;
pub use output::{build_report, write_report, SearchReport};
pub use prefilter::{Prefilter, PrefilterMode};
pub use result::TopK;

#[cfg(test)]
mod tests;
