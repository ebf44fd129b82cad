//! Analogia loader: turns a corpus of JSON tables into a persisted index
//! directory, and loads it back.
//!
//! - [`writer::IndexWriter`] links cell mentions to knowledge-graph
//!   entities, records where they occur, computes IDF weights and builds
//!   the LSH indexes.
//! - [`reader::IndexReader`] restores an [`snapshot::IndexSnapshot`].
//! - [`embeddings_file`] imports entity embeddings into an
//!   [`EmbeddingStore`](analogia_store::EmbeddingStore).

pub mod config;
pub mod embeddings_file;
pub mod mention_filter;
pub mod persistence;
pub mod reader;
pub mod snapshot;
pub mod stats;
pub mod table_file;
pub mod writer;

pub use config::{FileNames, IndexConfig};
pub use reader::IndexReader;
pub use snapshot::IndexSnapshot;
pub use stats::TableStats;
pub use writer::{IndexWriter, WriterError};
