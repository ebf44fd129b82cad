//! Analogia store: the in-memory indexes behind analogous table search.
//!
//! Layers, leaf to root:
//! 1. **Identifiers**: [`ids::IdAllocator`] hands out durable [`Id`]s.
//! 2. **Dictionaries**: [`dictionary::IdDictionary`] maps strings to ids both ways;
//!    [`linking::EntityLinking`] pairs input mentions with knowledge-graph URIs.
//! 3. **Entity data**: [`entity::EntityTable`] (types, predicates, IDF),
//!    [`entity_table_link::EntityTableLink`] (entity -> table locations) and
//!    [`embeddings_index::EmbeddingsIndex`].
//! 4. **LSH**: [`lsh::SetLshIndex`] (MinHash over type/predicate sets) and
//!    [`lsh::VectorLshIndex`] (SimHash over embeddings), both on the banded
//!    [`lsh::BucketIndex`].
//!
//! External systems (knowledge graph, embedding store, mention resolver,
//! text search) are reached through the traits in [`connector`].

pub mod connector;
pub mod dictionary;
pub mod embeddings_index;
pub mod entity;
pub mod entity_table_link;
pub mod error;
pub mod ids;
pub mod linking;
pub mod lsh;
pub mod similarity;
pub mod table;

pub use connector::{EmbeddingStore, EntityResolver, KnowledgeGraph, TextSearch};
pub use embeddings_index::EmbeddingsIndex;
pub use entity::{Entity, EntityTable, Type};
pub use entity_table_link::EntityTableLink;
pub use error::{ConnectorError, EmbeddingError, LinkError, LshError, SchemaError};
pub use ids::{Id, IdAllocator};
pub use linking::EntityLinking;
pub use table::Table;
