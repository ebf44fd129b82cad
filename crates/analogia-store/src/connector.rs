//! Collaborator interfaces consumed by the indexing and ranking engine.
//!
//! The engine never talks to a concrete database. It depends on four narrow
//! traits:
//!
//! ```text
//!   KnowledgeGraph   types / predicates / graph counts per entity URI
//!   EmbeddingStore   entity URI -> embedding vector
//!   EntityResolver   raw mention (wiki link) -> KG entity URI
//!   TextSearch       keyword search over tables (prefilter only)
//! ```
//!
//! In-memory implementations of each are provided for tests and for the CLI.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;

// ============================================================================
// Traits
// ============================================================================

/// Read-only knowledge-graph queries. Called concurrently from worker threads.
pub trait KnowledgeGraph: Send + Sync {
    fn search_types(&self, entity: &str) -> Result<Vec<String>, ConnectorError>;
    fn search_predicates(&self, entity: &str) -> Result<Vec<String>, ConnectorError>;
    fn num_nodes(&self) -> Result<u64, ConnectorError>;
    fn num_edges(&self) -> Result<u64, ConnectorError>;
    fn num_neighbors(&self, node: &str) -> Result<u64, ConnectorError>;
    /// `(uri, label)` pairs for every labelled entity.
    fn entity_labels(&self) -> Result<Vec<(String, String)>, ConnectorError>;
}

/// Entity embedding storage.
pub trait EmbeddingStore: Send + Sync {
    /// Prepare the backend (create collections, indexes, ...).
    fn setup(&mut self) -> Result<(), ConnectorError> {
        Ok(())
    }

    fn select(&self, iri: &str) -> Option<Vec<f32>>;

    fn batch_insert(&mut self, iris: &[String], vectors: &[Vec<f32>]) -> Result<(), ConnectorError>;

    fn batch_select(&self, iris: &[String]) -> BTreeMap<String, Vec<f32>> {
        iris.iter()
            .filter_map(|iri| self.select(iri).map(|v| (iri.clone(), v)))
            .collect()
    }

    /// Insert one embedding given as `"<iri> <v1>,<v2>,..."`.
    fn update(&mut self, record: &str) -> Result<(), ConnectorError> {
        let (iri, values) = record
            .split_once(' ')
            .ok_or_else(|| ConnectorError::Backend(format!("malformed embedding record `{record}`")))?;
        let vector = values
            .split(',')
            .map(|v| v.trim().parse::<f32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ConnectorError::Backend(format!("invalid embedding for `{iri}`: {e}")))?;
        self.batch_insert(&[iri.to_string()], &[vector])
    }

    fn close(&mut self) -> Result<(), ConnectorError> {
        Ok(())
    }

    /// Backends that splice IRIs into query text need `'` escaped as `''`.
    fn requires_quote_escaping(&self) -> bool {
        false
    }
}

/// Resolves a raw input mention to a knowledge-graph entity URI.
pub trait EntityResolver: Send + Sync {
    fn link(&self, mention: &str) -> Option<String>;
}

impl<F> EntityResolver for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn link(&self, mention: &str) -> Option<String> {
        self(mention)
    }
}

/// Keyword search returning `(table, score)` pairs, best first.
pub trait TextSearch: Send + Sync {
    fn search(&self, terms: &[String]) -> Vec<(String, f64)>;
}

pub fn escape_quotes(iri: &str) -> String {
    iri.replace('\'', "''")
}

// ============================================================================
// Embeddings wrapper
// ============================================================================

/// Uniform front for any [`EmbeddingStore`].
///
/// Empty vectors are reported as absent and calls after [`close`](Self::close)
/// return nothing.
pub struct EmbeddingsWrapper<S: EmbeddingStore> {
    store: S,
    closed: bool,
}

impl<S: EmbeddingStore> EmbeddingsWrapper<S> {
    pub fn new(mut store: S, do_setup: bool) -> Result<Self, ConnectorError> {
        if do_setup {
            store.setup()?;
        }
        Ok(Self {
            store,
            closed: false,
        })
    }

    pub fn inner(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn key(&self, iri: &str) -> String {
        if self.store.requires_quote_escaping() {
            escape_quotes(iri)
        } else {
            iri.to_string()
        }
    }
}

impl<S: EmbeddingStore> EmbeddingStore for EmbeddingsWrapper<S> {
    fn setup(&mut self) -> Result<(), ConnectorError> {
        self.store.setup()
    }

    fn select(&self, iri: &str) -> Option<Vec<f32>> {
        if self.closed {
            return None;
        }
        self.store.select(&self.key(iri)).filter(|v| !v.is_empty())
    }

    fn batch_insert(&mut self, iris: &[String], vectors: &[Vec<f32>]) -> Result<(), ConnectorError> {
        if self.closed {
            return Err(ConnectorError::Unavailable("embedding store is closed".into()));
        }
        if iris.len() != vectors.len() {
            return Err(ConnectorError::Backend(format!(
                "{} iris but {} vectors",
                iris.len(),
                vectors.len()
            )));
        }
        let keys: Vec<String> = iris.iter().map(|iri| self.key(iri)).collect();
        self.store.batch_insert(&keys, vectors)
    }

    fn close(&mut self) -> Result<(), ConnectorError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.store.close()
    }
}

// ============================================================================
// In-memory backends
// ============================================================================

/// Metadata for one entity of an [`InMemoryGraph`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphEntity {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub predicates: Vec<String>,
    #[serde(default)]
    pub neighbors: Vec<String>,
}

/// Knowledge graph held in memory, loadable from JSON
/// (`{"<uri>": {"types": [...], "predicates": [...], "label": "..."}}`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InMemoryGraph {
    entities: BTreeMap<String, GraphEntity>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn insert(&mut self, uri: impl Into<String>, entity: GraphEntity) {
        self.entities.insert(uri.into(), entity);
    }

    /// Builder-style insert of an entity with types and predicates.
    pub fn with_entity(mut self, uri: &str, types: &[&str], predicates: &[&str]) -> Self {
        self.insert(
            uri,
            GraphEntity {
                label: None,
                types: types.iter().map(|t| t.to_string()).collect(),
                predicates: predicates.iter().map(|p| p.to_string()).collect(),
                neighbors: Vec::new(),
            },
        );
        self
    }

    pub fn get(&self, uri: &str) -> Option<&GraphEntity> {
        self.entities.get(uri)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl KnowledgeGraph for InMemoryGraph {
    fn search_types(&self, entity: &str) -> Result<Vec<String>, ConnectorError> {
        Ok(self.get(entity).map(|e| e.types.clone()).unwrap_or_default())
    }

    fn search_predicates(&self, entity: &str) -> Result<Vec<String>, ConnectorError> {
        Ok(self
            .get(entity)
            .map(|e| e.predicates.clone())
            .unwrap_or_default())
    }

    fn num_nodes(&self) -> Result<u64, ConnectorError> {
        Ok(self.entities.len() as u64)
    }

    fn num_edges(&self) -> Result<u64, ConnectorError> {
        Ok(self.entities.values().map(|e| e.neighbors.len() as u64).sum())
    }

    fn num_neighbors(&self, node: &str) -> Result<u64, ConnectorError> {
        Ok(self.get(node).map_or(0, |e| e.neighbors.len() as u64))
    }

    fn entity_labels(&self) -> Result<Vec<(String, String)>, ConnectorError> {
        Ok(self
            .entities
            .iter()
            .filter_map(|(uri, e)| e.label.as_ref().map(|l| (uri.clone(), l.clone())))
            .collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryEmbeddings {
    vectors: BTreeMap<String, Vec<f32>>,
}

impl InMemoryEmbeddings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.vectors.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl FromIterator<(String, Vec<f32>)> for InMemoryEmbeddings {
    fn from_iter<I: IntoIterator<Item = (String, Vec<f32>)>>(iter: I) -> Self {
        Self {
            vectors: iter.into_iter().collect(),
        }
    }
}

impl EmbeddingStore for InMemoryEmbeddings {
    fn select(&self, iri: &str) -> Option<Vec<f32>> {
        self.vectors.get(iri).cloned()
    }

    fn batch_insert(&mut self, iris: &[String], vectors: &[Vec<f32>]) -> Result<(), ConnectorError> {
        for (iri, vector) in iris.iter().zip(vectors) {
            self.vectors.insert(iri.clone(), vector.clone());
        }
        Ok(())
    }
}

/// Resolves a mention to `kg_base/<last path segment of the mention>`.
#[derive(Debug, Clone)]
pub struct PrefixResolver {
    kg_base: String,
}

impl PrefixResolver {
    pub fn new(kg_base: impl Into<String>) -> Self {
        Self {
            kg_base: kg_base.into(),
        }
    }
}

impl EntityResolver for PrefixResolver {
    fn link(&self, mention: &str) -> Option<String> {
        let name = mention.trim_end_matches('/').rsplit('/').next()?;
        if name.is_empty() {
            return None;
        }
        Some(format!("{}/{}", self.kg_base.trim_end_matches('/'), name))
    }
}

/// Token-overlap keyword search over table documents.
#[derive(Debug, Clone, Default)]
pub struct TokenTextSearch {
    documents: BTreeMap<String, Vec<String>>,
}

impl TokenTextSearch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lowercased alphanumeric tokens. URIs contribute their last path segment.
    pub fn tokenize(text: &str) -> Vec<String> {
        let text = if text.contains("://") {
            text.trim_end_matches('/').rsplit('/').next().unwrap_or(text)
        } else {
            text
        };
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .collect()
    }

    pub fn add_document(&mut self, table: impl Into<String>, text: &str) {
        self.documents
            .entry(table.into())
            .or_default()
            .extend(Self::tokenize(text));
    }
}

impl TextSearch for TokenTextSearch {
    fn search(&self, terms: &[String]) -> Vec<(String, f64)> {
        let query: Vec<String> = terms.iter().flat_map(|t| Self::tokenize(t)).collect();
        let mut hits: Vec<(String, f64)> = self
            .documents
            .iter()
            .filter_map(|(table, tokens)| {
                let score = query.iter().filter(|q| tokens.contains(q)).count();
                (score > 0).then(|| (table.clone(), score as f64))
            })
            .collect();
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_from_json() {
        let graph = InMemoryGraph::from_json(
            r#"{"http://dbpedia.org/Berlin": {"types": ["City"], "predicates": ["country"], "label": "Berlin", "neighbors": ["http://dbpedia.org/Germany"]}}"#,
        )
        .unwrap();
        assert_eq!(
            graph.search_types("http://dbpedia.org/Berlin").unwrap(),
            vec!["City".to_string()]
        );
        assert!(graph.search_types("http://dbpedia.org/Paris").unwrap().is_empty());
        assert_eq!(graph.num_edges().unwrap(), 1);
        assert_eq!(
            graph.entity_labels().unwrap(),
            vec![("http://dbpedia.org/Berlin".to_string(), "Berlin".to_string())]
        );
    }

    #[test]
    fn test_wrapper_hides_empty_and_closed() {
        let mut store = InMemoryEmbeddings::new();
        store
            .batch_insert(&["a".into(), "b".into()], &[vec![1.0, 2.0], vec![]])
            .unwrap();
        let mut wrapper = EmbeddingsWrapper::new(store, true).unwrap();
        assert_eq!(wrapper.select("a"), Some(vec![1.0, 2.0]));
        assert_eq!(wrapper.select("b"), None);
        assert_eq!(wrapper.batch_select(&["a".into(), "b".into()]).len(), 1);

        wrapper.update("c 0.5,0.25").unwrap();
        assert_eq!(wrapper.select("c"), Some(vec![0.5, 0.25]));
        assert!(wrapper.update("broken").is_err());

        wrapper.close().unwrap();
        assert_eq!(wrapper.select("a"), None);
        assert!(wrapper.batch_insert(&["d".into()], &[vec![1.0]]).is_err());
    }

    #[test]
    fn test_resolvers() {
        let resolver = PrefixResolver::new("http://dbpedia.org/resource/");
        assert_eq!(
            resolver.link("http://en.wikipedia.org/wiki/Berlin").as_deref(),
            Some("http://dbpedia.org/resource/Berlin")
        );
        let closure = |m: &str| (m == "x").then(|| "http://dbpedia.org/X".to_string());
        assert_eq!(closure.link("x").as_deref(), Some("http://dbpedia.org/X"));
        assert_eq!(closure.link("y"), None);
    }

    #[test]
    fn test_token_search_ranks_by_overlap() {
        let mut search = TokenTextSearch::new();
        search.add_document("t1", "Berlin Paris");
        search.add_document("t2", "Berlin");
        search.add_document("t3", "Rome");
        let hits = search.search(&[
            "http://dbpedia.org/Berlin".to_string(),
            "http://dbpedia.org/Paris".to_string(),
        ]);
        assert_eq!(hits[0], ("t1".to_string(), 2.0));
        assert_eq!(hits[1], ("t2".to_string(), 1.0));
        assert_eq!(hits.len(), 2);
    }
}
