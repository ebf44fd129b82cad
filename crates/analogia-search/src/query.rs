//! Query tables: reading them and linking their entities into a snapshot.

use std::collections::BTreeMap;
use std::path::Path;

use analogia_loader::IndexSnapshot;
use analogia_store::connector::escape_quotes;
use analogia_store::{
    EmbeddingStore, Entity, EntityLinking, EntityTableLink, IdAllocator, KnowledgeGraph, Table,
    Type,
};
use tracing::{debug, warn};

use crate::error::SearchError;

/// Parse a `{"queries": [[uri, ...], ...]}` file. Each inner list is a tuple.
pub fn read_query_file(path: &Path) -> Result<Table<String>, SearchError> {
    let fail = |reason: String| SearchError::QueryFile {
        path: path.to_path_buf(),
        reason,
    };
    let raw = std::fs::read(path).map_err(|e| fail(e.to_string()))?;
    let mut parsed: BTreeMap<String, Vec<Vec<String>>> =
        serde_json::from_slice(&raw).map_err(|e| fail(e.to_string()))?;
    let rows = parsed
        .remove("queries")
        .ok_or_else(|| fail("missing `queries`".to_string()))?;
    Ok(Table::from_rows(rows))
}

/// File name up to the first `.`; names the query's output directory.
pub fn query_name(path: &Path) -> String {
    let file = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    file.split('.').next().unwrap_or_default().to_string()
}

/// `true` when every query entity already occurs in some indexed table.
pub fn ensure_query_entities_mapped(
    query: &Table<String>,
    linker: &EntityLinking,
    link: &EntityTableLink,
) -> bool {
    query
        .rows()
        .iter()
        .flatten()
        .all(|uri| linker.kg_uri_lookup(uri).is_some_and(|id| link.contains(id)))
}

/// Register every query entity in the snapshot: a synthetic input link
/// `{input_prefix}q{row}{column}`, its types and predicates, and its
/// embedding when the store has one. Entities already in the entity table
/// keep their record (and IDF weights).
pub fn link_query_entities(
    query: &Table<String>,
    snapshot: &mut IndexSnapshot,
    graph: &dyn KnowledgeGraph,
    embeddings: &dyn EmbeddingStore,
    ids: &IdAllocator,
) -> Result<(), SearchError> {
    for (row, tuple) in query.rows().iter().enumerate() {
        for (column, uri) in tuple.iter().enumerate() {
            let link = format!("{}q{row}{column}", snapshot.linker.input_prefix());
            snapshot.linker.add_mapping(&link, uri, ids)?;
            let Some(id) = snapshot.linker.kg_uri_lookup(uri) else {
                continue;
            };
            if snapshot.entity_table.contains(id) {
                continue;
            }

            let types = graph.search_types(uri)?.into_iter().map(Type::new).collect();
            let predicates = graph.search_predicates(uri)?;
            snapshot
                .entity_table
                .insert(id, Entity::new(uri.clone(), types, predicates));

            let key = if embeddings.requires_quote_escaping() {
                escape_quotes(uri)
            } else {
                uri.clone()
            };
            if let Some(vector) = embeddings.select(&key) {
                if let Err(err) = snapshot.embeddings.insert(id, vector) {
                    warn!(error = %err, "query embedding skipped");
                }
            }
            debug!(entity = %uri, %id, "linked query entity");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_query_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q1.cities.json");
        std::fs::write(
            &path,
            r#"{"queries": [["http://dbpedia.org/resource/Berlin", "http://dbpedia.org/resource/Germany"], ["http://dbpedia.org/resource/Paris"]]}"#,
        )
        .unwrap();
        let query = read_query_file(&path).unwrap();
        assert_eq!(query.row_count(), 2);
        assert_eq!(query.row(1).unwrap(), ["http://dbpedia.org/resource/Paris".to_string()]);
        assert_eq!(query_name(&path), "q1");

        std::fs::write(&path, r#"{"tuples": []}"#).unwrap();
        assert!(matches!(
            read_query_file(&path),
            Err(SearchError::QueryFile { .. })
        ));
    }
}
