//! File-backed collaborators for the CLI: knowledge graph, embeddings,
//! keyword search and the id store.

use std::path::Path;

use analogia_loader::embeddings_file::{load_into, read_any};
use analogia_loader::table_file::{collect_table_files, parse_table, table_name};
use analogia_store::connector::{InMemoryEmbeddings, InMemoryGraph, TokenTextSearch};
use analogia_store::ids::FileIdStore;
use analogia_store::IdAllocator;
use anyhow::{Context, Result};
use tracing::{info, warn};

const EMBEDDING_BATCH: usize = 1000;

pub fn load_graph(path: &Path) -> Result<InMemoryGraph> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read graph {}", path.display()))?;
    let graph = InMemoryGraph::from_json(&text)
        .with_context(|| format!("malformed graph {}", path.display()))?;
    info!(entities = graph.len(), "knowledge graph loaded");
    Ok(graph)
}

/// Embeddings from a text or `.cbor` file; an empty store without one.
pub fn load_embeddings(path: Option<&Path>, delimiter: char) -> Result<InMemoryEmbeddings> {
    let Some(path) = path else {
        return Ok(InMemoryEmbeddings::new());
    };
    let items = read_any(path, delimiter)?;
    let mut store = InMemoryEmbeddings::new();
    load_into(&mut store, &items, EMBEDDING_BATCH)?;
    Ok(store)
}

/// Keyword documents built from the cell and caption text of every table.
pub fn keyword_index(tables: &Path) -> TokenTextSearch {
    let mut search = TokenTextSearch::new();
    for file in collect_table_files(tables) {
        let table = match parse_table(&file) {
            Ok(table) => table,
            Err(err) => {
                warn!(error = %err, "table left out of keyword index");
                continue;
            }
        };
        let mut text = vec![table.pg_title.as_str(), table.table_caption.as_str()];
        text.extend(table.headers.iter().map(|h| h.text.as_str()));
        text.extend(table.data_rows().iter().flatten().map(|c| c.text.as_str()));
        search.add_document(table_name(&file), &text.join(" "));
    }
    search
}

pub fn id_allocator(index: &Path, file: &str) -> Result<IdAllocator> {
    let path = index.join(file);
    IdAllocator::new(FileIdStore::new(&path))
        .with_context(|| format!("failed to open id store {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use analogia_store::{EmbeddingStore, KnowledgeGraph, TextSearch};

    #[test]
    fn test_file_backends() {
        let dir = tempfile::tempdir().unwrap();
        let graph = dir.path().join("graph.json");
        std::fs::write(
            &graph,
            r#"{"http://dbpedia.org/resource/Berlin": {"types": ["City"], "predicates": ["country"]}}"#,
        )
        .unwrap();
        let graph = load_graph(&graph).unwrap();
        assert_eq!(
            graph.search_types("http://dbpedia.org/resource/Berlin").unwrap(),
            vec!["City".to_string()]
        );

        let vectors = dir.path().join("vectors.txt");
        std::fs::write(&vectors, "http://dbpedia.org/resource/Berlin 1 0\nhttp://dbpedia.org/resource/Nowhere\n").unwrap();
        let store = load_embeddings(Some(&vectors), ' ').unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.select("http://dbpedia.org/resource/Berlin"), Some(vec![1.0, 0.0]));
        assert!(load_embeddings(None, ' ').unwrap().is_empty());
    }

    #[test]
    fn test_keyword_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("t1.json"),
            r#"{"_id": "t1", "pgTitle": "Capitals", "rows": [[{"text": "Berlin"}]]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("bad.json"), "{").unwrap();
        let search = keyword_index(dir.path());
        let hits = search.search(&["berlin".to_string()]);
        assert_eq!(hits, vec![("t1.json".to_string(), 1.0)]);
    }
}
