//! Embedding import: delimiter-separated text and the CBOR interchange file.
//!
//! Text input is a token stream `IRI v1 v2 ... IRI v1 v2 ...`; tokens are
//! separated by the delimiter or newlines. A token containing `://` starts a
//! new entity, every other token must be a decimal.

use std::io::BufRead;
use std::path::Path;

use analogia_store::EmbeddingStore;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::persistence::write_atomic;

pub const EMBEDDINGS_VERSION_V1: &str = "analogia_embeddings_v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingItem {
    pub uri: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingsFileV1 {
    pub version: String,
    pub dim: usize,
    pub items: Vec<EmbeddingItem>,
}

impl EmbeddingsFileV1 {
    /// Wrap items; every vector must have the length of the first one.
    pub fn new(items: Vec<EmbeddingItem>) -> Result<Self> {
        let dim = items.first().map_or(0, |item| item.vector.len());
        if let Some(bad) = items.iter().find(|item| item.vector.len() != dim) {
            return Err(anyhow!(
                "embedding for {} has {} components, expected {dim}",
                bad.uri,
                bad.vector.len()
            ));
        }
        Ok(Self {
            version: EMBEDDINGS_VERSION_V1.to_string(),
            dim,
            items,
        })
    }
}

pub fn parse_text<R: BufRead>(reader: R, delimiter: char) -> Result<Vec<EmbeddingItem>> {
    let mut items: Vec<EmbeddingItem> = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.context("failed to read embeddings input")?;
        for token in line.split(delimiter).map(str::trim).filter(|t| !t.is_empty()) {
            if token.contains("://") {
                items.push(EmbeddingItem {
                    uri: token.to_string(),
                    vector: Vec::new(),
                });
                continue;
            }
            let value: f32 = token
                .parse()
                .map_err(|_| anyhow!("line {}: could not parse lexeme '{token}'", line_no + 1))?;
            match items.last_mut() {
                Some(item) => item.vector.push(value),
                None => return Err(anyhow!("line {}: value before any entity IRI", line_no + 1)),
            }
        }
    }
    Ok(items)
}

pub fn write_cbor(path: &Path, file: &EmbeddingsFileV1) -> Result<()> {
    let mut bytes = Vec::new();
    ciborium::into_writer(file, &mut bytes)
        .map_err(|e| anyhow!("failed to encode embeddings: {e}"))?;
    write_atomic(path, &bytes)
}

pub fn read_cbor(path: &Path) -> Result<EmbeddingsFileV1> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let file: EmbeddingsFileV1 = ciborium::from_reader(bytes.as_slice())
        .map_err(|e| anyhow!("failed to decode {}: {e}", path.display()))?;
    if file.version != EMBEDDINGS_VERSION_V1 {
        return Err(anyhow!(
            "{}: unsupported embeddings version {}",
            path.display(),
            file.version
        ));
    }
    Ok(file)
}

/// Load a text or CBOR embeddings file, chosen by extension (`.cbor` is binary).
pub fn read_any(path: &Path, delimiter: char) -> Result<Vec<EmbeddingItem>> {
    if path.extension().is_some_and(|ext| ext == "cbor") {
        return Ok(read_cbor(path)?.items);
    }
    let file = std::fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    parse_text(std::io::BufReader::new(file), delimiter)
}

/// Insert items into a store in batches. Empty vectors are skipped.
pub fn load_into<S: EmbeddingStore + ?Sized>(
    store: &mut S,
    items: &[EmbeddingItem],
    batch_size: usize,
) -> Result<usize> {
    let mut loaded = 0;
    let kept: Vec<&EmbeddingItem> = items.iter().filter(|item| !item.vector.is_empty()).collect();
    for batch in kept.chunks(batch_size.max(1)) {
        let iris: Vec<String> = batch.iter().map(|item| item.uri.clone()).collect();
        let vectors: Vec<Vec<f32>> = batch.iter().map(|item| item.vector.clone()).collect();
        store.batch_insert(&iris, &vectors)?;
        loaded += batch.len();
    }
    tracing::info!(loaded, skipped = items.len() - loaded, "embeddings loaded");
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use analogia_store::connector::InMemoryEmbeddings;

    const TEXT: &str = "http://dbpedia.org/resource/Berlin 0.5 -1.25\n0.75\nhttp://dbpedia.org/resource/Paris 1 2 3\n\n";

    #[test]
    fn test_parse_text_spans_lines() {
        let items = parse_text(TEXT.as_bytes(), ' ').unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].vector, vec![0.5, -1.25, 0.75]);
        assert_eq!(items[1].uri, "http://dbpedia.org/resource/Paris");

        assert!(parse_text("0.1 0.2".as_bytes(), ' ').is_err());
        assert!(parse_text("http://x/a abc".as_bytes(), ' ').is_err());
    }

    #[test]
    fn test_cbor_round_trip_and_load() {
        let items = vec![
            EmbeddingItem {
                uri: "http://dbpedia.org/resource/Berlin".to_string(),
                vector: vec![0.5, 1.0],
            },
            EmbeddingItem {
                uri: "http://dbpedia.org/resource/Paris".to_string(),
                vector: vec![1.0, 0.5],
            },
        ];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embeddings.cbor");
        write_cbor(&path, &EmbeddingsFileV1::new(items.clone()).unwrap()).unwrap();
        let back = read_any(&path, ' ').unwrap();
        assert_eq!(back, items);

        let mut store = InMemoryEmbeddings::new();
        assert_eq!(load_into(&mut store, &back, 1).unwrap(), 2);
        assert_eq!(
            store.select("http://dbpedia.org/resource/Paris"),
            Some(vec![1.0, 0.5])
        );
    }

    #[test]
    fn test_mixed_dimensions_rejected() {
        let items = vec![
            EmbeddingItem {
                uri: "a://x".to_string(),
                vector: vec![1.0],
            },
            EmbeddingItem {
                uri: "a://y".to_string(),
                vector: vec![1.0, 2.0],
            },
        ];
        assert!(EmbeddingsFileV1::new(items).is_err());
    }
}
