//! The set of indexes a query session works with.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::Path;

use analogia_store::lsh::{SetLshIndex, VectorLshIndex};
use analogia_store::{EmbeddingsIndex, EntityLinking, EntityTable, EntityTableLink};
use anyhow::Result;

use crate::config::FileNames;
use crate::persistence::{write_atomic, write_blob, BlobKind};

const TABLE_IRI_PREFIX: &str = "http://thetis.edao.eu/wikitables/";
const MENTIONS: &str = "<https://schema.org/mentions>";
const RDF_TYPE: &str = "<http://www.w3.org/1999/02/22-rdf-syntax-ns#type>";
const TABLE_CLASS: &str = "<https://schema.org/Table>";

#[derive(Debug)]
pub struct IndexSnapshot {
    pub linker: EntityLinking,
    pub entity_table: EntityTable,
    pub entity_table_link: EntityTableLink,
    pub embeddings: EmbeddingsIndex,
    pub types_lsh: SetLshIndex,
    pub predicates_lsh: SetLshIndex,
    /// Absent when the index was built without embeddings.
    pub embeddings_lsh: Option<VectorLshIndex>,
}

impl IndexSnapshot {
    /// Write every blob plus the two N-Triples membership files into `dir`.
    pub fn write(&self, dir: &Path, names: &FileNames) -> Result<()> {
        write_blob(&dir.join(&names.entity_linker), BlobKind::EntityLinker, &self.linker)?;
        write_blob(&dir.join(&names.entity_table), BlobKind::EntityTable, &self.entity_table)?;
        write_blob(
            &dir.join(&names.entity_to_tables),
            BlobKind::EntityToTables,
            &self.entity_table_link,
        )?;
        write_blob(
            &dir.join(&names.embeddings_index),
            BlobKind::EmbeddingsIndex,
            &self.embeddings,
        )?;
        write_blob(&dir.join(&names.types_lsh), BlobKind::TypesLsh, &self.types_lsh)?;
        write_blob(
            &dir.join(&names.predicates_lsh),
            BlobKind::PredicatesLsh,
            &self.predicates_lsh,
        )?;
        if let Some(lsh) = &self.embeddings_lsh {
            write_blob(&dir.join(&names.embeddings_lsh), BlobKind::EmbeddingsLsh, lsh)?;
        }

        let (mentions, types) = self.table_triples();
        write_atomic(&dir.join(&names.table_to_entities), mentions.as_bytes())?;
        write_atomic(&dir.join(&names.table_to_types), types.as_bytes())?;
        Ok(())
    }

    /// `(table mentions entity, table is a Table)` triples, in entity id order.
    pub fn table_triples(&self) -> (String, String) {
        let mut ids: Vec<_> = self.linker.kg_uri_ids().collect();
        ids.sort_unstable();

        let mut mentions = String::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut types = String::new();
        for id in ids {
            let Some(uri) = self
                .entity_table
                .find(id)
                .map(|e| e.uri().to_string())
                .or_else(|| self.linker.kg_uri(id))
            else {
                continue;
            };
            for table in self.entity_table_link.find(id) {
                let _ = writeln!(mentions, "<{TABLE_IRI_PREFIX}{table}> {MENTIONS} <{uri}> .");
                if seen.insert(table.clone()) {
                    let _ = writeln!(types, "<{TABLE_IRI_PREFIX}{table}> {RDF_TYPE} {TABLE_CLASS} .");
                }
            }
        }
        (mentions, types)
    }
}
