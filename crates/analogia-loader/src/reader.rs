//! Loads an index directory written by [`IndexWriter`](crate::writer::IndexWriter).

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use analogia_store::lsh::{SetLshIndex, VectorLshIndex};
use analogia_store::{EmbeddingsIndex, EntityLinking, EntityTable, EntityTableLink, IdAllocator};
use anyhow::{anyhow, Result};
use tracing::info;

use crate::config::IndexConfig;
use crate::persistence::{read_blob, BlobKind};
use crate::snapshot::IndexSnapshot;

pub struct IndexReader {
    dir: PathBuf,
    config: IndexConfig,
    snapshot: Option<IndexSnapshot>,
    elapsed: Option<Duration>,
}

impl IndexReader {
    pub fn new(dir: impl Into<PathBuf>, config: IndexConfig) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(anyhow!("index directory {} does not exist", dir.display()));
        }
        Ok(Self {
            dir,
            config,
            snapshot: None,
            elapsed: None,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read every index on a pool of `config.threads` workers. The embeddings
    /// LSH is optional: it is skipped when the file is absent.
    pub fn load(&mut self) -> Result<()> {
        let start = Instant::now();
        let pool = self.config.thread_pool()?;
        let (core, lsh) = pool.install(|| rayon::join(|| self.read_core(), || self.read_lsh()));
        let (linker, entity_table, entity_table_link, embeddings) = core?;
        let (types_lsh, predicates_lsh, embeddings_lsh) = lsh?;

        let snapshot = IndexSnapshot {
            linker,
            entity_table,
            entity_table_link,
            embeddings,
            types_lsh,
            predicates_lsh,
            embeddings_lsh,
        };
        let elapsed = start.elapsed();
        info!(
            dir = %self.dir.display(),
            entities = snapshot.entity_table.len(),
            tables = snapshot.entity_table_link.tables().len(),
            embeddings_lsh = snapshot.embeddings_lsh.is_some(),
            elapsed_secs = elapsed.as_secs_f64(),
            "indexes loaded"
        );
        self.snapshot = Some(snapshot);
        self.elapsed = Some(elapsed);
        Ok(())
    }

    fn read_core(&self) -> Result<(EntityLinking, EntityTable, EntityTableLink, EmbeddingsIndex)> {
        let names = &self.config.file_names;
        let ((linker, entities), (link, embeddings)) = rayon::join(
            || {
                rayon::join(
                    || read_blob::<EntityLinking>(&self.dir.join(&names.entity_linker), BlobKind::EntityLinker),
                    || read_blob::<EntityTable>(&self.dir.join(&names.entity_table), BlobKind::EntityTable),
                )
            },
            || {
                rayon::join(
                    || read_blob::<EntityTableLink>(&self.dir.join(&names.entity_to_tables), BlobKind::EntityToTables),
                    || read_blob::<EmbeddingsIndex>(&self.dir.join(&names.embeddings_index), BlobKind::EmbeddingsIndex),
                )
            },
        );
        Ok((linker?, entities?, link?, embeddings?))
    }

    fn read_lsh(&self) -> Result<(SetLshIndex, SetLshIndex, Option<VectorLshIndex>)> {
        let names = &self.config.file_names;
        let (types, (predicates, vectors)) = rayon::join(
            || read_blob::<SetLshIndex>(&self.dir.join(&names.types_lsh), BlobKind::TypesLsh),
            || {
                rayon::join(
                    || read_blob::<SetLshIndex>(&self.dir.join(&names.predicates_lsh), BlobKind::PredicatesLsh),
                    || self.read_embeddings_lsh(),
                )
            },
        );
        Ok((types?, predicates?, vectors?))
    }

    fn read_embeddings_lsh(&self) -> Result<Option<VectorLshIndex>> {
        let path = self.dir.join(&self.config.file_names.embeddings_lsh);
        if !path.exists() {
            return Ok(None);
        }
        let mut lsh: VectorLshIndex = read_blob(&path, BlobKind::EmbeddingsLsh)?;
        lsh.set_cache_capacity(self.config.vector_cache_capacity);
        Ok(Some(lsh))
    }

    /// Make `ids` hand out identifiers beyond everything the loaded linker uses.
    pub fn observe_ids(&self, ids: &IdAllocator) {
        if let Some(max) = self.snapshot.as_ref().and_then(|s| s.linker.max_id()) {
            ids.observe(max);
        }
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    pub fn snapshot(&self) -> Option<&IndexSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn into_snapshot(self) -> Option<IndexSnapshot> {
        self.snapshot
    }

    pub fn linker(&self) -> Option<&EntityLinking> {
        self.snapshot.as_ref().map(|s| &s.linker)
    }

    pub fn entity_table(&self) -> Option<&EntityTable> {
        self.snapshot.as_ref().map(|s| &s.entity_table)
    }

    pub fn entity_table_link(&self) -> Option<&EntityTableLink> {
        self.snapshot.as_ref().map(|s| &s.entity_table_link)
    }

    pub fn embeddings(&self) -> Option<&EmbeddingsIndex> {
        self.snapshot.as_ref().map(|s| &s.embeddings)
    }

    pub fn types_lsh(&self) -> Option<&SetLshIndex> {
        self.snapshot.as_ref().map(|s| &s.types_lsh)
    }

    pub fn predicates_lsh(&self) -> Option<&SetLshIndex> {
        self.snapshot.as_ref().map(|s| &s.predicates_lsh)
    }

    pub fn embeddings_lsh(&self) -> Option<&VectorLshIndex> {
        self.snapshot.as_ref().and_then(|s| s.embeddings_lsh.as_ref())
    }
}
