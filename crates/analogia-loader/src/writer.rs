//! Concurrent index construction.
//!
//! Per table file: parse, resolve every cell link to a knowledge-graph
//! entity, record its location and collect statistics. Once every file is
//! done: entity and type IDF, the three LSH indexes, then everything is
//! written to the output directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::{AHashMap, AHashSet};
use analogia_store::connector::escape_quotes;
use analogia_store::entity_table_link::Location;
use analogia_store::lsh::{
    EntitySet, NamedTable, SetLshIndex, StoredElements, StoredVectors, VectorLshIndex,
};
use analogia_store::{
    ConnectorError, EmbeddingStore, EmbeddingsIndex, Entity, EntityLinking, EntityResolver,
    EntityTable, EntityTableLink, IdAllocator, KnowledgeGraph, LshError, Table, Type,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::mention_filter::MentionFilter;
use crate::persistence::write_json;
use crate::snapshot::IndexSnapshot;
use crate::stats::TableStats;
use crate::table_file::{parse_table, table_name, JsonTable};

const PROGRESS_EVERY: usize = 100;

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("loading has already completed")]
    AlreadyLoaded,
    #[error("missing files to load")]
    NoFiles,
    #[error("output path {0} is not a directory")]
    NotADirectory(PathBuf),
    #[error("failed to create output directory {path}: {source}")]
    CreateOutput {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to start worker pool: {0}")]
    ThreadPool(String),
    #[error(transparent)]
    Lsh(#[from] LshError),
    #[error("knowledge graph failure: {0}")]
    Graph(#[from] ConnectorError),
    #[error(transparent)]
    Persist(#[from] anyhow::Error),
}

/// Indexes mutated by the load workers, all behind one lock: an entity must
/// be in the entity table before its location is recorded.
struct WriterState {
    linker: EntityLinking,
    entity_table: EntityTable,
    entity_table_link: EntityTableLink,
    embeddings: EmbeddingsIndex,
    tables: Vec<NamedTable>,
    table_stats: BTreeMap<String, TableStats>,
}

impl WriterState {
    fn new(config: &IndexConfig) -> Self {
        Self {
            linker: EntityLinking::new(&config.input_prefix, &config.kg_prefix),
            entity_table: EntityTable::new(),
            entity_table_link: EntityTableLink::new(),
            embeddings: EmbeddingsIndex::new(),
            tables: Vec::new(),
            table_stats: BTreeMap::new(),
        }
    }
}

pub struct IndexWriter {
    files: Vec<PathBuf>,
    output: PathBuf,
    config: IndexConfig,
    ids: Arc<IdAllocator>,
    resolver: Arc<dyn EntityResolver>,
    graph: Arc<dyn KnowledgeGraph>,
    embedding_store: Arc<dyn EmbeddingStore>,

    state: Mutex<WriterState>,
    filter: Mutex<MentionFilter>,
    loaded_tables: AtomicUsize,
    skipped_tables: AtomicUsize,
    cells_with_links: AtomicUsize,
    cell_to_num_links: DashMap<usize, usize>,
    link_to_num_entities: DashMap<usize, usize>,

    started: bool,
    snapshot: Option<IndexSnapshot>,
    table_stats: BTreeMap<String, TableStats>,
    elapsed: Option<Duration>,
}

impl IndexWriter {
    /// Creates `output` if needed. Fails when it exists but is not a
    /// directory, or when `files` is empty.
    pub fn new(
        files: Vec<PathBuf>,
        output: impl Into<PathBuf>,
        config: IndexConfig,
        ids: Arc<IdAllocator>,
        resolver: Arc<dyn EntityResolver>,
        graph: Arc<dyn KnowledgeGraph>,
        embedding_store: Arc<dyn EmbeddingStore>,
    ) -> Result<Self, WriterError> {
        let output = output.into();
        if output.exists() && !output.is_dir() {
            return Err(WriterError::NotADirectory(output));
        }
        if files.is_empty() {
            return Err(WriterError::NoFiles);
        }
        std::fs::create_dir_all(&output).map_err(|source| WriterError::CreateOutput {
            path: output.clone(),
            source,
        })?;

        let mut state = WriterState::new(&config);
        if let Some(parent) = files[0].parent() {
            state
                .entity_table_link
                .set_directory(format!("{}/", parent.display()));
        }
        let filter = MentionFilter::new(config.mention_filter_capacity, config.mention_filter_fpp);

        Ok(Self {
            files,
            output,
            ids,
            resolver,
            graph,
            embedding_store,
            state: Mutex::new(state),
            filter: Mutex::new(filter),
            loaded_tables: AtomicUsize::new(0),
            skipped_tables: AtomicUsize::new(0),
            cells_with_links: AtomicUsize::new(0),
            cell_to_num_links: DashMap::new(),
            link_to_num_entities: DashMap::new(),
            started: false,
            snapshot: None,
            table_stats: BTreeMap::new(),
            elapsed: None,
            config,
        })
    }

    /// Load every table, compute IDFs, build the LSH indexes and write the
    /// index directory. Can only run once.
    pub fn run(&mut self) -> Result<(), WriterError> {
        if self.started {
            return Err(WriterError::AlreadyLoaded);
        }
        self.config.validate()?;
        self.started = true;
        let start = Instant::now();

        let pool = self
            .config
            .thread_pool()
            .map_err(|e| WriterError::ThreadPool(e.to_string()))?;
        let this: &Self = self;
        pool.install(|| {
            this.files
                .par_iter()
                .try_for_each(|path| this.load_table(path).map(|_| ()))
        })?;

        let loaded = self.loaded_tables();
        info!(
            loaded,
            skipped = self.skipped_tables.load(Ordering::Relaxed),
            "table files processed"
        );
        if loaded == 0 {
            return Err(LshError::EmptyCorpus.into());
        }

        let mut state = std::mem::replace(self.state.get_mut(), WriterState::new(&self.config));

        info!("computing IDF weights");
        compute_entity_idfs(&mut state, loaded);
        compute_type_idfs(&mut state.entity_table);

        info!("building LSH indexes");
        let this: &Self = self;
        let snapshot = pool.install(|| {
            this.build_snapshot(
                state.linker,
                state.entity_table,
                state.entity_table_link,
                state.embeddings,
                state.tables,
            )
        })?;

        info!(output = %self.output.display(), "writing indexes and statistics");
        self.table_stats = state.table_stats;
        self.write_stats()?;
        snapshot.write(&self.output, &self.config.file_names)?;
        self.snapshot = Some(snapshot);

        let elapsed = start.elapsed();
        self.elapsed = Some(elapsed);
        info!(loaded, elapsed_secs = elapsed.as_secs_f64(), "index construction finished");
        Ok(())
    }

    fn build_snapshot(
        &self,
        linker: EntityLinking,
        entity_table: EntityTable,
        entity_table_link: EntityTableLink,
        embeddings: EmbeddingsIndex,
        mut tables: Vec<NamedTable>,
    ) -> Result<IndexSnapshot, WriterError> {
        tables.sort_by(|a, b| a.0.cmp(&b.0));
        let elements = StoredElements {
            linker: &linker,
            entities: &entity_table,
        };

        let types_lsh = SetLshIndex::build(
            self.config.set_lsh_config(EntitySet::Types),
            &tables,
            &linker,
            &entity_table,
            &elements,
            &self.ids,
        )?;
        info!("LSH index 1/3 (types) built");
        let predicates_lsh = SetLshIndex::build(
            self.config.set_lsh_config(EntitySet::Predicates),
            &tables,
            &linker,
            &entity_table,
            &elements,
            &self.ids,
        )?;
        info!("LSH index 2/3 (predicates) built");
        let embeddings_lsh = if self.config.build_embeddings_lsh {
            let vectors = StoredVectors {
                linker: &linker,
                embeddings: &embeddings,
            };
            let lsh = VectorLshIndex::build(
                self.config.lsh_params(),
                self.config.vector_cache_capacity,
                &tables,
                &linker,
                &vectors,
            )?;
            info!("LSH index 3/3 (embeddings) built");
            Some(lsh)
        } else {
            None
        };

        Ok(IndexSnapshot {
            linker,
            entity_table,
            entity_table_link,
            embeddings,
            types_lsh,
            predicates_lsh,
            embeddings_lsh,
        })
    }

    /// `Ok(false)` when the file was skipped as unparsable.
    fn load_table(&self, path: &Path) -> Result<bool, WriterError> {
        let table = match parse_table(path) {
            Ok(table) => table,
            Err(err) => {
                warn!(error = %err, "skipping table file");
                self.skipped_tables.fetch_add(1, Ordering::Relaxed);
                return Ok(false);
            }
        };
        let name = table_name(path);
        let mut parsed: Table<String> = Table::new();
        let mut matches: BTreeMap<Location, Vec<String>> = BTreeMap::new();

        for (row, cells) in table.data_rows().iter().enumerate() {
            let mut parsed_row = Vec::new();
            for (column, cell) in cells.iter().enumerate() {
                if cell.links.is_empty() {
                    continue;
                }
                self.cells_with_links.fetch_add(1, Ordering::Relaxed);
                *self.cell_to_num_links.entry(cell.links.len()).or_insert(0) += 1;

                let location = (row as u32, column as u32);
                let mut uris = Vec::new();
                for link in &cell.links {
                    let Some(uri) = self.resolve_link(link)? else {
                        continue;
                    };
                    let mut state = self.state.lock();
                    if let Some(id) = state.linker.kg_uri_lookup(&uri) {
                        state.entity_table_link.add_location(id, &name, &[location]);
                    }
                    uris.push(uri);
                }

                if !uris.is_empty() {
                    let mut filter = self.filter.lock();
                    for uri in &uris {
                        filter.put(uri);
                    }
                    drop(filter);
                    parsed_row.extend(uris.iter().cloned());
                    matches.insert(location, uris);
                }
            }
            parsed.add_row(parsed_row);
        }

        let mut state = self.state.lock();
        let stats = collect_stats(&table, &name, &parsed, &matches, &state);
        state.table_stats.insert(name.clone(), stats);
        state.tables.push((name, parsed));
        drop(state);

        let loaded = self.loaded_tables.fetch_add(1, Ordering::Relaxed) + 1;
        if loaded % PROGRESS_EVERY == 0 {
            info!(loaded, total = self.files.len(), "processed table files");
        }
        Ok(true)
    }

    /// Map a cell link to a KG entity, resolving and registering it on
    /// first sight. Knowledge-graph failures abort the whole run.
    fn resolve_link(&self, link: &str) -> Result<Option<String>, WriterError> {
        match self.state.lock().linker.map_to(link) {
            Ok(Some(uri)) => return Ok(Some(uri)),
            Ok(None) => {}
            Err(err) => {
                debug!(error = %err, "link outside the input namespace");
                return Ok(None);
            }
        }

        let Some(entity) = self.resolver.link(&link.replace("http://www.", "http://en.")) else {
            return Ok(None);
        };
        let mut types = self.graph.search_types(&entity)?;
        let predicates = self.graph.search_predicates(&entity)?;
        types.retain(|t| !self.config.disallowed_types.contains(t));
        let embedding = if self.embedding_store.requires_quote_escaping() {
            self.embedding_store.select(&escape_quotes(&entity))
        } else {
            self.embedding_store.select(&entity)
        };

        let mut state = self.state.lock();
        if let Err(err) = state.linker.add_mapping(link, &entity, &self.ids) {
            warn!(error = %err, "resolved entity outside the knowledge-graph namespace");
            return Ok(None);
        }
        *self.link_to_num_entities.entry(1).or_insert(0) += 1;

        if let Some(id) = state.linker.kg_uri_lookup(&entity) {
            let types = types.into_iter().map(Type::new).collect();
            state.entity_table.insert(id, Entity::new(entity.clone(), types, predicates));
            if let Some(vector) = embedding {
                if let Err(err) = state.embeddings.insert(id, vector) {
                    warn!(error = %err, "embedding skipped");
                }
            }
        }
        Ok(state.linker.map_to(link).ok().flatten())
    }

    fn write_stats(&self) -> Result<(), WriterError> {
        let names = &self.config.file_names;
        let dir = self.output.join(&names.statistics_dir);
        let sorted = |map: &DashMap<usize, usize>| -> BTreeMap<usize, usize> {
            map.iter().map(|e| (*e.key(), *e.value())).collect()
        };
        write_json(
            &dir.join(&names.link_to_entities_frequency),
            &sorted(&self.link_to_num_entities),
        )?;
        write_json(
            &dir.join(&names.cell_to_links_frequency),
            &sorted(&self.cell_to_num_links),
        )?;
        write_json(&dir.join(&names.table_stats), &self.table_stats)?;
        Ok(())
    }

    pub fn loaded_tables(&self) -> usize {
        self.loaded_tables.load(Ordering::Relaxed)
    }

    pub fn skipped_tables(&self) -> usize {
        self.skipped_tables.load(Ordering::Relaxed)
    }

    pub fn cells_with_links(&self) -> usize {
        self.cells_with_links.load(Ordering::Relaxed)
    }

    pub fn approximate_entity_mentions(&self) -> u64 {
        self.filter.lock().approximate_count()
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Per-table statistics, keyed by table file name.
    pub fn table_stats(&self) -> &BTreeMap<String, TableStats> {
        &self.table_stats
    }

    /// The built indexes; `None` until [`run`](Self::run) succeeded.
    pub fn snapshot(&self) -> Option<&IndexSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn into_snapshot(self) -> Option<IndexSnapshot> {
        self.snapshot
    }
}

/// `log10(loaded / tables containing the entity) + 1`.
fn compute_entity_idfs(state: &mut WriterState, loaded: usize) {
    let ids: Vec<_> = state.linker.kg_uri_ids().collect();
    for id in ids {
        let tables = state.entity_table_link.find(id).len();
        if tables == 0 {
            continue;
        }
        if let Some(entity) = state.entity_table.find_mut(id) {
            entity.set_idf((loaded as f64 / tables as f64).log10() + 1.0);
        }
    }
}

/// `log2(entity count / entities carrying the type)`.
fn compute_type_idfs(entities: &mut EntityTable) {
    let mut frequency: AHashMap<String, usize> = AHashMap::new();
    for (_, entity) in entities.iter() {
        let labels: AHashSet<&str> = entity.types().iter().map(Type::label).collect();
        for label in labels {
            *frequency.entry(label.to_string()).or_insert(0) += 1;
        }
    }
    let total = entities.len() as f64;
    for (_, entity) in entities.iter_mut() {
        for t in entity.types_mut() {
            if let Some(count) = frequency.get(t.label()) {
                t.set_idf((total / *count as f64).log2());
            }
        }
    }
}

fn collect_stats(
    json: &JsonTable,
    name: &str,
    parsed: &Table<String>,
    matches: &BTreeMap<Location, Vec<String>>,
    state: &WriterState,
) -> TableStats {
    let rows = json.data_rows().len();
    let columns = json
        .data_rows()
        .iter()
        .map(Vec::len)
        .max()
        .unwrap_or(0)
        .max(json.num_cols);

    let mut per_row = vec![0usize; rows];
    let mut per_column = vec![0usize; columns];
    let mut matches_per_column = vec![0usize; columns];
    let mut cell_to_entity_matches = 0u64;
    let mut entity_count = 0usize;
    let mut seen = AHashSet::new();

    for uri in parsed.rows().iter().flatten() {
        entity_count += 1;
        let Some(id) = state.linker.kg_uri_lookup(uri) else {
            continue;
        };
        if !seen.insert(id) {
            continue;
        }
        for (row, column) in state
            .entity_table_link
            .get_locations(id, name)
            .unwrap_or_default()
        {
            if let Some(count) = per_row.get_mut(*row as usize) {
                *count += 1;
            }
            if let Some(count) = per_column.get_mut(*column as usize) {
                *count += 1;
            }
            cell_to_entity_matches += 1;
        }
    }
    for (_, column) in matches.keys() {
        if let Some(count) = matches_per_column.get_mut(*column as usize) {
            *count += 1;
        }
    }

    let numeric = if json.num_numeric_cols == json.num_cols && json.num_cols > 0 {
        vec![true; columns]
    } else {
        let mut numeric = vec![false; columns];
        if let Some(first) = json.data_rows().first() {
            for (column, cell) in first.iter().enumerate() {
                numeric[column] = cell.is_numeric;
            }
        }
        numeric
    };

    TableStats::builder()
        .rows(rows)
        .columns(columns)
        .cells(rows * columns)
        .entities(entity_count)
        .mapped_cells(matches.len())
        .entities_per_row(per_row)
        .entities_per_column(per_column)
        .cell_to_entity_matches(cell_to_entity_matches)
        .cell_to_entity_matches_per_col(matches_per_column)
        .numeric_table_columns(numeric)
        .finish()
}
