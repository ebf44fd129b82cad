//! Analogia CLI
//!
//! - `index`: link a directory of JSON tables to a knowledge graph and
//!   persist the entity and LSH indexes
//! - `search`: rank the indexed tables against query tuples
//! - `load-embeddings`: convert a text embeddings dump to the CBOR format
//! - `inspect`: print the sizes of a persisted index

use std::path::{Path, PathBuf};
use std::sync::Arc;

use analogia_loader::embeddings_file::{read_any, write_cbor, EmbeddingsFileV1};
use analogia_loader::table_file::{collect_table_files, table_name};
use analogia_loader::{IndexConfig, IndexReader, IndexWriter};
use analogia_search::query::{
    ensure_query_entities_mapped, link_query_entities, query_name, read_query_file,
};
use analogia_search::{
    build_report, write_report, AnalogousSearch, EntitySimilarity, Prefilter, PrefilterMode,
    SearchConfig, SimilarityMeasure,
};
use analogia_store::connector::PrefixResolver;
use analogia_store::TextSearch;
use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

mod backends;

#[derive(Parser)]
#[command(name = "analogia")]
#[command(author, version, about = "Analogia: entity-linked table indexing and analogous table search")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a directory of JSON tables.
    Index {
        /// Directory of table files (searched recursively for `*.json`)
        #[arg(long)]
        tables: PathBuf,
        /// Index output directory
        #[arg(long)]
        output: PathBuf,
        /// Knowledge graph JSON (`{uri: {types, predicates, label}}`)
        #[arg(long)]
        graph: PathBuf,
        /// Entity embeddings (text or `.cbor`); without them no embeddings LSH is built
        #[arg(long)]
        embeddings: Option<PathBuf>,
        #[command(flatten)]
        index: IndexArgs,
    },

    /// Rank indexed tables against one query file or a directory of them.
    Search {
        /// Index directory written by `index`
        #[arg(long)]
        index: PathBuf,
        /// Query file (`{"queries": [[uri, ...]]}`) or directory of query files
        #[arg(long)]
        queries: PathBuf,
        /// Restrict the corpus to the tables in this directory (default: the indexed directory)
        #[arg(long)]
        tables: Option<PathBuf>,
        /// Reports go to `<output>/search_output/<query>/`
        #[arg(long)]
        output: PathBuf,
        /// Knowledge graph used to link query entities missing from the index
        #[arg(long)]
        graph: PathBuf,
        #[arg(long)]
        embeddings: Option<PathBuf>,
        #[command(flatten)]
        index_args: IndexArgs,
        #[command(flatten)]
        search: SearchArgs,
    },

    /// Convert a delimiter-separated embeddings dump to CBOR.
    LoadEmbeddings {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value_t = ' ')]
        delimiter: char,
    },

    /// Print the sizes of a persisted index.
    Inspect {
        #[arg(long)]
        index: PathBuf,
        /// Index settings JSON (file names, prefixes)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args)]
struct IndexArgs {
    /// Index settings JSON; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    threads: Option<usize>,
    /// Entity base URI mentions are resolved under (default: `<kg-prefix>resource`)
    #[arg(long)]
    kg_base: Option<String>,
    /// Delimiter of text embedding files
    #[arg(long, default_value_t = ' ')]
    delimiter: char,
}

impl IndexArgs {
    fn config(&self) -> Result<IndexConfig> {
        let mut config = match &self.config {
            Some(path) => IndexConfig::from_json_file(path)?,
            None => IndexConfig::default(),
        };
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        Ok(config)
    }

    fn kg_base(&self, config: &IndexConfig) -> String {
        self.kg_base
            .clone()
            .unwrap_or_else(|| format!("{}resource", config.kg_prefix))
    }
}

#[derive(Args)]
struct SearchArgs {
    /// Search settings JSON; flags below override it
    #[arg(long)]
    search_config: Option<PathBuf>,
    #[arg(long)]
    top_k: Option<usize>,
    /// jaccard_types, jaccard_predicates, embeddings_norm, embeddings_abs or embeddings_ang
    #[arg(long)]
    similarity: Option<EntitySimilarity>,
    /// cosine or euclidean
    #[arg(long)]
    measure: Option<SimilarityMeasure>,
    /// lsh_types, lsh_predicates, lsh_embeddings or bm25
    #[arg(long)]
    prefilter: Option<PrefilterMode>,
    /// Bands an entity must share with a table to make it a prefilter candidate
    #[arg(long)]
    vote: Option<usize>,
    #[arg(long)]
    single_column_per_query_entity: bool,
    #[arg(long)]
    weighted_jaccard: bool,
    #[arg(long)]
    adjusted_similarity: bool,
    #[arg(long)]
    use_max_similarity_per_column: bool,
    #[arg(long)]
    same_alignment_across_tuples: bool,
}

impl SearchArgs {
    fn config(&self, threads: Option<usize>) -> Result<SearchConfig> {
        let mut config: SearchConfig = match &self.search_config {
            Some(path) => {
                let raw = std::fs::read(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                serde_json::from_slice(&raw)
                    .with_context(|| format!("malformed search settings {}", path.display()))?
            }
            None => SearchConfig::default(),
        };
        if let Some(threads) = threads {
            config.threads = threads;
        }
        if let Some(k) = self.top_k {
            config.top_k = k;
        }
        if let Some(similarity) = self.similarity {
            config.entity_similarity = similarity;
        }
        if let Some(measure) = self.measure {
            config.similarity_measure = measure;
        }
        if let Some(prefilter) = self.prefilter {
            config.prefilter = Some(prefilter);
        }
        if let Some(vote) = self.vote {
            config.vote = vote;
        }
        config.single_column_per_query_entity |= self.single_column_per_query_entity;
        config.weighted_jaccard |= self.weighted_jaccard;
        config.adjusted_similarity |= self.adjusted_similarity;
        config.use_max_similarity_per_column |= self.use_max_similarity_per_column;
        config.same_alignment_across_tuples |= self.same_alignment_across_tuples;
        if config.weighted_jaccard && config.entity_similarity != EntitySimilarity::JaccardTypes {
            return Err(anyhow!("--weighted-jaccard only applies to jaccard_types"));
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Index {
            tables,
            output,
            graph,
            embeddings,
            index,
        } => cmd_index(&tables, &output, &graph, embeddings.as_deref(), &index),
        Commands::Search {
            index,
            queries,
            tables,
            output,
            graph,
            embeddings,
            index_args,
            search,
        } => cmd_search(
            &index,
            &queries,
            tables.as_deref(),
            &output,
            &graph,
            embeddings.as_deref(),
            &index_args,
            &search,
        ),
        Commands::LoadEmbeddings {
            input,
            output,
            delimiter,
        } => cmd_load_embeddings(&input, &output, delimiter),
        Commands::Inspect { index, config } => cmd_inspect(&index, config.as_deref()),
    }
}

fn cmd_index(
    tables: &Path,
    output: &Path,
    graph: &Path,
    embeddings: Option<&Path>,
    args: &IndexArgs,
) -> Result<()> {
    let mut config = args.config()?;
    if embeddings.is_none() {
        config.build_embeddings_lsh = false;
    }
    println!("{} {}", "Indexing".green().bold(), tables.display());

    std::fs::create_dir_all(output)
        .with_context(|| format!("failed to create {}", output.display()))?;
    let files = collect_table_files(tables);
    let ids = backends::id_allocator(output, &config.file_names.id_store)?;
    let resolver = PrefixResolver::new(args.kg_base(&config));
    let graph = backends::load_graph(graph)?;
    let store = backends::load_embeddings(embeddings, args.delimiter)?;

    let mut writer = IndexWriter::new(
        files,
        output,
        config,
        Arc::new(ids),
        Arc::new(resolver),
        Arc::new(graph),
        Arc::new(store),
    )?;
    writer.run()?;

    let snapshot = writer
        .snapshot()
        .ok_or_else(|| anyhow!("index writer produced no snapshot"))?;
    println!("  Tables loaded: {}", writer.loaded_tables());
    println!("  Tables skipped: {}", writer.skipped_tables());
    println!("  Cells with links: {}", writer.cells_with_links());
    println!("  Entities: {}", snapshot.entity_table.len());
    println!("  Embeddings: {}", snapshot.embeddings.len());
    println!(
        "  Distinct entity mentions (approx.): {}",
        writer.approximate_entity_mentions()
    );
    if let Some(elapsed) = writer.elapsed() {
        println!("  Elapsed: {:.2}s", elapsed.as_secs_f64());
    }
    println!("{} {}", "Wrote".green(), output.display().to_string().cyan());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_search(
    index: &Path,
    queries: &Path,
    tables: Option<&Path>,
    output: &Path,
    graph: &Path,
    embeddings: Option<&Path>,
    index_args: &IndexArgs,
    args: &SearchArgs,
) -> Result<()> {
    let index_config = index_args.config()?;
    let config = args.config(index_args.threads)?;
    let id_file = index_config.file_names.id_store.clone();

    let mut reader = IndexReader::new(index, index_config)?;
    reader.load()?;
    let ids = backends::id_allocator(index, &id_file)?;
    reader.observe_ids(&ids);
    let mut snapshot = reader
        .into_snapshot()
        .ok_or_else(|| anyhow!("index {} did not load", index.display()))?;
    let graph = backends::load_graph(graph)?;
    let store = backends::load_embeddings(embeddings, index_args.delimiter)?;

    let table_dir = match tables {
        Some(dir) => dir.to_path_buf(),
        None => PathBuf::from(snapshot.entity_table_link.directory().unwrap_or_default()),
    };
    let keywords = (config.prefilter == Some(PrefilterMode::Bm25))
        .then(|| backends::keyword_index(&table_dir));

    let query_files = if queries.is_dir() {
        collect_table_files(queries)
    } else {
        vec![queries.to_path_buf()]
    };
    println!(
        "{} {} quer{} against {}",
        "Searching".green().bold(),
        query_files.len(),
        if query_files.len() == 1 { "y" } else { "ies" },
        index.display()
    );

    for path in &query_files {
        let query = read_query_file(path)?;
        if !ensure_query_entities_mapped(&query, &snapshot.linker, &snapshot.entity_table_link) {
            link_query_entities(&query, &mut snapshot, &graph, &store, &ids)?;
        }

        let mut search = AnalogousSearch::new(&snapshot, config.clone());
        if let Some(dir) = tables {
            search = search.with_table_dir(dir);
            search.set_corpus(collect_table_files(dir).iter().map(|f| table_name(f)));
        }
        if let Some(mode) = config.prefilter {
            let text = keywords.as_ref().map(|k| k as &dyn TextSearch);
            search = search.with_prefilter(Prefilter::new(mode, &snapshot, text, config.vote)?);
        }
        let top = search.search(&query)?;
        let report = build_report(&search, &top);
        let written = write_report(output, &query_name(path), &report)?;

        println!("  {} ({} tuples)", query_name(path).yellow(), query.row_count());
        for (rank, entry) in report.scores.iter().take(10).enumerate() {
            println!(
                "    {:>2}. {} {:.4} {}",
                rank + 1,
                entry.table_id.cyan(),
                entry.score,
                entry.pg_title
            );
        }
        println!("    {} {}", "Wrote".green(), written.display());
    }
    Ok(())
}

fn cmd_load_embeddings(input: &Path, output: &Path, delimiter: char) -> Result<()> {
    let items: Vec<_> = read_any(input, delimiter)?
        .into_iter()
        .filter(|item| !item.vector.is_empty())
        .collect();
    let file = EmbeddingsFileV1::new(items)?;
    write_cbor(output, &file)?;
    println!(
        "{} {} embeddings ({} dimensions) to {}",
        "Wrote".green(),
        file.items.len(),
        file.dim,
        output.display()
    );
    Ok(())
}

fn cmd_inspect(index: &Path, config: Option<&Path>) -> Result<()> {
    let config = match config {
        Some(path) => IndexConfig::from_json_file(path)?,
        None => IndexConfig::default(),
    };
    let mut reader = IndexReader::new(index, config)?;
    reader.load()?;
    let snapshot = reader
        .snapshot()
        .ok_or_else(|| anyhow!("index {} did not load", index.display()))?;

    println!("{} {}", "Index".green().bold(), index.display());
    println!("  Tables: {}", snapshot.entity_table_link.tables().len());
    println!("  Linked entities: {}", snapshot.linker.kg_entity_count());
    println!("  Entities: {}", snapshot.entity_table.len());
    println!("  Types: {}", snapshot.entity_table.all_type_labels().len());
    println!("  Predicates: {}", snapshot.entity_table.all_predicates().len());
    match snapshot.embeddings.dimension() {
        Some(dim) => println!("  Embeddings: {} ({dim} dimensions)", snapshot.embeddings.len()),
        None => println!("  Embeddings: 0"),
    }
    println!("  Types LSH tables: {}", snapshot.types_lsh.table_names().len());
    println!(
        "  Predicates LSH tables: {}",
        snapshot.predicates_lsh.table_names().len()
    );
    match &snapshot.embeddings_lsh {
        Some(lsh) => println!(
            "  Embeddings LSH tables: {} ({} projections)",
            lsh.table_names().len(),
            lsh.projection_count()
        ),
        None => println!("  Embeddings LSH: {}", "not built".yellow()),
    }
    if let Some(elapsed) = reader.elapsed() {
        println!("  Load time: {:.2}s", elapsed.as_secs_f64());
    }
    Ok(())
}
