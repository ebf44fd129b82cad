use std::path::{Path, PathBuf};
use std::sync::Arc;

use analogia_loader::table_file::collect_table_files;
use analogia_loader::{IndexConfig, IndexSnapshot, IndexWriter};
use analogia_store::connector::{InMemoryEmbeddings, InMemoryGraph, PrefixResolver, TokenTextSearch};
use analogia_store::{IdAllocator, Table};
use approx::assert_relative_eq;
use serde_json::json;

use crate::analogous::{AnalogousSearch, EntitySimilarity, SearchConfig, ADJUSTED_CAP};
use crate::error::SearchError;
use crate::output::build_report;
use crate::prefilter::{Prefilter, PrefilterMode};
use crate::query::{ensure_query_entities_mapped, link_query_entities};

const WIKI: &str = "http://www.wikipedia.org/wiki/";
const DBPEDIA: &str = "http://dbpedia.org/resource/";

fn kg(name: &str) -> String {
    format!("{DBPEDIA}{name}")
}

fn query(rows: &[&[&str]]) -> Table<String> {
    Table::from_rows(
        rows.iter()
            .map(|row| row.iter().map(|name| kg(name)).collect())
            .collect(),
    )
}

/// Every cell links to the Wikipedia page named by its text; headers are
/// `col0`, `col1`, ...
fn write_table(dir: &Path, name: &str, title: &str, rows: &[&[&str]]) {
    let cells: Vec<_> = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|text| json!({"text": text, "links": [format!("{WIKI}{text}")]}))
                .collect::<Vec<_>>()
        })
        .collect();
    let cols = rows.first().map_or(0, |r| r.len());
    let headers: Vec<_> = (0..cols).map(|c| json!({"text": format!("col{c}")})).collect();
    let table = json!({
        "_id": name,
        "pgTitle": title,
        "numCols": cols,
        "numDataRows": rows.len(),
        "headers": headers,
        "rows": cells,
    });
    std::fs::write(dir.join(format!("{name}.json")), table.to_string()).unwrap();
}

fn corpus(dir: &Path) -> Vec<PathBuf> {
    write_table(dir, "table-1", "European capitals", &[&["Berlin"], &["Paris"]]);
    write_table(dir, "table-2", "Cities", &[&["Paris"], &["Rome"]]);
    write_table(dir, "table-3", "Southern cities", &[&["Rome"], &["Madrid"]]);
    write_table(dir, "table-4", "Physicists", &[&["Einstein"]]);
    write_table(dir, "table-5", "Cities", &[&["Madrid"], &["Berlin"]]);
    write_table(dir, "pairs", "Twin cities", &[&["Rome", "Berlin"], &["Madrid", "Paris"]]);
    collect_table_files(dir)
}

fn graph() -> InMemoryGraph {
    InMemoryGraph::new()
        .with_entity(&kg("Berlin"), &["City", "Capital"], &["country", "mayor"])
        .with_entity(&kg("Paris"), &["City", "Capital"], &["country", "mayor"])
        .with_entity(&kg("Rome"), &["City"], &["country"])
        .with_entity(&kg("Madrid"), &["City"], &["country"])
        .with_entity(&kg("Einstein"), &["Person"], &["birthPlace"])
        .with_entity(&kg("Tokyo"), &["City", "Capital"], &["country"])
}

fn embeddings() -> InMemoryEmbeddings {
    [
        ("Berlin", vec![1.0, 0.0]),
        ("Paris", vec![0.9, 0.1]),
        ("Rome", vec![0.0, 1.0]),
        ("Madrid", vec![0.1, 0.9]),
        ("Einstein", vec![-1.0, 0.0]),
    ]
    .into_iter()
    .map(|(name, v)| (kg(name), v))
    .collect()
}

struct Fixture {
    tables: tempfile::TempDir,
    _output: tempfile::TempDir,
    ids: Arc<IdAllocator>,
    snapshot: IndexSnapshot,
}

fn index(config: IndexConfig) -> Fixture {
    let tables = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let ids = Arc::new(IdAllocator::in_memory());
    let mut writer = IndexWriter::new(
        corpus(tables.path()),
        output.path(),
        config,
        Arc::clone(&ids),
        Arc::new(PrefixResolver::new(DBPEDIA)),
        Arc::new(graph()),
        Arc::new(embeddings()),
    )
    .unwrap();
    writer.run().unwrap();
    let snapshot = writer.into_snapshot().unwrap();
    Fixture {
        tables,
        _output: output,
        ids,
        snapshot,
    }
}

#[test]
fn test_ranking_by_type_similarity() {
    let fixture = index(IndexConfig::default());
    let mut search = AnalogousSearch::new(&fixture.snapshot, SearchConfig::default());
    assert_eq!(search.corpus().len(), 6);

    let top = search.search(&query(&[&["Berlin"]])).unwrap();
    let ranked: Vec<(&str, f64)> = top.results().collect();
    let names: Vec<&str> = ranked.iter().map(|(t, _)| *t).collect();
    assert_eq!(
        names,
        vec!["pairs.json", "table-1.json", "table-2.json", "table-5.json", "table-3.json", "table-4.json"]
    );
    assert_relative_eq!(ranked[1].1, 1.0);
    // Paris 1.0 and Rome 0.5 average to 0.75.
    assert_relative_eq!(ranked[2].1, 1.0 / 1.25);
    assert_relative_eq!(ranked[4].1, 1.0 / 1.5);
    assert_relative_eq!(ranked[5].1, 0.5);
    assert_eq!(search.parsed_tables(), 6);
    assert!(search.elapsed().is_some());

    let stats = &search.table_stats()["table-2.json"];
    assert_eq!(stats.entity_mapped_rows, Some(2));
    assert_eq!(stats.fraction_of_entity_mapped_rows, Some(1.0));
    assert_eq!(stats.query_row_vectors, Some(vec![vec![0.75]]));
    assert!(stats.tuple_query_alignment.is_none());
}

#[test]
fn test_single_column_alignment() {
    let fixture = index(IndexConfig::default());
    let config = SearchConfig {
        single_column_per_query_entity: true,
        ..SearchConfig::default()
    };
    let mut search = AnalogousSearch::new(&fixture.snapshot, config);
    search.set_corpus(["some/dir/pairs.json", "table-1.json"]);

    let top = search.search(&query(&[&["Berlin", "Rome"]])).unwrap();
    let pairs = &search.table_stats()["pairs.json"];
    assert_eq!(
        pairs.tuple_query_alignment,
        Some(vec![vec!["col1".to_string(), "col0".to_string()]])
    );
    let ranked: Vec<(&str, f64)> = top.results().collect();
    assert_eq!(ranked[0].0, "pairs.json");
    assert_relative_eq!(ranked[0].1, 1.0);

    // One column: Rome stays unaligned and contributes 0.
    let single = &search.table_stats()["table-1.json"];
    assert_eq!(single.tuple_query_alignment, Some(vec![vec!["col0".to_string()]]));
    assert_eq!(single.query_row_vectors, Some(vec![vec![1.0, 0.0]]));
}

#[test]
fn test_query_validation() {
    let fixture = index(IndexConfig::default());
    let mut search = AnalogousSearch::new(&fixture.snapshot, SearchConfig::default());
    assert!(matches!(
        search.search(&Table::from_rows(vec![vec![]])),
        Err(SearchError::EmptyQuery)
    ));
    assert!(matches!(
        search.search(&query(&[&["Berlin", "Tokyo"]])),
        Err(SearchError::UnlinkedQueryEntity(uri)) if uri == kg("Tokyo")
    ));
}

#[test]
fn test_entity_similarity_modes() {
    let fixture = index(IndexConfig::default());
    let (berlin, paris, rome) = (kg("Berlin"), kg("Paris"), kg("Rome"));

    let plain = AnalogousSearch::new(&fixture.snapshot, SearchConfig::default());
    assert_relative_eq!(plain.entity_similarity(&berlin, &paris), 1.0);
    assert_relative_eq!(plain.entity_similarity(&berlin, &rome), 0.5);

    let adjusted = AnalogousSearch::new(
        &fixture.snapshot,
        SearchConfig {
            adjusted_similarity: true,
            ..SearchConfig::default()
        },
    );
    assert_relative_eq!(adjusted.entity_similarity(&berlin, &paris), ADJUSTED_CAP);
    assert_relative_eq!(adjusted.entity_similarity(&berlin, &berlin), 1.0);

    let weighted = AnalogousSearch::new(
        &fixture.snapshot,
        SearchConfig {
            weighted_jaccard: true,
            ..SearchConfig::default()
        },
    );
    let city = (5.0f64 / 4.0).log2();
    let capital = (5.0f64 / 2.0).log2();
    assert_relative_eq!(weighted.entity_similarity(&berlin, &rome), city / (city + capital));

    let predicates = AnalogousSearch::new(
        &fixture.snapshot,
        SearchConfig {
            entity_similarity: EntitySimilarity::JaccardPredicates,
            ..SearchConfig::default()
        },
    );
    assert_relative_eq!(predicates.entity_similarity(&berlin, &rome), 0.5);

    let angular = AnalogousSearch::new(
        &fixture.snapshot,
        SearchConfig {
            entity_similarity: EntitySimilarity::EmbeddingsAng,
            ..SearchConfig::default()
        },
    );
    assert_relative_eq!(angular.entity_similarity(&berlin, &rome), 0.5);
    assert_relative_eq!(angular.entity_similarity(&berlin, &kg("Einstein")), 0.0);
    assert_eq!(angular.counters().embedding_comparisons, 2);
}

#[test]
fn test_embedding_coverage() {
    let mut fixture = index(IndexConfig::default());
    let tokyo = query(&[&["Tokyo"]]);
    assert!(!ensure_query_entities_mapped(
        &tokyo,
        &fixture.snapshot.linker,
        &fixture.snapshot.entity_table_link
    ));
    link_query_entities(
        &tokyo,
        &mut fixture.snapshot,
        &graph(),
        &embeddings(),
        &fixture.ids,
    )
    .unwrap();
    assert!(fixture.snapshot.linker.kg_uri_lookup(&kg("Tokyo")).is_some());

    let config = SearchConfig {
        entity_similarity: EntitySimilarity::EmbeddingsNorm,
        ..SearchConfig::default()
    };
    let mut search = AnalogousSearch::new(&fixture.snapshot, config.clone());
    let top = search.search(&tokyo).unwrap();
    assert!(top.results().all(|(_, score)| score == 0.0));
    let counters = search.counters();
    assert_eq!(counters.embedding_coverage_successes, 0);
    // One failed check per entity-mapped row: 2 + 2 + 2 + 1 + 2 + 2.
    assert_eq!(counters.embedding_coverage_fails, 11);
    assert!(counters.query_entities_missing_coverage.contains(&kg("Tokyo")));

    let mut search = AnalogousSearch::new(&fixture.snapshot, config);
    search.search(&query(&[&["Berlin"]])).unwrap();
    let counters = search.counters();
    assert_eq!(counters.embedding_coverage_successes, 11);
    assert_eq!(counters.embedding_coverage_fails, 0);
    assert_eq!(counters.non_embedding_comparisons, 0);
    assert!(counters.embedding_comparisons > 0);
}

#[test]
fn test_keyword_prefilter_reduces_corpus() {
    let fixture = index(IndexConfig::default());
    let mut text = TokenTextSearch::new();
    for file in collect_table_files(fixture.tables.path()) {
        let table = analogia_loader::table_file::parse_table(&file).unwrap();
        let words: Vec<&str> = table
            .data_rows()
            .iter()
            .flatten()
            .map(|cell| cell.text.as_str())
            .collect();
        text.add_document(analogia_loader::table_file::table_name(&file), &words.join(" "));
    }

    let config = SearchConfig {
        prefilter: Some(PrefilterMode::Bm25),
        ..SearchConfig::default()
    };
    let prefilter = Prefilter::new(PrefilterMode::Bm25, &fixture.snapshot, Some(&text), 1).unwrap();
    let mut search = AnalogousSearch::new(&fixture.snapshot, config).with_prefilter(prefilter);
    let top = search.search(&query(&[&["Berlin"]])).unwrap();

    assert_eq!(
        top.table_names(),
        vec!["pairs.json", "table-1.json", "table-5.json"]
    );
    assert_relative_eq!(search.reduction(), 0.5);

    let report = build_report(&search, &top);
    assert_eq!(report.scores[1].pg_title, "European capitals");
    assert_eq!(
        report.scores[1].table_url,
        "https://en.wikipedia.org/wiki/European_capitals"
    );
    assert!(report.algorithm.starts_with("BM25 brute-force with average"));
    assert!(report.coverage.is_none());
}

#[test]
fn test_lsh_prefilter() {
    let fixture = index(IndexConfig::default());
    let mut prefilter =
        Prefilter::new(PrefilterMode::LshPredicates, &fixture.snapshot, None, 1).unwrap();
    let candidates = prefilter.search(&query(&[&["Einstein"]])).unwrap();
    assert!(candidates.contains("table-4.json"), "{candidates:?}");
    assert!(prefilter.elapsed().is_some());

    assert!(matches!(
        Prefilter::new(PrefilterMode::Bm25, &fixture.snapshot, None, 1),
        Err(SearchError::PrefilterUnavailable { mode: "BM25", .. })
    ));

    let without_vectors = index(IndexConfig {
        build_embeddings_lsh: false,
        ..IndexConfig::default()
    });
    assert!(matches!(
        Prefilter::new(PrefilterMode::LshEmbeddings, &without_vectors.snapshot, None, 1),
        Err(SearchError::PrefilterUnavailable { .. })
    ));
}

#[test]
fn test_long_queries_are_split() {
    let fixture = index(IndexConfig::default());
    let mut text = TokenTextSearch::new();
    text.add_document("a.json", "berlin paris");
    text.add_document("b.json", "berlin");
    let mut prefilter = Prefilter::new(PrefilterMode::Bm25, &fixture.snapshot, Some(&text), 1).unwrap();

    // Nine tuples: three sub-queries; "b.json" only matches the first.
    let mut rows: Vec<&[&str]> = vec![&["Berlin"][..]];
    rows.extend(std::iter::repeat(&["Paris"][..]).take(8));
    let candidates = prefilter.search(&query(&rows)).unwrap();
    assert_eq!(candidates.into_iter().collect::<Vec<_>>(), vec!["a.json"]);
}
