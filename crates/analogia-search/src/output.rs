//! Search reports: one `filenameToScore.json` per query.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use analogia_loader::persistence::write_json;
use analogia_loader::table_file::parse_table;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analogous::AnalogousSearch;
use crate::result::TopK;

pub const WIKIPEDIA_BASE: &str = "https://en.wikipedia.org/wiki/";
pub const REPORT_FILE: &str = "filenameToScore.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreEntry {
    #[serde(rename = "tableID")]
    pub table_id: String,
    pub score: f64,
    pub pg_title: String,
    #[serde(rename = "tableURL")]
    pub table_url: String,
    pub num_entity_mapped_rows: usize,
    pub fraction_of_entity_mapped_rows: f64,
    pub tuple_scores: Vec<f64>,
    pub tuple_vectors: Vec<Vec<f64>>,
    #[serde(
        rename = "tuple_query_alignment",
        skip_serializing_if = "Option::is_none"
    )]
    pub tuple_query_alignment: Option<Vec<Vec<String>>>,
}

/// Coverage figures, present only for embedding similarities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingCoverage {
    pub num_embedding_sim_comparisons: usize,
    pub num_non_embedding_sim_comparisons: usize,
    pub embedding_comparisons_fraction: f64,
    pub num_embedding_coverage_successes: usize,
    pub num_embedding_coverage_fails: usize,
    pub embedding_coverage_success_rate: f64,
    pub query_entities_missing_coverage: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchReport {
    pub scores: Vec<ScoreEntry>,
    /// Seconds.
    pub runtime: f64,
    pub reduction: f64,
    pub threads: usize,
    pub algorithm: String,
    #[serde(flatten)]
    pub coverage: Option<EmbeddingCoverage>,
}

pub fn table_url(pg_title: &str) -> String {
    format!("{WIKIPEDIA_BASE}{}", pg_title.replace(' ', "_"))
}

fn fraction(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

/// Collect the ranked tables of a finished search. Page titles are read back
/// from the table files; unreadable files keep an empty title.
pub fn build_report(search: &AnalogousSearch<'_>, top: &TopK) -> SearchReport {
    let stats = search.table_stats();
    let scores = top
        .results()
        .map(|(table, score)| {
            let pg_title = parse_table(&search.table_dir().join(table))
                .map(|t| t.pg_title)
                .unwrap_or_default();
            let table_stats = stats.get(table).cloned().unwrap_or_default();
            ScoreEntry {
                table_id: table.to_string(),
                score,
                table_url: table_url(&pg_title),
                pg_title,
                num_entity_mapped_rows: table_stats.entity_mapped_rows.unwrap_or(0),
                fraction_of_entity_mapped_rows: table_stats
                    .fraction_of_entity_mapped_rows
                    .unwrap_or(0.0),
                tuple_scores: table_stats.query_row_scores.unwrap_or_default(),
                tuple_vectors: table_stats.query_row_vectors.unwrap_or_default(),
                tuple_query_alignment: table_stats.tuple_query_alignment,
            }
        })
        .collect();

    let config = search.config();
    let coverage = config.entity_similarity.uses_embeddings().then(|| {
        let c = search.counters();
        EmbeddingCoverage {
            num_embedding_sim_comparisons: c.embedding_comparisons,
            num_non_embedding_sim_comparisons: c.non_embedding_comparisons,
            embedding_comparisons_fraction: fraction(
                c.embedding_comparisons,
                c.embedding_comparisons + c.non_embedding_comparisons,
            ),
            num_embedding_coverage_successes: c.embedding_coverage_successes,
            num_embedding_coverage_fails: c.embedding_coverage_fails,
            embedding_coverage_success_rate: fraction(
                c.embedding_coverage_successes,
                c.embedding_coverage_successes + c.embedding_coverage_fails,
            ),
            query_entities_missing_coverage: c.query_entities_missing_coverage,
        }
    });

    SearchReport {
        scores,
        runtime: search.elapsed().unwrap_or_default().as_secs_f64(),
        reduction: search.reduction(),
        threads: config.threads,
        algorithm: config.algorithm(),
        coverage,
    }
}

/// Write `report` to `{output}/search_output/{query}/filenameToScore.json`.
pub fn write_report(output: &Path, query: &str, report: &SearchReport) -> Result<PathBuf> {
    let dir = output.join("search_output").join(query);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(REPORT_FILE);
    write_json(&path, report)?;
    info!(path = %path.display(), tables = report.scores.len(), "wrote search report");
    Ok(path)
}
