//! Candidate generation that narrows the corpus before exhaustive scoring.
//!
//! Each query column becomes one aggregated lookup: the set of entities in
//! that column is hashed (LSH modes) or used as keywords (BM25 mode). Long
//! queries are split into sub-queries of [`SPLIT_SIZE`] tuples, and a table
//! must then be a candidate for at least [`MIN_EXISTS_IN`] of them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use analogia_loader::IndexSnapshot;
use analogia_store::lsh::{SetLshIndex, StoredElements, StoredVectors, VectorLshIndex};
use analogia_store::{Table, TextSearch};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SearchError;

/// Queries with at least this many tuples are split.
pub const SIZE_THRESHOLD: usize = 8;
pub const SPLIT_SIZE: usize = 3;
pub const MIN_EXISTS_IN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrefilterMode {
    LshTypes,
    LshPredicates,
    LshEmbeddings,
    Bm25,
}

impl PrefilterMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PrefilterMode::LshTypes => "LSH_TYPES",
            PrefilterMode::LshPredicates => "LSH_PREDICATES",
            PrefilterMode::LshEmbeddings => "LSH_EMBEDDINGS",
            PrefilterMode::Bm25 => "BM25",
        }
    }
}

impl fmt::Display for PrefilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrefilterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "lsh_types" => Ok(PrefilterMode::LshTypes),
            "lsh_predicates" => Ok(PrefilterMode::LshPredicates),
            "lsh_embeddings" => Ok(PrefilterMode::LshEmbeddings),
            "bm25" => Ok(PrefilterMode::Bm25),
            other => Err(format!(
                "unknown prefilter `{other}` (expected lsh_types, lsh_predicates, lsh_embeddings or bm25)"
            )),
        }
    }
}

enum Candidates<'a> {
    Sets {
        lsh: &'a SetLshIndex,
        source: StoredElements<'a>,
    },
    Vectors {
        lsh: &'a VectorLshIndex,
        source: StoredVectors<'a>,
    },
    Text(&'a dyn TextSearch),
}

pub struct Prefilter<'a> {
    mode: PrefilterMode,
    candidates: Candidates<'a>,
    vote: usize,
    elapsed: Option<Duration>,
}

impl<'a> Prefilter<'a> {
    /// `text` is only consulted in BM25 mode.
    pub fn new(
        mode: PrefilterMode,
        index: &'a IndexSnapshot,
        text: Option<&'a dyn TextSearch>,
        vote: usize,
    ) -> Result<Self, SearchError> {
        let elements = || StoredElements {
            linker: &index.linker,
            entities: &index.entity_table,
        };
        let candidates = match mode {
            PrefilterMode::LshTypes => Candidates::Sets {
                lsh: &index.types_lsh,
                source: elements(),
            },
            PrefilterMode::LshPredicates => Candidates::Sets {
                lsh: &index.predicates_lsh,
                source: elements(),
            },
            PrefilterMode::LshEmbeddings => Candidates::Vectors {
                lsh: index
                    .embeddings_lsh
                    .as_ref()
                    .ok_or(SearchError::PrefilterUnavailable {
                        mode: mode.as_str(),
                        missing: "an embeddings LSH index",
                    })?,
                source: StoredVectors {
                    linker: &index.linker,
                    embeddings: &index.embeddings,
                },
            },
            PrefilterMode::Bm25 => Candidates::Text(text.ok_or(
                SearchError::PrefilterUnavailable {
                    mode: mode.as_str(),
                    missing: "a text search backend",
                },
            )?),
        };
        Ok(Self {
            mode,
            candidates,
            vote: vote.max(1),
            elapsed: None,
        })
    }

    pub fn mode(&self) -> PrefilterMode {
        self.mode
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    /// Names of the candidate tables for `query`.
    pub fn search(&mut self, query: &Table<String>) -> Result<BTreeSet<String>, SearchError> {
        let start = Instant::now();
        let split = query.row_count() >= SIZE_THRESHOLD;
        let sub_queries: Vec<&[Vec<String>]> = if split {
            query.rows().chunks(SPLIT_SIZE).collect()
        } else {
            vec![query.rows()]
        };

        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for sub_query in &sub_queries {
            for table in self.search_rows(sub_query)? {
                *counts.entry(table).or_insert(0) += 1;
            }
        }
        let retained: BTreeSet<String> = counts
            .into_iter()
            .filter(|(_, n)| !split || *n >= MIN_EXISTS_IN)
            .map(|(table, _)| table)
            .collect();

        self.elapsed = Some(start.elapsed());
        debug!(
            mode = %self.mode,
            sub_queries = sub_queries.len(),
            candidates = retained.len(),
            "prefilter finished"
        );
        Ok(retained)
    }

    fn search_rows(&self, rows: &[Vec<String>]) -> Result<BTreeSet<String>, SearchError> {
        let mut found = BTreeSet::new();
        let Some(first) = rows.first() else {
            return Ok(found);
        };
        for column in 0..first.len() {
            let entities: Vec<&str> = rows
                .iter()
                .filter_map(|row| row.get(column).map(String::as_str))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            found.extend(self.lookup(&entities)?);
        }
        Ok(found)
    }

    fn lookup(&self, entities: &[&str]) -> Result<BTreeSet<String>, SearchError> {
        Ok(match &self.candidates {
            Candidates::Sets { lsh, source } => lsh.aggregated_search(self.vote, entities, source)?,
            Candidates::Vectors { lsh, source } => {
                lsh.aggregated_search(self.vote, entities, source)?
            }
            Candidates::Text(text) => {
                let terms: Vec<String> = entities.iter().map(|e| e.to_string()).collect();
                text.search(&terms).into_iter().map(|(table, _)| table).collect()
            }
        })
    }
}
