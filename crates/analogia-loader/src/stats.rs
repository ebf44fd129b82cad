//! Per-table descriptive statistics.
//!
//! Written once per table: by the index writer (shape and entity coverage)
//! or by the search (per-tuple scores and alignment). Unset fields are not
//! serialized.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_cols: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_cells: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_entities: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_mapped_cells: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities_per_row: Option<Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities_per_column: Option<Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell_to_entity_matches: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell_to_entity_matches_per_col: Option<Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric_table_columns: Option<Vec<bool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_mapped_rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fraction_of_entity_mapped_rows: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tuple_query_alignment: Option<Vec<Vec<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_row_scores: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_row_vectors: Option<Vec<Vec<f64>>>,
}

impl TableStats {
    pub fn builder() -> TableStatsBuilder {
        TableStatsBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct TableStatsBuilder {
    stats: TableStats,
}

impl TableStatsBuilder {
    pub fn rows(mut self, count: usize) -> Self {
        self.stats.num_rows = Some(count);
        self
    }

    pub fn columns(mut self, count: usize) -> Self {
        self.stats.num_cols = Some(count);
        self
    }

    pub fn cells(mut self, count: usize) -> Self {
        self.stats.num_cells = Some(count);
        self
    }

    pub fn entities(mut self, count: usize) -> Self {
        self.stats.num_entities = Some(count);
        self
    }

    pub fn entity_set(mut self, entities: BTreeSet<String>) -> Self {
        self.stats.entities = Some(entities);
        self
    }

    pub fn mapped_cells(mut self, count: usize) -> Self {
        self.stats.num_mapped_cells = Some(count);
        self
    }

    pub fn entities_per_row(mut self, counts: Vec<usize>) -> Self {
        self.stats.entities_per_row = Some(counts);
        self
    }

    pub fn entities_per_column(mut self, counts: Vec<usize>) -> Self {
        self.stats.entities_per_column = Some(counts);
        self
    }

    pub fn cell_to_entity_matches(mut self, count: u64) -> Self {
        self.stats.cell_to_entity_matches = Some(count);
        self
    }

    pub fn cell_to_entity_matches_per_col(mut self, counts: Vec<usize>) -> Self {
        self.stats.cell_to_entity_matches_per_col = Some(counts);
        self
    }

    pub fn numeric_table_columns(mut self, numeric: Vec<bool>) -> Self {
        self.stats.numeric_table_columns = Some(numeric);
        self
    }

    pub fn entity_mapped_rows(mut self, count: usize) -> Self {
        self.stats.entity_mapped_rows = Some(count);
        self
    }

    pub fn fraction_of_entity_mapped_rows(mut self, fraction: f64) -> Self {
        self.stats.fraction_of_entity_mapped_rows = Some(fraction);
        self
    }

    pub fn tuple_query_alignment(mut self, alignment: Vec<Vec<String>>) -> Self {
        self.stats.tuple_query_alignment = Some(alignment);
        self
    }

    pub fn query_row_scores(mut self, scores: Vec<f64>) -> Self {
        self.stats.query_row_scores = Some(scores);
        self
    }

    pub fn query_row_vectors(mut self, vectors: Vec<Vec<f64>>) -> Self {
        self.stats.query_row_vectors = Some(vectors);
        self
    }

    pub fn finish(self) -> TableStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_fields_are_omitted() {
        let stats = TableStats::builder().rows(3).columns(2).cells(6).finish();
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json, serde_json::json!({"numRows": 3, "numCols": 2, "numCells": 6}));
        let back: TableStats = serde_json::from_value(json).unwrap();
        assert_eq!(back, stats);
    }
}
