use serde::{Deserialize, Serialize};

/// Row-major table; rows may have different lengths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table<T> {
    rows: Vec<Vec<T>>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self { rows: Vec::new() }
    }
}

impl<T> Table<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: Vec<Vec<T>>) -> Self {
        Self { rows }
    }

    pub fn add_row(&mut self, row: Vec<T>) {
        self.rows.push(row);
    }

    pub fn row(&self, index: usize) -> Option<&[T]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Vec<T>] {
        &self.rows
    }

    /// Width of the widest row.
    pub fn column_count(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }
}

/// Folds every column of a table into a single value.
pub struct ColumnAggregator<'a, T> {
    table: &'a Table<T>,
}

impl<'a, T> ColumnAggregator<'a, T> {
    pub fn new(table: &'a Table<T>) -> Self {
        Self { table }
    }

    /// `map` turns a cell into an optional value (`None` cells are skipped),
    /// `fold` reduces the collected column values. The column count is taken
    /// from the first row; shorter rows simply contribute nothing.
    pub fn aggregate<E, M, F>(&self, map: M, fold: F) -> Vec<E>
    where
        M: Fn(&T) -> Option<E>,
        F: Fn(Vec<E>) -> E,
    {
        let Some(first) = self.table.row(0) else {
            return Vec::new();
        };
        (0..first.len())
            .map(|column| {
                let values: Vec<E> = self
                    .table
                    .rows()
                    .iter()
                    .filter_map(|row| row.get(column))
                    .filter_map(&map)
                    .collect();
                fold(values)
            })
            .collect()
    }
}
