//! Web-table JSON files.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TableCell {
    pub text: String,
    pub is_numeric: bool,
    pub links: Vec<String>,
}

/// One table file. `_id` and `rows` are mandatory; everything else defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JsonTable {
    #[serde(rename = "_id")]
    pub id: Option<String>,
    pub pg_id: i64,
    pub num_cols: usize,
    pub num_data_rows: usize,
    pub num_numeric_cols: usize,
    pub pg_title: String,
    pub table_caption: String,
    pub headers: Vec<TableCell>,
    pub rows: Option<Vec<Vec<TableCell>>>,
}

impl JsonTable {
    pub fn data_rows(&self) -> &[Vec<TableCell>] {
        self.rows.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Error)]
pub enum TableFileError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed table {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("table {path} is missing `{field}`")]
    MissingField { path: PathBuf, field: &'static str },
}

pub fn parse_table(path: &Path) -> Result<JsonTable, TableFileError> {
    let raw = std::fs::read(path).map_err(|source| TableFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let table: JsonTable = serde_json::from_slice(&raw).map_err(|source| TableFileError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    if table.id.is_none() {
        return Err(TableFileError::MissingField {
            path: path.to_path_buf(),
            field: "_id",
        });
    }
    if table.rows.is_none() {
        return Err(TableFileError::MissingField {
            path: path.to_path_buf(),
            field: "rows",
        });
    }
    Ok(table)
}

/// Every `.json` file under `dir`, sorted by path.
pub fn collect_table_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    files
}

/// File name of a table path; this is the name tables are indexed under.
pub fn table_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
