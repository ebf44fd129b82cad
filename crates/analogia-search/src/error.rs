use std::path::PathBuf;

use analogia_store::{ConnectorError, LinkError, LshError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("query has no entities")]
    EmptyQuery,
    #[error("query entity `{0}` is not linked; run query preparation first")]
    UnlinkedQueryEntity(String),
    #[error("prefilter {mode} needs {missing}, which is not available")]
    PrefilterUnavailable {
        mode: &'static str,
        missing: &'static str,
    },
    #[error("failed to start search worker pool: {0}")]
    ThreadPool(String),
    #[error("failed to read query file {path}: {reason}")]
    QueryFile { path: PathBuf, reason: String },
    #[error("knowledge graph failure: {0}")]
    Connector(#[from] ConnectorError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Lsh(#[from] LshError),
}
