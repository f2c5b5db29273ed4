//! Metadata document errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata document is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("metadata schema version {found} is not supported (expected {expected})")]
    UnsupportedVersion { found: String, expected: String },

    #[error("no topology metadata found on '{0}'")]
    Missing(String),

    #[error("cluster '{0}' is not registered in the metadata")]
    UnknownCluster(String),

    #[error("clusterset of cluster '{0}' is not registered in the metadata")]
    UnknownClusterSet(String),
}

pub type MetadataResult<T> = Result<T, MetadataError>;
