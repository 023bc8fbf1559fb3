use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no such object `{path}`")]
    NotFound { path: String },

    #[error("`{path}` already exists")]
    AlreadyExists { path: String },

    #[error("`{path}` is not a group")]
    NotAGroup { path: String },

    #[error("`{path}` is not a dataset")]
    NotADataset { path: String },

    #[error("invalid path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("container is opened read-only; cannot modify `{path}`")]
    ReadOnly { path: String },

    #[error("`{path}` resolves through an external link to {file}:{target}")]
    ExternalLink {
        path: String,
        file: String,
        target: String,
    },

    #[error("soft link loop while resolving `{path}` (more than {hops} hops)")]
    LinkLoop { path: String, hops: usize },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt container {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
