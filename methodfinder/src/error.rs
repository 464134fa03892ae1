use std::path::PathBuf;
use thiserror::Error;

/// Stage-level failures that abort a run before any row is processed.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{file}: column '{field}' not found (expected one of: {expected})")]
    MissingColumn {
        file: String,
        field: String,
        expected: String,
    },

    #[error("chunk size must be greater than 0")]
    ZeroChunkSize,

    #[error("no CSV files found in {0}")]
    NoInputFiles(PathBuf),

    #[error("API token is not configured (set api.api_token or {env})")]
    MissingApiToken { env: &'static str },
}
