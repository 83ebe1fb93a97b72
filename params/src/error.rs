use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ParamsError>;

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("File IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File '{0}' has no '{1}' entry")]
    MissingKey(PathBuf, &'static str),

    #[error("Field '{field}' in '{path}' is malformed")]
    MalformedField { path: PathBuf, field: String },
}
