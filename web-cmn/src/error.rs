use thiserror::Error;

pub type Result<T> = std::result::Result<T, WebError>;

#[derive(Debug, Error)]
pub enum WebError {
    #[error("Malformed client message: {0}")]
    Json(#[from] serde_json::Error),
}
