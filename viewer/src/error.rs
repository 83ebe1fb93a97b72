use thiserror::Error;

pub type Result<T> = std::result::Result<T, ViewerError>;

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed render settings: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("Frame capture failed: {0}")]
    Capture(#[from] image::ImageError),

    #[error("Frame capture needs an RGBA8 texture")]
    CaptureFormat,

    #[error(transparent)]
    Stream(#[from] backend::ServerError),
}
