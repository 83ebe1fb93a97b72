use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ComputeError>;

#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("File IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to write shader reflection: {0}")]
    Reflection(#[from] serde_json::Error),

    #[error("Shader '{shader}' failed to compile: {message}")]
    Compile { shader: String, message: String },

    #[error("Shader '{0}' has not been initialized")]
    ShaderNotInitialized(String),

    #[error("No kernel registered for shader '{0}'")]
    KernelNotFound(String),

    #[error("Not a NanoVDB file: {0}")]
    InvalidNanoVdb(PathBuf),

    #[error("Malformed voxel grid: {0}")]
    InvalidGrid(String),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid gaussian data: {0}")]
    InvalidGaussianData(String),
}
