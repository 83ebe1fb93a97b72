use compute::ComputeError;
use scene::SceneError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No {0} pipeline registered for this target")]
    NotFound(String),

    #[error("Pipeline cannot execute: {0}")]
    CannotExecute(String),

    #[error("An import is already in progress")]
    ImportInProgress,

    #[error("Worker thread failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error(transparent)]
    Scene(#[from] SceneError),
}
