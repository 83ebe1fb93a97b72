use thiserror::Error;

pub type Result<T> = std::result::Result<T, RenderError>;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Rasterization already in progress")]
    RasterizationInProgress,

    #[error(transparent)]
    Compute(#[from] compute::ComputeError),

    #[error(transparent)]
    Pipeline(#[from] pipeline::PipelineError),
}
