use thiserror::Error;

pub type Result<T> = std::result::Result<T, EditorError>;

#[derive(Debug, Error)]
pub enum EditorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed editor config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("The editor is already running")]
    AlreadyRunning,

    #[error("Object '{name}' in scene '{scene}' has no parameters")]
    NoParams { scene: String, name: String },

    #[error("Render thread panicked")]
    RenderThread,

    #[error(transparent)]
    Scene(#[from] scene::SceneError),

    #[error(transparent)]
    Pipeline(#[from] pipeline::PipelineError),

    #[error(transparent)]
    Render(#[from] render::RenderError),

    #[error(transparent)]
    Compute(#[from] compute::ComputeError),

    #[error(transparent)]
    Viewer(#[from] viewer::ViewerError),
}
