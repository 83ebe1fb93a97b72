use thiserror::Error;

pub type Result<T> = std::result::Result<T, SceneError>;

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("No object '{name}' in scene '{scene}'")]
    ObjectNotFound { scene: String, name: String },

    #[error("Scene '{0}' does not exist")]
    SceneNotFound(String),
}
