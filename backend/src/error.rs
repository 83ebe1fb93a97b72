use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Server create failed after {attempts} attempts starting at {address}:{port}")]
    Bind { address: String, port: u16, attempts: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoder surface is {expected:?} but the frame is {actual:?}")]
    SurfaceSize { expected: (u32, u32), actual: (u32, u32) },

    #[error("Expected an RGBA8 frame")]
    FrameFormat,

    #[error("Stream socket closed: {0}")]
    SocketClosed(String),
}
