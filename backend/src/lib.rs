mod encoder;
mod error;
mod server;
mod sink;

pub use encoder::{Nv12Surface, RawNv12Encoder, VideoEncoder};
pub use error::{Result, ServerError};
pub use server::{
    DEFAULT_SERVER_ADDRESS, RESOLVED_PORT_PENDING, RESOLVED_PORT_UNRESOLVED, RING_BUFFER_SIZE, ServerConfig,
    StreamServer, bind_with_retry,
};
pub use sink::StreamOutput;
