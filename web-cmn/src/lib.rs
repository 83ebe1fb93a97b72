mod error;
mod event;
mod frame;
mod key;

pub use error::{Result, WebError};
pub use event::{KeyEvent, ServerEvent, parse_client_message};
pub use frame::FrameMetadata;
pub use key::Key;
