mod camera;
mod error;
mod input;
mod settings;
mod viewport;

pub use camera::CameraController;
pub use error::{Result, ViewerError};
pub use input::{InputState, MOUSE_LEFT, MOUSE_MIDDLE, MOUSE_RIGHT};
pub use settings::{
    DEFAULT_ENCODE_FILENAME, DEFAULT_HEIGHT, DEFAULT_SERVER_PORT, DEFAULT_WIDTH, RenderSettings, ResolutionMode,
};
pub use viewport::{EncoderFactory, FrameRenderer, GuiInstance, OffscreenSwapchain, Swapchain, Viewport, save_png};
