mod error;
mod raster_worker;
mod renderer;

pub use error::{RenderError, Result};
pub use raster_worker::RasterizationWorker;
pub use renderer::{
    RenderScene, RenderType, Renderer, ShaderDispatchResult, ShaderRequests, raster_shader_params,
};
