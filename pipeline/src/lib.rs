mod config;
mod context;
mod error;
mod executor;
mod import;
mod manager;
mod message;
mod types;
mod worker;

pub use config::{
    CompletionCallback, DEFAULT_VOXELS_PER_UNIT, FileImportConfig, PipelineConfig, PipelineSettings, PipelineShader,
    RASTER2D_GAUSSIAN_SHADER, RASTER2D_SHADER_GROUP, RASTER3D_GAUSSIAN_SHADER, Raster3DParams, is_nanovdb_file,
};
pub use context::ExecutionContext;
pub use error::{PipelineError, Result};
pub use executor::{NullExecutor, PipelineExecutor, Raster3DExecutor, RenderExecutor};
pub use import::{FileImportExecutor, install_imported};
pub use manager::{PipelineManager, PipelineResources, TickReport};
pub use message::{ImportCompletion, ImportedData, PipelineOutput};
pub use types::{PipelineStatus, PipelineType, make_object_pipeline_key, make_pipeline_key};
pub use worker::{INVALID_TASK_ID, TaskId, TaskProgress, WorkerThread};
