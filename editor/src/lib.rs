mod config;
mod editor;
mod editor_scene;
mod error;
mod frame_loop;
mod mapped;
mod state;
mod worker;

pub use config::{DEFAULT_UI_PROFILE, EditorConfig};
pub use editor::{Editor, SwapchainFactory};
pub use editor_scene::EditorScene;
pub use error::{EditorError, Result};
pub use frame_loop::EditorLoop;
pub use mapped::MappedParams;
pub use state::{EditorBackends, LEGACY_ARRAY_NAME, LEGACY_GAUSSIAN_NAME, LEGACY_NANOVDB_NAME};
pub use worker::{EditorWorker, PendingCell, PendingUpdate, ShaderParamsBinding, ShaderParamsSlot, WorkerState};
