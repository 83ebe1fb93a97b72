use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use compute::{FileLoader, Raster};
use scene::{Payload, Retired, SceneManager, SceneView};
use tracing::{error, info, warn};

use crate::worker::{INVALID_TASK_ID, TaskId, WorkerThread};
use crate::{
    ExecutionContext, FileImportConfig, ImportCompletion, ImportedData, PipelineConfig, PipelineError, PipelineExecutor, PipelineStatus,
    Result,
};

struct ImportState {
    task_id: TaskId,
    filepath: PathBuf,
}

/// Loads files on a dedicated worker thread, one at a time.
pub struct FileImportExecutor {
    loader: Arc<dyn FileLoader>,
    raster: Arc<dyn Raster>,
    worker: WorkerThread<ImportedData>,
    state: Mutex<ImportState>,
}

impl FileImportExecutor {
    pub fn new(loader: Arc<dyn FileLoader>, raster: Arc<dyn Raster>) -> Result<Self> {
        Ok(Self {
            loader,
            raster,
            worker: WorkerThread::new("file-import")?,
            state: Mutex::new(ImportState {
                task_id: INVALID_TASK_ID,
                filepath: PathBuf::new(),
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, ImportState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues the import. Fails while another import is still running.
    pub fn start(&self, import: &FileImportConfig) -> Result<TaskId> {
        if self.worker.has_running_task() {
            return Err(PipelineError::ImportInProgress);
        }

        let path = import.filepath.clone();
        let voxel_size = import.voxel_size();
        let to_nanovdb = import.rasterize_to_nanovdb;
        let is_nanovdb = import.is_nanovdb_file();
        let loader = self.loader.clone();
        let raster = self.raster.clone();

        if is_nanovdb {
            info!("Starting NanoVDB import: '{}'", path.display());
        } else {
            let mode = if to_nanovdb { "Raster3D->NanoVDB" } else { "Gaussian" };
            info!("Starting Gaussian import: '{}' (mode: {mode})", path.display());
        }

        let task_path = path.clone();
        let task_id = self.worker.enqueue(move |progress| {
            if is_nanovdb {
                progress.set("Loading NanoVDB", 0.0);
                let array = loader.load_nanovdb(&task_path)?;
                return Ok(ImportedData::NanoVdb(array));
            }

            progress.set("Reading gaussians", 0.0);
            let desc = loader.load_gaussian(&task_path)?;
            let data = raster.create_gaussian_data(desc)?;
            if !to_nanovdb {
                return Ok(ImportedData::Gaussian(data));
            }
            let array = raster.raster_to_nanovdb(&data, voxel_size, &|text, value| progress.set(text, value))?;
            Ok(ImportedData::NanoVdb(array.with_filepath(&task_path)))
        })?;

        let mut state = self.state();
        state.task_id = task_id;
        state.filepath = path;
        Ok(task_id)
    }

    pub fn is_importing(&self) -> bool {
        self.worker.is_task_running(self.state().task_id)
    }

    pub fn progress(&self) -> Option<(String, f32)> {
        let task_id = self.state().task_id;
        if self.worker.is_task_running(task_id) {
            self.worker.progress(task_id)
        } else {
            None
        }
    }

    /// Takes the finished import, if any.
    pub fn take_completed(&self) -> Option<(PathBuf, Result<ImportedData>)> {
        let mut state = self.state();
        let result = self.worker.take_result(state.task_id)?;
        state.task_id = INVALID_TASK_ID;
        Some((std::mem::take(&mut state.filepath), result))
    }
}

/// Swaps a finished load into the current scene, named after the file stem.
pub fn install_imported(
    scenes: &SceneManager,
    views: &SceneView,
    filepath: PathBuf,
    result: Result<ImportedData>,
) -> ImportCompletion {
    let scene = views.current_scene();
    let stem = filepath
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = views.tokens().get_or_create(&stem);

    let mut completion = ImportCompletion {
        filepath,
        scene,
        name,
        payload: None,
        retired: Retired::default(),
        error: None,
    };
    let (scene, name) = (&completion.scene, &completion.name);
    match result {
        Ok(ImportedData::NanoVdb(array)) => {
            let array = Arc::new(array.with_filepath(&completion.filepath));
            completion.retired = scenes.add_nanovdb(scene, name, array.clone(), None, None);
            views.add_nanovdb_view(Some(scene), Some(name), &array);
            completion.payload = Some(Payload::NanoVdb(array));
        }
        Ok(ImportedData::Gaussian(data)) => {
            let data = Arc::new(data);
            completion.retired = scenes.add_gaussian_data(scene, name, data.clone(), None, None);
            views.add_gaussian_view(Some(scene), name, &data);
            completion.payload = Some(Payload::GaussianData(data));
        }
        Err(e) => completion.error = Some(e.to_string()),
    }

    if completion.succeeded() {
        info!("Import of '{}' was successful", completion.filepath.display());
    } else {
        warn!("Import of '{}' failed", completion.filepath.display());
    }
    completion
}

impl PipelineExecutor for FileImportExecutor {
    fn execute(&self, config: &mut PipelineConfig, _ctx: &mut ExecutionContext<'_>) -> PipelineStatus {
        let Some(import) = config.import.as_ref() else {
            error!("FileImport: no file path specified");
            return PipelineStatus::Failed;
        };
        match self.start(import) {
            Ok(_) => PipelineStatus::Running,
            Err(e) => {
                error!("FileImport: {e}");
                PipelineStatus::Failed
            }
        }
    }

    fn can_execute(&self, config: &PipelineConfig, _ctx: &ExecutionContext<'_>) -> bool {
        !self.worker.has_running_task()
            && config
                .import
                .as_ref()
                .is_some_and(|import| !import.filepath.as_os_str().is_empty())
    }
}
