use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use backend::RESOLVED_PORT_UNRESOLVED;
use compute::cpu::{CpuCompiler, CpuCompute, CpuFileLoader, CpuRaster, DEFAULT_EDITOR_SHADER};
use compute::{Compute, ComputeArray, FileLoader, GaussianData, Raster, ShaderCompiler};
use params::ParamBlock;
use pipeline::{PipelineManager, PipelineResources};
use render::{RasterizationWorker, ShaderRequests};
use scene::{Camera, ObjectType, Payload, Retired, SceneManager, SceneView};
use token::{Token, TokenTable};
use tracing::{debug, warn};

use crate::Result;
use crate::worker::{EditorWorker, WorkerState};

pub const LEGACY_NANOVDB_NAME: &str = "nanovdb";
pub const LEGACY_ARRAY_NAME: &str = "data_array";
pub const LEGACY_GAUSSIAN_NAME: &str = "gaussian_data";

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Device, compiler, rasterizer and file loader the editor renders with.
#[derive(Clone)]
pub struct EditorBackends {
    pub compute: Arc<dyn Compute>,
    pub compiler: Arc<dyn ShaderCompiler>,
    pub raster: Arc<dyn Raster>,
    pub loader: Arc<dyn FileLoader>,
}

impl EditorBackends {
    pub fn cpu() -> Self {
        Self {
            compute: Arc::new(CpuCompute::new()),
            compiler: Arc::new(CpuCompiler::new()),
            raster: Arc::new(CpuRaster::new()),
            loader: Arc::new(CpuFileLoader::new()),
        }
    }
}

impl Default for EditorBackends {
    fn default() -> Self {
        Self::cpu()
    }
}

fn new_pipelines(backends: &EditorBackends) -> Result<PipelineManager> {
    let mut pipelines = PipelineManager::new();
    pipelines.configure_file_import(backends.loader.clone(), backends.raster.clone())?;
    Ok(pipelines)
}

/// Camera shared between the viewport and the embedding API.
#[derive(Default)]
struct CameraSync {
    camera: Camera,
    /// Set when `camera` came from the API and the viewport has not taken it yet.
    pending: bool,
}

/// Everything both the render thread and the embedding API touch.
pub(crate) struct EditorState {
    pub tokens: Arc<TokenTable>,
    pub scenes: SceneManager,
    pub views: SceneView,
    pub pipelines: Mutex<PipelineManager>,
    pub worker: EditorWorker,
    pub requests: Arc<ShaderRequests>,
    pub backends: EditorBackends,
    pub rasterizer: RasterizationWorker,
    pub resolved_port: Arc<AtomicI32>,
    pub running: AtomicBool,
    legacy: Mutex<WorkerState>,
    retired: Mutex<Vec<Retired>>,
    shared_arrays: Mutex<HashMap<u64, Weak<ComputeArray>>>,
    camera: Mutex<CameraSync>,
    viewport_shader: Mutex<String>,
}

impl EditorState {
    pub fn new(backends: EditorBackends) -> Result<Self> {
        let tokens = Arc::new(TokenTable::new());
        let pipelines = new_pipelines(&backends)?;
        let rasterizer = RasterizationWorker::new(backends.loader.clone(), backends.raster.clone())?;
        Ok(Self {
            views: SceneView::new(tokens.clone()),
            tokens,
            scenes: SceneManager::new(),
            pipelines: Mutex::new(pipelines),
            worker: EditorWorker::new(),
            requests: Arc::new(ShaderRequests::new(Default::default())),
            backends,
            rasterizer,
            resolved_port: Arc::new(AtomicI32::new(RESOLVED_PORT_UNRESOLVED)),
            running: AtomicBool::new(false),
            legacy: Mutex::new(WorkerState::default()),
            retired: Mutex::new(Vec::new()),
            shared_arrays: Mutex::new(HashMap::new()),
            camera: Mutex::new(CameraSync::default()),
            viewport_shader: Mutex::new(DEFAULT_EDITOR_SHADER.to_string()),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn resources(&self) -> PipelineResources<'_> {
        PipelineResources {
            scenes: &self.scenes,
            raster: Some(self.backends.raster.as_ref()),
            tokens: &self.tokens,
        }
    }

    pub fn pipelines(&self) -> MutexGuard<'_, PipelineManager> {
        lock(&self.pipelines)
    }

    /// Hands displaced data to the render thread, which drops it once no frame can use it.
    /// Without a render thread it is dropped right away.
    pub fn retire(&self, retired: Retired) {
        if retired.is_empty() {
            return;
        }
        if self.is_running() {
            lock(&self.retired).push(retired);
        }
    }

    pub fn retire_payload(&self, payload: Payload) {
        self.retire(Retired {
            payload: Some(payload),
            ..Default::default()
        });
    }

    pub fn take_retired(&self) -> Vec<Retired> {
        std::mem::take(&mut *lock(&self.retired))
    }

    pub fn viewport_shader(&self) -> String {
        lock(&self.viewport_shader).clone()
    }

    pub fn set_viewport_shader(&self, shader_name: &str) {
        *lock(&self.viewport_shader) = shader_name.to_string();
    }

    pub fn camera(&self) -> Camera {
        lock(&self.camera).camera
    }

    pub fn request_camera_sync(&self, camera: Camera) {
        let mut sync = lock(&self.camera);
        sync.camera = camera;
        sync.pending = true;
    }

    pub fn take_camera_sync(&self) -> Option<Camera> {
        let mut sync = lock(&self.camera);
        if !sync.pending {
            return None;
        }
        sync.pending = false;
        Some(sync.camera)
    }

    /// Records the live viewport camera unless an API update is still waiting.
    pub fn store_viewport_camera(&self, camera: Camera) {
        let mut sync = lock(&self.camera);
        if !sync.pending {
            sync.camera = camera;
        }
    }

    /// Reuses the stored handle when `array` is a byte-identical copy of an array that is
    /// still alive, else takes a private duplicate.
    pub fn share_or_duplicate(&self, array: &ComputeArray) -> Arc<ComputeArray> {
        let mut shared = lock(&self.shared_arrays);
        shared.retain(|_, weak| weak.strong_count() > 0);
        if let Some(existing) = shared.get(&array.id()).and_then(Weak::upgrade) {
            if existing.as_bytes() == array.as_bytes() {
                return existing;
            }
        }
        let copy = Arc::new(array.duplicate());
        shared.insert(array.id(), Arc::downgrade(&copy));
        copy
    }

    pub fn install_nanovdb(
        &self,
        scene: &Token,
        name: &Token,
        array: Arc<ComputeArray>,
        params: Option<Arc<ParamBlock>>,
    ) -> Retired {
        let retired = self.scenes.add_nanovdb(scene, name, array.clone(), params, None);
        self.views.add_nanovdb_view(Some(scene), Some(name), &array);
        self.views.set_current_scene(scene);
        let params = self.scenes.params(scene, name);
        self.pipelines()
            .create_default_pipelines(scene, name, ObjectType::NanoVdb, params);
        retired
    }

    pub fn install_gaussian(
        &self,
        scene: &Token,
        name: &Token,
        data: Arc<GaussianData>,
        params: Option<Arc<ParamBlock>>,
    ) -> Retired {
        let retired = self.scenes.add_gaussian_data(scene, name, data.clone(), params, None);
        self.views.add_gaussian_view(Some(scene), name, &data);
        self.views.set_current_scene(scene);
        let params = self.scenes.params(scene, name);
        self.pipelines()
            .create_default_pipelines(scene, name, ObjectType::GaussianData, params);
        retired
    }

    /// Drains the single-object cells into the default scene. A new camera is queued for the
    /// viewport.
    pub fn apply_pending(&self) -> bool {
        let mut legacy = lock(&self.legacy);
        let update = self.worker.process_pending_editor_changes(&mut legacy);
        if !update.any() {
            return false;
        }

        let scene = self.views.default_scene().clone();
        let mut retired: Vec<Retired> = Vec::new();
        if update.nanovdb {
            if let Some(array) = legacy.nanovdb.clone() {
                let name = self.tokens.get_or_create(LEGACY_NANOVDB_NAME);
                retired.push(self.install_nanovdb(&scene, &name, array, None));
            }
        }
        if update.data_array {
            if let Some(array) = legacy.data_array.clone() {
                let name = self.tokens.get_or_create(LEGACY_ARRAY_NAME);
                retired.push(self.scenes.add_array(&scene, &name, array));
            }
        }
        if update.gaussian_data {
            if let Some(data) = legacy.gaussian_data.clone() {
                let name = self.tokens.get_or_create(LEGACY_GAUSSIAN_NAME);
                retired.push(self.install_gaussian(&scene, &name, data, None));
            }
        }
        let camera = if update.camera { legacy.camera } else { None };
        drop(legacy);

        debug!("Applied pending editor changes: {update:?}");
        for payload in update.retired {
            self.retire_payload(payload);
        }
        for record in retired {
            self.retire(record);
        }
        if let Some(camera) = camera {
            self.request_camera_sync(camera);
        }
        true
    }

    /// Drops every scene object and pipeline. Tokens survive.
    pub fn clear_scenes(&self) {
        for record in self.scenes.clear() {
            self.retire(record);
        }
        for scene in self.views.scenes() {
            if let Err(e) = self.views.remove_scene(&scene) {
                warn!("Scene '{scene}' vanished during reset: {e}");
            }
        }
        match new_pipelines(&self.backends) {
            Ok(pipelines) => *self.pipelines() = pipelines,
            Err(e) => warn!("Pipelines kept after reset: {e}"),
        }
        *lock(&self.legacy) = WorkerState::default();
        lock(&self.shared_arrays).clear();
    }
}
