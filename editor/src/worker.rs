use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use compute::{ComputeArray, GaussianData};
use params::{ParamBlock, ReflectType};
use scene::{Camera, Payload};
use tracing::debug;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Single-slot hand-off from embedding threads to the render thread.
///
/// A publish replaces whatever is still waiting; only the newest value is drained.
pub struct PendingCell<T> {
    slot: Mutex<Option<T>>,
    has_pending: AtomicBool,
}

impl<T> Default for PendingCell<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
            has_pending: AtomicBool::new(false),
        }
    }
}

impl<T> PendingCell<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` for the next drain. Returns the value it superseded, which the render
    /// thread never saw.
    pub fn publish(&self, value: T) -> Option<T> {
        let mut slot = lock(&self.slot);
        let previous = slot.replace(value);
        self.has_pending.store(true, Ordering::Release);
        previous
    }

    pub fn is_pending(&self) -> bool {
        self.has_pending.load(Ordering::Acquire)
    }

    /// Moves a published value into `current`; the value it replaces lands in `old`.
    pub fn process_pending(&self, current: &mut Option<T>, old: &mut Option<T>) -> bool {
        if !self.is_pending() {
            return false;
        }
        let mut slot = lock(&self.slot);
        self.has_pending.store(false, Ordering::Release);
        let Some(value) = slot.take() else {
            return false;
        };
        *old = current.replace(value);
        true
    }
}

/// Parameter block published through the legacy entry point, with the layout it was
/// published with.
#[derive(Clone)]
pub struct ShaderParamsBinding {
    pub params: Arc<ParamBlock>,
    pub descriptor: Arc<ReflectType>,
}

/// Pointer and descriptor swapped together under one lock, with a dirty flag so readers
/// skip the lock on frames where nothing changed.
#[derive(Default)]
pub struct ShaderParamsSlot {
    current: Mutex<Option<ShaderParamsBinding>>,
    params_dirty: AtomicBool,
}

impl ShaderParamsSlot {
    pub fn replace(&self, binding: Option<ShaderParamsBinding>) -> Option<ShaderParamsBinding> {
        let mut current = lock(&self.current);
        let old = std::mem::replace(&mut *current, binding);
        self.params_dirty.store(true, Ordering::Release);
        old
    }

    pub fn current(&self) -> Option<ShaderParamsBinding> {
        lock(&self.current).clone()
    }

    /// Copies the binding into `cached` when it changed since the last refresh.
    pub fn refresh(&self, cached: &mut Option<ShaderParamsBinding>) -> bool {
        if !self.params_dirty.load(Ordering::Acquire) {
            return false;
        }
        let current = lock(&self.current);
        self.params_dirty.store(false, Ordering::Release);
        *cached = current.clone();
        true
    }
}

/// Values the render thread holds from the single-object entry points.
#[derive(Default)]
pub struct WorkerState {
    pub nanovdb: Option<Arc<ComputeArray>>,
    pub data_array: Option<Arc<ComputeArray>>,
    pub gaussian_data: Option<Arc<GaussianData>>,
    pub camera: Option<Camera>,
    shader_params: Option<Arc<ParamBlock>>,
    shader_params_type: Option<Arc<ReflectType>>,
}

/// What one drain changed.
#[derive(Debug, Default)]
pub struct PendingUpdate {
    pub nanovdb: bool,
    pub data_array: bool,
    pub gaussian_data: bool,
    pub camera: bool,
    pub shader_params: bool,
    /// Values displaced by the drain, in drain order.
    pub retired: Vec<Payload>,
}

impl PendingUpdate {
    pub fn any(&self) -> bool {
        self.nanovdb || self.data_array || self.gaussian_data || self.camera || self.shader_params
    }
}

/// Cross-thread state between the embedding API and the render thread.
#[derive(Default)]
pub struct EditorWorker {
    pending_nanovdb: PendingCell<Arc<ComputeArray>>,
    pending_data_array: PendingCell<Arc<ComputeArray>>,
    pending_gaussian_data: PendingCell<Arc<GaussianData>>,
    pending_camera: PendingCell<Camera>,
    pending_shader_params: PendingCell<Arc<ParamBlock>>,
    pending_shader_params_type: PendingCell<Arc<ReflectType>>,
    shader_params: ShaderParamsSlot,
    set_params: AtomicI32,
    get_params: AtomicI32,
    should_stop: AtomicBool,
}

impl EditorWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish_nanovdb(&self, array: Arc<ComputeArray>) {
        if self.pending_nanovdb.publish(array).is_some() {
            debug!("Pending volume superseded before it was shown");
        }
    }

    pub fn publish_data_array(&self, array: Arc<ComputeArray>) {
        if self.pending_data_array.publish(array).is_some() {
            debug!("Pending data array superseded before it was used");
        }
    }

    pub fn publish_gaussian_data(&self, data: Arc<GaussianData>) {
        if self.pending_gaussian_data.publish(data).is_some() {
            debug!("Pending gaussian data superseded before it was shown");
        }
    }

    pub fn publish_camera(&self, camera: Camera) {
        self.pending_camera.publish(camera);
    }

    /// Publishes the block and the layout it has right now.
    pub fn publish_shader_params(&self, params: Arc<ParamBlock>) {
        let descriptor = params.descriptor();
        self.pending_shader_params.publish(params);
        self.pending_shader_params_type.publish(descriptor);
    }

    pub fn has_pending(&self) -> bool {
        self.pending_nanovdb.is_pending()
            || self.pending_data_array.is_pending()
            || self.pending_gaussian_data.is_pending()
            || self.pending_camera.is_pending()
            || self.pending_shader_params.is_pending()
            || self.pending_shader_params_type.is_pending()
    }

    /// Drains every cell into `state`: volume, data array, gaussians, camera, then the
    /// parameter pointer before its descriptor.
    pub fn process_pending_editor_changes(&self, state: &mut WorkerState) -> PendingUpdate {
        let mut update = PendingUpdate::default();

        let mut old = None;
        update.nanovdb = self.pending_nanovdb.process_pending(&mut state.nanovdb, &mut old);
        update.retired.extend(old.map(Payload::NanoVdb));

        let mut old = None;
        update.data_array = self
            .pending_data_array
            .process_pending(&mut state.data_array, &mut old);
        update.retired.extend(old.map(Payload::Array));

        let mut old = None;
        update.gaussian_data = self
            .pending_gaussian_data
            .process_pending(&mut state.gaussian_data, &mut old);
        update.retired.extend(old.map(Payload::GaussianData));

        let mut old_camera = None;
        update.camera = self.pending_camera.process_pending(&mut state.camera, &mut old_camera);

        let mut old_params = None;
        let params_changed = self
            .pending_shader_params
            .process_pending(&mut state.shader_params, &mut old_params);
        let mut old_type = None;
        let type_changed = self
            .pending_shader_params_type
            .process_pending(&mut state.shader_params_type, &mut old_type);
        if params_changed || type_changed {
            let binding = match (&state.shader_params, &state.shader_params_type) {
                (Some(params), Some(descriptor)) => Some(ShaderParamsBinding {
                    params: params.clone(),
                    descriptor: descriptor.clone(),
                }),
                _ => None,
            };
            self.shader_params.replace(binding);
            update.shader_params = true;
        }
        update
    }

    pub fn shader_params(&self) -> &ShaderParamsSlot {
        &self.shader_params
    }

    fn sync_counter(&self, set_data: bool) -> &AtomicI32 {
        if set_data { &self.set_params } else { &self.get_params }
    }

    /// Asks the render thread to copy parameters: into the scene when `set_data`, out of it
    /// otherwise.
    pub fn begin_sync(&self, set_data: bool) {
        self.sync_counter(set_data).fetch_add(1, Ordering::AcqRel);
    }

    pub fn is_sync_pending(&self, set_data: bool) -> bool {
        self.sync_counter(set_data).load(Ordering::Acquire) > 0
    }

    /// Acknowledges one request. Never drops below zero.
    pub fn finish_sync(&self, set_data: bool) {
        let _ = self
            .sync_counter(set_data)
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n > 0).then(|| n - 1));
    }

    pub fn request_stop(&self) {
        self.should_stop.store(true, Ordering::Release);
    }

    pub fn clear_stop(&self) {
        self.should_stop.store(false, Ordering::Release);
    }

    pub fn should_stop(&self) -> bool {
        self.should_stop.load(Ordering::Acquire)
    }

    /// 1 while an embedding thread waits on the render thread, else 0. Keeps an idle
    /// headless loop from sleeping through a request.
    pub fn external_active_count(&self) -> i32 {
        let busy = self.is_sync_pending(true) || self.is_sync_pending(false) || self.has_pending() || self.should_stop();
        i32::from(busy)
    }
}
