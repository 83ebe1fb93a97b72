use std::sync::Arc;

use compute::Texture;
use params::{ParamBlock, ShaderParams};
use pipeline::{ImportCompletion, PipelineManager, PipelineType};
use render::{RenderScene, RenderType, Renderer, ShaderDispatchResult, raster_shader_params};
use scene::{Camera, Payload, Retired};
use token::Token;
use tracing::{debug, error, info};
use viewer::FrameRenderer;

use crate::state::EditorState;
use crate::worker::ShaderParamsBinding;

/// Retired data waits one full frame before it is dropped.
#[derive(Default)]
struct Graveyard {
    /// Dropped at the end of the current frame.
    expiring: Vec<Retired>,
    /// Retired during the current frame.
    deferred: Vec<Retired>,
}

impl Graveyard {
    fn begin_frame(&mut self, retired: Vec<Retired>) {
        self.expiring.extend(retired);
    }

    fn retire(&mut self, retired: Retired) {
        if !retired.is_empty() {
            self.deferred.push(retired);
        }
    }

    fn retire_payload(&mut self, payload: Payload) {
        self.retire(Retired {
            payload: Some(payload),
            ..Default::default()
        });
    }

    fn end_frame(&mut self) {
        if !self.expiring.is_empty() {
            debug!("Releasing {} retired objects", self.expiring.len());
        }
        self.expiring = std::mem::take(&mut self.deferred);
    }
}

/// Scene callbacks the renderer makes while compiling and dispatching.
struct SceneHooks {
    state: Arc<EditorState>,
    store: ShaderParams,
    target: Option<(Token, Token)>,
}

impl SceneHooks {
    fn target_params(&self) -> Option<Arc<ParamBlock>> {
        let (scene, name) = self.target.as_ref()?;
        self.state.scenes.params(scene, name)
    }
}

impl RenderScene for SceneHooks {
    fn set_selected_shader(&mut self, shader_name: &str) {
        let Some((scene, name)) = &self.target else {
            return;
        };
        let shader = self.state.tokens.get_or_create(shader_name);
        if self
            .state
            .scenes
            .with_object_mut(scene, name, |o| o.shader_name = Some(shader))
            .is_some()
        {
            info!("Shader '{shader_name}' selected for '{name}'");
        }
    }

    fn reload_shader_params(&mut self, shader_name: &str) {
        if !self.store.load(shader_name, true) {
            debug!("No parameters for '{shader_name}'");
            return;
        }
        let Some(descriptor) = self.store.descriptor(shader_name) else {
            return;
        };
        let descriptor = Arc::new(descriptor);
        let shader = self.state.tokens.get_or_create(shader_name);

        if let Some((scene, name)) = &self.target {
            let bound = self.state.scenes.with_object_mut(scene, name, |o| {
                let bound = o.shader_name.get_or_insert_with(|| shader.clone()) == &shader;
                (bound, o.params.clone())
            });
            match bound {
                Some((true, Some(block))) => block.migrate(descriptor.clone()),
                Some((true, None)) => {
                    let block = ParamBlock::with_bytes(descriptor.clone(), descriptor.default_bytes());
                    if let Err(e) = self.state.scenes.set_params(scene, name, block, None) {
                        error!("Failed to attach parameters to '{name}': {e}");
                    }
                }
                _ => {}
            }
        }
        let refreshed = self.state.scenes.refresh_params_for_shader(&shader, &mut self.store);
        debug!("Reloaded '{shader_name}' parameters into {refreshed} objects");
    }

    fn current_shader_params(&mut self, shader_name: &str, dst: &mut [u8]) -> usize {
        if let Some(block) = self.target_params() {
            return block.read(|_, bytes| {
                let len = bytes.len().min(dst.len());
                dst[..len].copy_from_slice(&bytes[..len]);
                bytes.len()
            });
        }
        match self.store.packed_bytes(shader_name, dst.len()) {
            Some(bytes) => {
                let len = bytes.len().min(dst.len());
                dst[..len].copy_from_slice(&bytes[..len]);
                bytes.len()
            }
            None => 0,
        }
    }
}

/// The render thread's view of the editor: pipelines, workers and the object on screen.
pub struct EditorScene {
    renderer: Renderer,
    hooks: SceneHooks,
    state: Arc<EditorState>,
    graveyard: Graveyard,
    binding: Option<ShaderParamsBinding>,
    last_target: Option<(Token, Token)>,
    last_epoch: u64,
    last_dispatch: Option<ShaderDispatchResult>,
}

impl EditorScene {
    pub(crate) fn new(state: Arc<EditorState>, store: ShaderParams) -> Self {
        let backends = state.backends.clone();
        let renderer = Renderer::new(backends.compute, backends.compiler, backends.raster, state.requests.clone());
        Self {
            renderer,
            hooks: SceneHooks {
                state: state.clone(),
                store,
                target: None,
            },
            state,
            graveyard: Graveyard::default(),
            binding: None,
            last_target: None,
            last_epoch: 0,
            last_dispatch: None,
        }
    }

    /// Scene and object on screen, as shown in the properties pane.
    pub fn selected(&self) -> Option<&(Token, Token)> {
        self.last_target.as_ref()
    }

    pub fn failed_shader(&self) -> Option<&str> {
        self.renderer.failed_shader()
    }

    pub fn last_dispatch(&self) -> Option<ShaderDispatchResult> {
        self.last_dispatch
    }

    pub fn shader_params(&mut self) -> &mut ShaderParams {
        &mut self.hooks.store
    }

    fn current_target(&self) -> Option<(Token, Token)> {
        let scene = self.state.views.current_scene();
        let view = self.state.views.current_view(Some(&scene))?;
        Some((scene, view))
    }

    fn track_selection(&mut self, target: &Option<(Token, Token)>) {
        let epoch = target
            .as_ref()
            .map_or(0, |(scene, _)| self.state.views.current_view_epoch(Some(scene)));
        if *target == self.last_target && epoch == self.last_epoch {
            return;
        }
        self.last_epoch = epoch;
        self.last_target = target.clone();
        let Some((scene, name)) = target else {
            info!("Nothing selected");
            return;
        };
        info!("Viewing '{name}' in scene '{scene}'");

        let mut pipelines = self.state.pipelines();
        let Some(config) = pipelines.object_pipeline_mut(scene, name, PipelineType::Render, None) else {
            return;
        };
        if config.params.is_none() && PipelineManager::initialize_params_from_json(config, &mut self.hooks.store) {
            if let Some(block) = config.params.clone() {
                if let Err(e) = self.state.scenes.set_params(scene, name, block, None) {
                    error!("Failed to attach render parameters to '{name}': {e}");
                }
            }
        }
    }

    /// Serves `sync_shader_params` requests against the object on screen.
    fn sync_shader_params(&mut self) {
        let worker = &self.state.worker;
        worker.shader_params().refresh(&mut self.binding);
        let set = worker.is_sync_pending(true);
        let get = worker.is_sync_pending(false);
        if !set && !get {
            return;
        }

        let target_params = self.hooks.target_params();
        let bound = match (&self.binding, &target_params) {
            (Some(binding), Some(block)) if !Arc::ptr_eq(&binding.params, block) => Some((binding, block)),
            _ => None,
        };
        if let Some((binding, block)) = bound {
            if set {
                let copied = binding
                    .params
                    .read(|_, bytes| block.copy_from(&binding.descriptor, bytes));
                if let Some((scene, name)) = &self.hooks.target {
                    self.state.pipelines().mark_object_all_dirty(scene, name);
                }
                debug!("Pushed {copied} parameter bytes into the scene");
            }
            if get {
                let (descriptor, bytes) = block.snapshot();
                binding.params.copy_from(&descriptor, &bytes);
            }
        } else {
            debug!("Parameter sync skipped: nothing bound");
        }
        if set {
            worker.finish_sync(true);
        }
        if get {
            worker.finish_sync(false);
        }
    }

    fn run_pipelines(&mut self) {
        let report = self.state.pipelines().execute_dirty_pipelines(&self.state.resources());
        if report.executed > 0 {
            debug!("Executed {} pipelines", report.executed);
        }
        for payload in report.retired {
            self.graveyard.retire_payload(payload);
        }
    }

    fn poll_workers(&mut self) {
        let import = self
            .state
            .pipelines()
            .poll_import(&self.state.scenes, &self.state.views);
        if let Some(done) = import {
            self.finish_import(done);
        }

        let rasterized = self
            .state
            .rasterizer
            .handle_rasterization_completion(&self.state.scenes, &self.state.views);
        if let Some(done) = rasterized {
            if let Some(payload) = &done.payload {
                self.state
                    .pipelines()
                    .create_default_pipelines(&done.scene, &done.name, payload.object_type(), None);
            }
            self.finish_import(done);
        }
    }

    fn finish_import(&mut self, done: ImportCompletion) {
        match &done.error {
            None => info!("Loaded '{}' as '{}'", done.filepath.display(), done.name),
            Some(e) => error!("Failed to load '{}': {e}", done.filepath.display()),
        }
        self.graveyard.retire(done.retired);
    }

    fn render_target(&mut self, target: &(Token, Token), background: &mut Texture, camera: &Camera) {
        let (scene, name) = target;
        let Some(object) = self.state.scenes.get(scene, name) else {
            return;
        };
        let (width, height) = (background.width(), background.height());
        let view = camera.view_matrix();
        let projection = camera.projection_matrix(width, height);

        match RenderType::from(object.payload.object_type()) {
            RenderType::NanoVdb => {
                let input = object
                    .output
                    .as_ref()
                    .and_then(Payload::as_array)
                    .or_else(|| object.payload.as_array())
                    .cloned();
                let Some(input) = input else {
                    return;
                };
                let shader = object
                    .shader_name
                    .as_ref()
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_else(|| self.state.viewport_shader());
                // an object bound to another shader than the one compiled needs a rebuild
                let stale = self
                    .renderer
                    .active_shader()
                    .is_some_and(|active| active != shader);
                if stale && !self.state.requests.is_update_pending() {
                    self.state.requests.request_update();
                }
                let result =
                    self.renderer
                        .dispatch_nanovdb_shader(&input, &shader, background, &view, &projection, &mut self.hooks);
                self.last_dispatch = Some(result);
            }
            RenderType::Raster2D => {
                let Some(data) = object.payload.as_gaussian() else {
                    return;
                };
                let block = match &self.binding {
                    Some(binding) => Some(binding.params.clone()),
                    None => object.params.clone(),
                };
                let mut params = raster_shader_params(block.as_deref());
                if params.near_plane_override == 0.0 {
                    params.near_plane_override = camera.config.near_plane;
                }
                if params.far_plane_override == 0.0 && camera.config.far_plane.is_finite() {
                    params.far_plane_override = camera.config.far_plane;
                }
                self.renderer
                    .render_gaussian(data, background, &view, &projection, &params);
            }
            RenderType::None => {}
        }
    }

    /// Drains the single-object cells. Retired data from earlier API calls joins the graveyard.
    pub(crate) fn process_pending(&mut self) -> bool {
        self.state.apply_pending()
    }

    /// Releases the renderer's device resources and everything awaiting release.
    pub(crate) fn release(&mut self) {
        self.renderer.cleanup();
        self.graveyard.begin_frame(self.state.take_retired());
        self.graveyard.end_frame();
        self.graveyard.end_frame();
    }
}

impl FrameRenderer for EditorScene {
    fn render(&mut self, background: &mut Texture, camera: &Camera) {
        self.graveyard.begin_frame(self.state.take_retired());

        let target = self.current_target();
        self.hooks.target = target.clone();
        self.track_selection(&target);
        self.sync_shader_params();
        self.run_pipelines();
        self.poll_workers();

        match &target {
            Some(target) => self.render_target(target, background, camera),
            None => self.last_dispatch = None,
        }

        self.state.store_viewport_camera(*camera);
        self.graveyard.end_frame();
    }

    fn wait_idle(&mut self) {
        self.state.backends.compute.wait_idle();
    }
}
