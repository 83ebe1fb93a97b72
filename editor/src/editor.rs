use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use backend::{RESOLVED_PORT_PENDING, RESOLVED_PORT_UNRESOLVED};
use compute::{ComputeArray, GaussianData, GaussianDataDesc};
use params::{ParamBlock, ReflectType};
use pipeline::{PipelineSettings, PipelineStatus, PipelineType, TaskId};
use scene::{Camera, CameraView, ObjectType, Payload, SceneError};
use token::Token;
use tracing::{debug, info, warn};
use viewer::Swapchain;

use crate::config::EditorConfig;
use crate::frame_loop::EditorLoop;
use crate::mapped::MappedParams;
use crate::state::{EditorBackends, EditorState, lock};
use crate::{EditorError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Builds the window surface for a non-headless session, on the render thread.
pub type SwapchainFactory = Box<dyn FnOnce(u32, u32) -> Box<dyn Swapchain> + Send>;

fn not_found(scene: &Token, name: &Token) -> EditorError {
    SceneError::ObjectNotFound {
        scene: scene.to_string(),
        name: name.to_string(),
    }
    .into()
}

/// Embedding API of the editor. Every method may be called from any thread.
///
/// Objects added while the render thread runs are handed over through pending cells and
/// picked up at the top of the next frame.
pub struct Editor {
    state: Arc<EditorState>,
    render_thread: Mutex<Option<JoinHandle<()>>>,
    swapchain_factory: Mutex<Option<SwapchainFactory>>,
}

impl Editor {
    /// Editor on the CPU reference backends.
    pub fn init() -> Result<Self> {
        Self::init_impl(EditorBackends::cpu())
    }

    pub fn init_impl(backends: EditorBackends) -> Result<Self> {
        let state = Arc::new(EditorState::new(backends)?);
        info!("Editor initialized");
        Ok(Self {
            state,
            render_thread: Mutex::new(None),
            swapchain_factory: Mutex::new(None),
        })
    }

    /// Stops rendering and releases scenes, pipelines and tokens, in that order.
    pub fn shutdown(self) {
        drop(self);
    }

    fn teardown(&self) {
        self.stop();
        self.state.apply_pending();
        self.state.clear_scenes();
        self.state.tokens.clear();
        info!("Editor shut down");
    }

    pub fn set_swapchain_factory(&self, factory: SwapchainFactory) {
        *lock(&self.swapchain_factory) = Some(factory);
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    fn take_swapchain(&self, config: &EditorConfig) -> Option<Box<dyn Swapchain>> {
        if config.headless {
            return None;
        }
        lock(&self.swapchain_factory)
            .take()
            .map(|factory| factory(config.width, config.height))
    }

    /// A frame loop on the calling thread, stepped by the caller.
    pub fn frame_loop(&self, config: &EditorConfig) -> Result<EditorLoop> {
        if self.is_running() {
            return Err(EditorError::AlreadyRunning);
        }
        let swapchain = self.take_swapchain(config);
        Ok(EditorLoop::new(self.state.clone(), config, swapchain))
    }

    /// Runs the editor on the calling thread until the window closes or `stop` is called.
    pub fn show(&self, config: &EditorConfig) -> Result<()> {
        let mut frame_loop = self.frame_loop(config)?;
        frame_loop.run();
        Ok(())
    }

    /// Runs the editor on its own render thread.
    pub fn start(&self, config: &EditorConfig) -> Result<()> {
        let mut render_thread = lock(&self.render_thread);
        if render_thread.as_ref().is_some_and(|h| h.is_finished()) {
            if let Some(finished) = render_thread.take() {
                if finished.join().is_err() {
                    warn!("{}", EditorError::RenderThread);
                }
            }
        }
        if render_thread.is_some() || self.is_running() {
            return Err(EditorError::AlreadyRunning);
        }
        let factory = if config.headless {
            None
        } else {
            lock(&self.swapchain_factory).take()
        };

        self.state.worker.clear_stop();
        self.state.running.store(true, Ordering::Release);
        if config.streaming {
            self.state.resolved_port.store(RESOLVED_PORT_PENDING, Ordering::Release);
        }

        let state = self.state.clone();
        let config = config.clone();
        let spawned = std::thread::Builder::new()
            .name("editor-render".to_string())
            .spawn(move || {
                let swapchain = factory.map(|factory| factory(config.width, config.height));
                let mut frame_loop = EditorLoop::new(state, &config, swapchain);
                frame_loop.run();
            });
        match spawned {
            Ok(handle) => {
                *render_thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.state.running.store(false, Ordering::Release);
                self.state.resolved_port.store(RESOLVED_PORT_UNRESOLVED, Ordering::Release);
                Err(e.into())
            }
        }
    }

    /// Asks the frame loop to exit. Waits for the render thread when `start` spawned one.
    pub fn stop(&self) {
        self.state.worker.request_stop();
        if self.join_render_thread() {
            self.state.worker.clear_stop();
        }
    }

    /// Blocks until the render thread exits on its own.
    pub fn wait_for_interrupt(&self) {
        self.join_render_thread();
    }

    fn join_render_thread(&self) -> bool {
        let Some(handle) = lock(&self.render_thread).take() else {
            return false;
        };
        if handle.join().is_err() {
            warn!("{}", EditorError::RenderThread);
        }
        debug!("Render thread joined");
        true
    }

    /// Stops rendering and empties every scene. Tokens survive.
    pub fn reset(&self) {
        self.stop();
        self.state.apply_pending();
        self.state.clear_scenes();
        info!("Editor reset");
    }

    /// Drains the pending cells on this thread when no render thread will.
    fn flush_if_idle(&self) {
        if !self.is_running() {
            self.state.apply_pending();
        }
    }

    pub fn get_token(&self, name: &str) -> Token {
        self.state.tokens.get_or_create(name)
    }

    // Single-object entry points. Objects land in the default scene.

    pub fn add_nanovdb(&self, array: ComputeArray) {
        self.state.worker.publish_nanovdb(Arc::new(array));
        self.flush_if_idle();
    }

    pub fn add_array(&self, array: ComputeArray) {
        self.state.worker.publish_data_array(Arc::new(array));
        self.flush_if_idle();
    }

    pub fn add_gaussian_data(&self, desc: GaussianDataDesc) -> Result<()> {
        let data = self.state.backends.raster.create_gaussian_data(desc)?;
        self.state.worker.publish_gaussian_data(Arc::new(data));
        self.flush_if_idle();
        Ok(())
    }

    /// Moves the viewport camera, pose and projection.
    pub fn update_camera(&self, camera: &Camera) {
        self.state.worker.publish_camera(*camera);
        self.flush_if_idle();
    }

    /// Binds `params` as the block `sync_shader_params` copies to and from.
    pub fn add_shader_params(&self, params: Arc<ParamBlock>) {
        self.state.worker.publish_shader_params(params);
        self.flush_if_idle();
    }

    /// Copies the bound block into the object on screen (`set_data`) or back out of it, and
    /// waits until the render thread has done so. Returns false without a render thread.
    pub fn sync_shader_params(&self, set_data: bool) -> bool {
        if !self.is_running() {
            return false;
        }
        let worker = &self.state.worker;
        worker.begin_sync(set_data);
        while worker.is_sync_pending(set_data) {
            if !self.is_running() {
                worker.finish_sync(set_data);
                return false;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        true
    }

    /// Live viewport camera.
    pub fn get_camera(&self) -> Camera {
        self.state.camera()
    }

    // Scene-scoped entry points.

    /// Adds a copy of `array`. A byte-identical copy of an array added earlier shares the
    /// stored handle.
    pub fn add_nanovdb_2(&self, scene: &Token, name: &Token, array: &ComputeArray) -> Arc<ComputeArray> {
        let stored = self.state.share_or_duplicate(array);
        let retired = self.state.install_nanovdb(scene, name, stored.clone(), None);
        self.state.retire(retired);
        info!("Added volume '{name}' to scene '{scene}'");
        stored
    }

    pub fn add_gaussian_data_2(&self, scene: &Token, name: &Token, desc: GaussianDataDesc) -> Result<Arc<GaussianData>> {
        let data = Arc::new(self.state.backends.raster.create_gaussian_data(desc)?);
        let retired = self.state.install_gaussian(scene, name, data.clone(), None);
        self.state.retire(retired);
        info!("Added {} gaussians as '{name}' to scene '{scene}'", data.count());
        Ok(data)
    }

    /// Camera set added to the default scene.
    pub fn add_camera_view(&self, name: &Token, cameras: &CameraView) -> Arc<CameraView> {
        let scene = self.state.views.default_scene().clone();
        self.add_camera_view_2(&scene, name, cameras)
    }

    pub fn add_camera_view_2(&self, scene: &Token, name: &Token, cameras: &CameraView) -> Arc<CameraView> {
        let (stored, retired) = self.state.scenes.add_camera(scene, name, cameras);
        self.state.retire(retired);
        self.state.views.add_camera(Some(scene), name, &stored);
        stored
    }

    /// Replaces the viewport camera record of `scene`. The live view follows when the scene
    /// is on screen.
    pub fn update_camera_2(&self, scene: &Token, camera: &Camera) {
        let viewport_camera = self.state.views.viewport_camera_token().clone();
        self.add_camera_view_2(scene, &viewport_camera, &CameraView::single(*camera));
        if self.state.views.current_scene() == *scene {
            self.update_camera(camera);
        }
    }

    /// Removes the object, its view and its pipelines. Returns false when there was none.
    pub fn remove(&self, scene: &Token, name: &Token) -> bool {
        let Some(retired) = self.state.scenes.remove(scene, name) else {
            return false;
        };
        self.state.views.remove_and_fix_current(Some(scene), name);
        self.state.pipelines().remove_object_pipelines(scene, name);
        self.state.retire(retired);
        info!("Removed '{name}' from scene '{scene}'");
        true
    }

    /// Copies the object's parameters into a buffer laid out as `descriptor`.
    pub fn map_params(&self, scene: &Token, name: &Token, descriptor: &ReflectType) -> Result<MappedParams> {
        if !self.state.scenes.contains(scene, name) {
            return Err(not_found(scene, name));
        }
        let block = self
            .state
            .scenes
            .params(scene, name)
            .ok_or_else(|| EditorError::NoParams {
                scene: scene.to_string(),
                name: name.to_string(),
            })?;
        Ok(MappedParams::new(scene.clone(), name.clone(), descriptor, block))
    }

    /// Writes a mapped buffer back and marks the object's pipelines dirty.
    ///
    /// Returns false, keeping the object's values, when its parameter block was replaced or
    /// changed layout after mapping.
    pub fn unmap_params(&self, mapped: MappedParams) -> Result<bool> {
        let (scene, name) = (&mapped.scene, &mapped.name);
        let block = self
            .state
            .scenes
            .params(scene, name)
            .ok_or_else(|| not_found(scene, name))?;
        if !mapped.is_current(&block) {
            warn!("Parameters of '{name}' changed layout while mapped; discarding the write");
            return Ok(false);
        }
        let copied = block.copy_from(&mapped.descriptor, &mapped.bytes);
        self.state.pipelines().mark_object_all_dirty(scene, name);
        debug!("Unmapped {copied} bytes into '{name}'");
        Ok(true)
    }

    /// Pipeline result of the object, or the object's own data when its conversion is a
    /// passthrough that has not run yet.
    pub fn get_output(&self, scene: &Token, name: &Token) -> Option<Payload> {
        if let Some(output) = self.state.scenes.output(scene, name) {
            return Some(output);
        }
        let object = self.state.scenes.get(scene, name)?;
        let passthrough = matches!(object.payload.object_type(), ObjectType::NanoVdb | ObjectType::Array);
        passthrough.then_some(object.payload)
    }

    pub fn add_named_array(&self, scene: &Token, name: &Token, component: &str, array: ComputeArray) -> Result<()> {
        let component = self.get_token(component);
        let previous = self
            .state
            .scenes
            .add_named_array(scene, name, &component, Arc::new(array))?;
        if let Some(previous) = previous {
            self.state.retire_payload(Payload::Array(previous));
        }
        self.state.pipelines().mark_object_all_dirty(scene, name);
        Ok(())
    }

    pub fn get_named_array(&self, scene: &Token, name: &Token, component: &str) -> Option<Arc<ComputeArray>> {
        let component = self.state.tokens.get(component)?;
        self.state.scenes.named_array(scene, name, &component)
    }

    pub fn remove_named_array(&self, scene: &Token, name: &Token, component: &str) -> Result<bool> {
        let Some(component) = self.state.tokens.get(component) else {
            return Ok(false);
        };
        let removed = self.state.scenes.remove_named_array(scene, name, &component)?;
        let Some(removed) = removed else {
            return Ok(false);
        };
        self.state.retire_payload(Payload::Array(removed));
        self.state.pipelines().mark_object_all_dirty(scene, name);
        Ok(true)
    }

    // Pipelines and workers.

    pub fn configure_pipeline(
        &self,
        scene: &Token,
        name: &Token,
        ty: PipelineType,
        settings: &PipelineSettings,
    ) -> Result<bool> {
        Ok(self.state.pipelines().configure_pipeline(scene, name, ty, settings, None)?)
    }

    /// Runs one pipeline of the object now, even when it does not auto-execute.
    pub fn run_pipeline(&self, scene: &Token, name: &Token, ty: PipelineType) -> Result<PipelineStatus> {
        let (status, retired) =
            self.state
                .pipelines()
                .run_pipeline_manual(scene, name, ty, None, &self.state.resources())?;
        for payload in retired {
            self.state.retire_payload(payload);
        }
        Ok(status)
    }

    pub fn pipeline_status(&self, scene: &Token, name: &Token, ty: PipelineType) -> Option<PipelineStatus> {
        self.state.pipelines().pipeline_status(scene, name, ty, None)
    }

    /// Loads a volume or gaussian file in the background into the current scene.
    pub fn import_file(&self, path: impl AsRef<Path>, rasterize_to_nanovdb: bool, voxel_size: Option<f32>) -> Result<()> {
        Ok(self
            .state
            .pipelines()
            .import_file(path, rasterize_to_nanovdb, voxel_size, &self.state.resources())?)
    }

    /// Rasterizes a gaussian file in the background into the current scene.
    pub fn rasterize_file(&self, path: impl AsRef<Path>, voxels_per_unit: f32, rasterize_to_nanovdb: bool) -> Result<TaskId> {
        Ok(self
            .state
            .rasterizer
            .start_rasterization(path, voxels_per_unit, rasterize_to_nanovdb)?)
    }

    pub fn is_importing(&self) -> bool {
        self.state.pipelines().is_importing() || self.state.rasterizer.is_rasterizing()
    }

    // Views and shaders.

    pub fn set_current_scene(&self, scene: &Token) {
        self.state.views.set_current_scene(scene);
    }

    pub fn set_current_view(&self, scene: &Token, view: Option<&Token>) {
        self.state.views.set_current_view(Some(scene), view);
    }

    pub fn current_view(&self, scene: &Token) -> Option<Token> {
        self.state.views.current_view(Some(scene))
    }

    pub fn current_view_epoch(&self, scene: &Token) -> u64 {
        self.state.views.current_view_epoch(Some(scene))
    }

    /// Recompiles the viewport shader on the next frame.
    pub fn request_shader_update(&self) {
        self.state.requests.request_update();
    }

    /// Switches the viewport shader, rebinding the object on screen on the next compile.
    pub fn set_viewport_shader(&self, shader_name: &str) {
        self.state.set_viewport_shader(shader_name);
        self.state.requests.set_editor_shader(shader_name);
        self.state.requests.request_update();
    }

    /// Port the stream server bound, or one of the `RESOLVED_PORT_*` sentinels.
    ///
    /// With `should_wait`, blocks while a bind is in progress.
    pub fn get_resolved_port(&self, should_wait: bool) -> i32 {
        loop {
            let port = self.state.resolved_port.load(Ordering::Acquire);
            if !should_wait || port != RESOLVED_PORT_PENDING {
                return port;
            }
            if !self.is_running() {
                return RESOLVED_PORT_UNRESOLVED;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Drop for Editor {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compute::cpu::{CpuCompiler, CpuCompute, CpuFileLoader, CpuRaster, DEFAULT_EDITOR_SHADER, VoxelGrid, volume_kernel};
    use compute::{Texture, TextureFormat};
    use glam::{IVec3, Vec3};
    use render::ShaderDispatchResult;
    use scene::{CameraConfig, CameraState};
    use viewer::FrameRenderer;

    const GOOD_SHADER: &str = "struct shader_params { float density; };\nvoid main() { }\n";
    const BROKEN_SHADER: &str = "void main() {\n";
    const SIZE: u32 = 64;

    struct Fixture {
        _dir: tempfile::TempDir,
        config: EditorConfig,
        compute: Arc<CpuCompute>,
        compiler: Arc<CpuCompiler>,
        editor: Editor,
    }

    impl Fixture {
        fn new(shader_source: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let config = EditorConfig {
                headless: true,
                shader_dir: dir.path().join("shaders"),
                cache_dir: dir.path().join("cache"),
                width: SIZE,
                height: SIZE,
                ..Default::default()
            };
            let compute = Arc::new(CpuCompute::new());
            let compiler = Arc::new(CpuCompiler::new());
            let backends = EditorBackends {
                compute: compute.clone(),
                compiler: compiler.clone(),
                raster: Arc::new(CpuRaster::new()),
                loader: Arc::new(CpuFileLoader::new()),
            };
            let fixture = Self {
                _dir: dir,
                config,
                compute,
                compiler,
                editor: Editor::init_impl(backends).unwrap(),
            };
            fixture.write_shader(shader_source);
            fixture.editor.update_camera(&camera());
            fixture
        }

        fn write_shader(&self, source: &str) {
            self.write_named_shader(DEFAULT_EDITOR_SHADER, source);
        }

        fn write_named_shader(&self, shader_name: &str, source: &str) {
            let path = self.config.shader_dir.join(shader_name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, source).unwrap();
            self.compute.register_kernel(shader_name, Arc::new(volume_kernel));
        }

        fn tokens(&self) -> (Token, Token, Token) {
            (self.editor.get_token("S"), self.editor.get_token("A"), self.editor.get_token("B"))
        }
    }

    fn camera() -> Camera {
        Camera::new(
            CameraState::look_at(Vec3::new(0.0, 0.0, -2.0), Vec3::ZERO, Vec3::Y),
            CameraConfig::default(),
        )
    }

    fn unit_voxel() -> ComputeArray {
        let mut grid = VoxelGrid::new(1.0);
        grid.set(IVec3::ZERO, 1.0);
        grid.to_array()
    }

    fn one_gaussian() -> GaussianDataDesc {
        GaussianDataDesc {
            means: Some(ComputeArray::from_slice(&[0.0f32, 0.0, 0.0])),
            opacities: Some(ComputeArray::from_slice(&[4.0f32])),
            scales: Some(ComputeArray::from_slice(&[(0.02f32).ln(); 3])),
            ..Default::default()
        }
    }

    fn frame(frame_loop: &mut EditorLoop) -> Texture {
        frame_at(frame_loop, SIZE)
    }

    fn frame_at(frame_loop: &mut EditorLoop, size: u32) -> Texture {
        let mut target = Texture::new(TextureFormat::Rgba8Unorm, size, size);
        frame_loop.scene_mut().render(&mut target, &camera());
        target
    }

    #[test]
    fn renders_added_volume() {
        const FULL: u32 = 256;
        let fx = Fixture::new(GOOD_SHADER);
        let (scene, a, _) = fx.tokens();
        let config = EditorConfig {
            width: FULL,
            height: FULL,
            ..fx.config.clone()
        };
        let mut frame_loop = fx.editor.frame_loop(&config).unwrap();

        fx.editor.add_nanovdb_2(&scene, &a, &unit_voxel());
        assert!(frame_loop.step());
        assert_eq!(frame_loop.scene().last_dispatch(), Some(ShaderDispatchResult::Success));

        // red over black: above 0.9 where the voxel is, below 0.05 elsewhere
        let image = frame_at(&mut frame_loop, FULL);
        let center = image.pixel(FULL / 2, FULL / 2);
        assert!(center[0] > 230, "center red is {}", center[0]);
        assert!(center[1] < 13 && center[2] < 13);
        for (x, y) in [(0, 0), (FULL - 1, 0), (0, FULL - 1), (FULL - 1, FULL - 1)] {
            assert!(image.pixel(x, y)[0] < 13, "corner ({x}, {y}) is lit");
        }
        assert_eq!(fx.editor.current_view(&scene), Some(a));
    }

    #[test]
    fn replaced_volume_is_released() {
        let fx = Fixture::new(GOOD_SHADER);
        let (scene, a, _) = fx.tokens();
        let mut frame_loop = fx.editor.frame_loop(&fx.config).unwrap();

        let first = fx.editor.add_nanovdb_2(&scene, &a, &unit_voxel());
        assert!(frame_loop.step());
        let weak = Arc::downgrade(&first);
        drop(first);

        fx.editor.add_nanovdb_2(&scene, &a, &VoxelGrid::new(1.0).to_array());
        assert!(weak.upgrade().is_some());
        assert!(frame_loop.step());
        assert!(weak.upgrade().is_none());

        let image = frame(&mut frame_loop);
        assert_eq!(image.pixel(SIZE / 2, SIZE / 2)[0], 0);
    }

    #[test]
    fn identical_copies_share_storage() {
        let fx = Fixture::new(GOOD_SHADER);
        let (scene, a, b) = fx.tokens();
        let source = unit_voxel();
        let first = fx.editor.add_nanovdb_2(&scene, &a, &source);
        let second = fx.editor.add_nanovdb_2(&scene, &b, &source);
        assert!(Arc::ptr_eq(&first, &second));
        assert_ne!(first.id(), source.id());
    }

    #[test]
    fn gaussians_rasterize_on_the_next_tick() {
        let fx = Fixture::new(GOOD_SHADER);
        let (scene, _, _) = fx.tokens();
        let splats = fx.editor.get_token("G");
        let mut frame_loop = fx.editor.frame_loop(&fx.config).unwrap();

        fx.editor.add_gaussian_data_2(&scene, &splats, one_gaussian()).unwrap();
        assert!(frame_loop.step());
        assert_eq!(
            fx.editor.pipeline_status(&scene, &splats, PipelineType::Raster3D),
            Some(PipelineStatus::Completed)
        );

        let output = fx.editor.get_output(&scene, &splats).unwrap();
        let grid = VoxelGrid::from_bytes(output.as_nanovdb().unwrap().as_bytes()).unwrap();
        let (min, max) = grid.world_bbox().unwrap();
        assert!(min.cmple(Vec3::ZERO).all() && max.cmpge(Vec3::ZERO).all());
    }

    #[test]
    fn failed_compile_is_not_retried_until_requested() {
        let fx = Fixture::new(BROKEN_SHADER);
        let (scene, a, _) = fx.tokens();
        let mut frame_loop = fx.editor.frame_loop(&fx.config).unwrap();
        fx.editor.add_nanovdb_2(&scene, &a, &unit_voxel());

        for _ in 0..10 {
            assert!(frame_loop.step());
        }
        assert_eq!(fx.compiler.attempts(), 1);
        assert_eq!(frame_loop.failed_shader(), Some(DEFAULT_EDITOR_SHADER));
        assert_eq!(frame_loop.scene().last_dispatch(), Some(ShaderDispatchResult::Skipped));

        fx.write_shader(GOOD_SHADER);
        fx.editor.request_shader_update();
        assert!(frame_loop.step());
        assert_eq!(fx.compiler.attempts(), 2);
        assert_eq!(frame_loop.failed_shader(), None);
        assert_eq!(frame_loop.scene().last_dispatch(), Some(ShaderDispatchResult::Success));
    }

    #[test]
    fn viewport_shader_switch_compiles_once() {
        let fx = Fixture::new(GOOD_SHADER);
        let (scene, a, _) = fx.tokens();
        fx.write_named_shader("b.slang", GOOD_SHADER);
        fx.write_named_shader("c.slang", GOOD_SHADER);
        let mut frame_loop = fx.editor.frame_loop(&fx.config).unwrap();
        fx.editor.add_nanovdb_2(&scene, &a, &unit_voxel());
        for _ in 0..3 {
            assert!(frame_loop.step());
        }
        assert_eq!(fx.compiler.attempts(), 1);

        for (switches, shader) in [(1, "b.slang"), (2, "c.slang")] {
            fx.editor.set_viewport_shader(shader);
            for _ in 0..5 {
                assert!(frame_loop.step());
            }
            assert_eq!(fx.compiler.attempts(), 1 + switches, "switch to {shader}");
            assert_eq!(frame_loop.scene().last_dispatch(), Some(ShaderDispatchResult::Success));
            let bound = fx.editor.state.scenes.get(&scene, &a).unwrap().shader_name;
            assert_eq!(bound.as_ref().map(Token::as_str), Some(shader));
        }
        assert!(frame(&mut frame_loop).pixel(SIZE / 2, SIZE / 2)[0] > 128);
    }

    #[test]
    fn view_switch_bumps_epoch_once() {
        let fx = Fixture::new(GOOD_SHADER);
        let (scene, a, b) = fx.tokens();
        let mut frame_loop = fx.editor.frame_loop(&fx.config).unwrap();
        fx.editor.add_nanovdb_2(&scene, &a, &unit_voxel());
        fx.editor.add_nanovdb_2(&scene, &b, &VoxelGrid::new(1.0).to_array());
        assert!(frame_loop.step());
        assert_eq!(frame_loop.scene().selected(), Some(&(scene.clone(), b.clone())));

        let before = fx.editor.current_view_epoch(&scene);
        fx.editor.set_current_view(&scene, Some(&a));
        assert_eq!(fx.editor.current_view_epoch(&scene), before + 1);

        assert!(frame_loop.step());
        assert_eq!(frame_loop.scene().selected(), Some(&(scene.clone(), a.clone())));
        assert!(frame(&mut frame_loop).pixel(SIZE / 2, SIZE / 2)[0] > 128);
    }

    #[test]
    fn mapped_params_write_back_unless_layout_changed() {
        let fx = Fixture::new(GOOD_SHADER);
        let (scene, a, _) = fx.tokens();
        let mut frame_loop = fx.editor.frame_loop(&fx.config).unwrap();
        fx.editor.add_nanovdb_2(&scene, &a, &unit_voxel());
        assert!(frame_loop.step());

        let client = ReflectType::new("client").with_f32("density", 0.0);
        let mut mapped = fx.editor.map_params(&scene, &a, &client).unwrap();
        assert!(mapped.get::<f32>("density").is_some());
        assert!(mapped.set("density", 2.5f32));
        assert!(fx.editor.unmap_params(mapped).unwrap());
        let block = fx.editor.state.scenes.params(&scene, &a).unwrap();
        assert_eq!(block.get::<f32>("density"), Some(2.5));

        let stale = fx.editor.map_params(&scene, &a, &client).unwrap();
        block.migrate(Arc::new(
            ReflectType::new("editor").with_f32("density", 0.0).with_f32("scale", 1.0),
        ));
        assert!(!fx.editor.unmap_params(stale).unwrap());

        let missing = fx.editor.get_token("missing");
        assert!(matches!(
            fx.editor.map_params(&scene, &missing, &client),
            Err(EditorError::Scene(_))
        ));
    }

    #[test]
    fn unmapped_params_dirty_the_pipeline_until_next_tick() {
        let fx = Fixture::new(GOOD_SHADER);
        let (scene, a, _) = fx.tokens();
        let mut frame_loop = fx.editor.frame_loop(&fx.config).unwrap();
        fx.editor.add_nanovdb_2(&scene, &a, &unit_voxel());
        assert!(frame_loop.step());
        assert_eq!(
            fx.editor.pipeline_status(&scene, &a, PipelineType::Null),
            Some(PipelineStatus::Completed)
        );

        let client = ReflectType::new("client").with_f32("density", 0.0);
        let mut mapped = fx.editor.map_params(&scene, &a, &client).unwrap();
        assert!(mapped.set("density", 0.5f32));
        assert!(fx.editor.unmap_params(mapped).unwrap());
        assert_eq!(
            fx.editor.pipeline_status(&scene, &a, PipelineType::Null),
            Some(PipelineStatus::Dirty)
        );

        assert!(frame_loop.step());
        assert_eq!(
            fx.editor.pipeline_status(&scene, &a, PipelineType::Null),
            Some(PipelineStatus::Completed)
        );
        assert_eq!(frame_loop.scene().last_dispatch(), Some(ShaderDispatchResult::Success));
    }

    #[test]
    fn legacy_entry_points_fill_default_scene() {
        let fx = Fixture::new(GOOD_SHADER);
        fx.editor.add_nanovdb(unit_voxel());
        fx.editor.add_array(ComputeArray::from_slice(&[1u32, 2, 3]));

        let default_scene = fx.editor.state.views.default_scene().clone();
        let nanovdb = fx.editor.get_token(crate::LEGACY_NANOVDB_NAME);
        let array = fx.editor.get_token(crate::LEGACY_ARRAY_NAME);
        assert!(fx.editor.state.scenes.contains(&default_scene, &nanovdb));
        assert!(fx.editor.state.scenes.contains(&default_scene, &array));
        assert_eq!(fx.editor.current_view(&default_scene), Some(nanovdb));
        assert_eq!(fx.editor.get_camera().state, camera().state);
        assert!(!fx.editor.sync_shader_params(true));
    }

    #[test]
    fn remove_falls_back_to_remaining_view() {
        let fx = Fixture::new(GOOD_SHADER);
        let (scene, a, b) = fx.tokens();
        fx.editor.add_nanovdb_2(&scene, &a, &unit_voxel());
        fx.editor.add_nanovdb_2(&scene, &b, &unit_voxel());
        fx.editor
            .add_named_array(&scene, &a, "mask", ComputeArray::from_slice(&[1.0f32]))
            .unwrap();
        assert!(fx.editor.get_named_array(&scene, &a, "mask").is_some());
        assert!(fx.editor.remove_named_array(&scene, &a, "mask").unwrap());
        assert!(!fx.editor.remove_named_array(&scene, &a, "mask").unwrap());

        assert!(fx.editor.remove(&scene, &b));
        assert!(!fx.editor.remove(&scene, &b));
        assert_eq!(fx.editor.current_view(&scene), Some(a.clone()));
        assert_eq!(fx.editor.pipeline_status(&scene, &b, PipelineType::Null), None);
    }

    #[test]
    fn threaded_sync_copies_bound_params() {
        let fx = Fixture::new(GOOD_SHADER);
        let (scene, a, _) = fx.tokens();
        fx.editor.add_nanovdb_2(&scene, &a, &unit_voxel());
        let config = fx.config.clone();
        fx.editor.start(&config).unwrap();
        assert!(matches!(fx.editor.start(&config), Err(EditorError::AlreadyRunning)));

        // the first compile attaches the reflected parameter block
        let reflected = || {
            fx.editor
                .state
                .scenes
                .params(&scene, &a)
                .is_some_and(|block| block.get::<f32>("density").is_some())
        };
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while !reflected() {
            assert!(std::time::Instant::now() < deadline, "no parameters attached");
            std::thread::sleep(POLL_INTERVAL);
        }

        let bound = ParamBlock::new(ReflectType::new("client").with_f32("density", 0.75));
        fx.editor.add_shader_params(bound.clone());
        assert!(fx.editor.sync_shader_params(true));
        let block = fx.editor.state.scenes.params(&scene, &a).unwrap();
        assert_eq!(block.get::<f32>("density"), Some(0.75));

        block.set("density", 0.25f32);
        assert!(fx.editor.sync_shader_params(false));
        assert_eq!(bound.get::<f32>("density"), Some(0.25));

        fx.editor.stop();
        assert!(!fx.editor.is_running());
    }

    #[test]
    fn streaming_port_skips_occupied_ports() {
        let fx = Fixture::new(GOOD_SHADER);
        let (first, second, base) = loop {
            let first = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            let base = first.local_addr().unwrap().port();
            if base > u16::MAX - 8 {
                continue;
            }
            if let Ok(second) = std::net::TcpListener::bind(("127.0.0.1", base + 1)) {
                break (first, second, base);
            }
        };
        let config = EditorConfig {
            streaming: true,
            port: base,
            server_create_max_attempts: 8,
            ..fx.config.clone()
        };

        assert_eq!(fx.editor.get_resolved_port(false), RESOLVED_PORT_UNRESOLVED);
        fx.editor.start(&config).unwrap();
        let port = fx.editor.get_resolved_port(true);
        assert!(port >= i32::from(base) + 2, "bound occupied port {port}");
        assert!(port < i32::from(base) + 8);

        fx.editor.stop();
        assert_eq!(fx.editor.get_resolved_port(false), RESOLVED_PORT_UNRESOLVED);
        drop((first, second));
    }
}
