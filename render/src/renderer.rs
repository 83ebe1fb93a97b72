use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use compute::{
    CompilerSettings, Compute, ComputeArray, DeviceBuffer, DispatchParams, EditorParams, GaussianData, Raster,
    RasterShaderParams, ShaderCompiler, ShaderContext, Texture,
};
use glam::Mat4;
use params::ParamBlock;
use scene::ObjectType;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderDispatchResult {
    Success,
    CompilationFailed,
    NoData,
    /// Nothing was dispatched, e.g. because the last compile failed.
    Skipped,
}

/// How an object reaches the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderType {
    None,
    NanoVdb,
    Raster2D,
}

impl From<ObjectType> for RenderType {
    fn from(ty: ObjectType) -> Self {
        match ty {
            ObjectType::NanoVdb | ObjectType::Array => Self::NanoVdb,
            ObjectType::GaussianData => Self::Raster2D,
            ObjectType::Camera => Self::None,
        }
    }
}

/// Change requests for the viewport shader, shared between the GUI side and the render thread.
pub struct ShaderRequests {
    update_shader: AtomicBool,
    editor_shader: Mutex<Option<String>>,
    settings: Mutex<CompilerSettings>,
}

impl ShaderRequests {
    /// Starts with an update pending so the first frame compiles.
    pub fn new(settings: CompilerSettings) -> Self {
        Self {
            update_shader: AtomicBool::new(true),
            editor_shader: Mutex::new(None),
            settings: Mutex::new(settings),
        }
    }

    /// A shader source or the compile request changed.
    pub fn request_update(&self) {
        self.update_shader.store(true, Ordering::Release);
    }

    pub fn is_update_pending(&self) -> bool {
        self.update_shader.load(Ordering::Acquire)
    }

    /// Shader picked in the code editor; bound to the selected object on the next compile.
    pub fn set_editor_shader(&self, shader_name: impl Into<String>) {
        *self.editor_shader.lock().unwrap_or_else(|e| e.into_inner()) = Some(shader_name.into());
        self.request_update();
    }

    pub fn settings(&self) -> MutexGuard<'_, CompilerSettings> {
        self.settings.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_settings(&self, settings: CompilerSettings) {
        *self.settings() = settings;
        self.request_update();
    }
}

/// Scene hooks used by the shader-compile loop and the dispatch.
pub trait RenderScene {
    /// Binds `shader_name` to the selected object.
    fn set_selected_shader(&mut self, shader_name: &str);

    /// Reloads the parameter schema of `shader_name` and pushes it into every view bound to it.
    fn reload_shader_params(&mut self, shader_name: &str);

    /// Writes the parameters of the current view into `dst`. Returns the bytes written.
    fn current_shader_params(&mut self, shader_name: &str, dst: &mut [u8]) -> usize;
}

/// Reads the 2D raster parameters out of an object's parameter block, by field name.
pub fn raster_shader_params(block: Option<&ParamBlock>) -> RasterShaderParams {
    let mut params = RasterShaderParams::default();
    if let Some(block) = block {
        if let Some(v) = block.get::<f32>("near_plane_override") {
            params.near_plane_override = v;
        }
        if let Some(v) = block.get::<f32>("far_plane_override") {
            params.far_plane_override = v;
        }
        if let Some(v) = block.get::<f32>("eps2d") {
            params.eps2d = v;
        }
        if let Some(v) = block.get::<i32>("sh_degree_override") {
            params.sh_degree_override = v;
        }
    }
    params
}

/// Issues the GPU work for the object currently on screen.
pub struct Renderer {
    compute: Arc<dyn Compute>,
    compiler: Arc<dyn ShaderCompiler>,
    raster: Arc<dyn Raster>,
    requests: Arc<ShaderRequests>,

    shader_context: Option<ShaderContext>,
    nanovdb_buffer: Option<DeviceBuffer>,
    editor_params: EditorParams,
    shader_params_upload: Vec<u8>,

    dispatch_shader: bool,
    active_shader: Option<String>,
    failed_shader: Option<String>,
}

impl Renderer {
    pub fn new(
        compute: Arc<dyn Compute>,
        compiler: Arc<dyn ShaderCompiler>,
        raster: Arc<dyn Raster>,
        requests: Arc<ShaderRequests>,
    ) -> Self {
        let upload_size = compute.constant_buffer_max_size();
        Self {
            compute,
            compiler,
            raster,
            requests,
            shader_context: None,
            nanovdb_buffer: None,
            editor_params: EditorParams::new(Mat4::IDENTITY, Mat4::IDENTITY, 0, 0),
            shader_params_upload: vec![0; upload_size],
            dispatch_shader: true,
            active_shader: None,
            failed_shader: None,
        }
    }

    pub fn requests(&self) -> &Arc<ShaderRequests> {
        &self.requests
    }

    /// Name of the shader whose last compile failed, for the GUI banner.
    pub fn failed_shader(&self) -> Option<&str> {
        self.failed_shader.as_deref()
    }

    /// Shader of the last compile attempt, successful or not.
    pub fn active_shader(&self) -> Option<&str> {
        self.active_shader.as_deref()
    }

    pub fn is_dispatch_enabled(&self) -> bool {
        self.dispatch_shader
    }

    /// Camera block of the last dispatch.
    pub fn editor_params(&self) -> &EditorParams {
        &self.editor_params
    }

    fn compile(&mut self, shader_name: &str, scene: &mut dyn RenderScene) -> ShaderDispatchResult {
        let requests = self.requests.clone();
        let settings = requests.settings();
        requests.update_shader.store(false, Ordering::Release);

        let editor_shader = requests
            .editor_shader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(editor_shader) = &editor_shader {
            scene.set_selected_shader(editor_shader);
        }
        let shader_name = editor_shader.as_deref().unwrap_or(shader_name);
        self.active_shader = Some(shader_name.to_string());

        self.shader_context = None;
        let mut context = self.compute.create_shader_context(shader_name);
        if let Err(e) = self.compute.init_shader(&mut context, self.compiler.as_ref(), &settings) {
            error!("Shader '{shader_name}' failed to compile: {e}");
            self.dispatch_shader = false;
            self.failed_shader = Some(shader_name.to_string());
            return ShaderDispatchResult::CompilationFailed;
        }
        drop(settings);

        info!("Shader '{shader_name}' ready");
        self.shader_context = Some(context);
        scene.reload_shader_params(shader_name);
        self.dispatch_shader = true;
        self.failed_shader = None;
        ShaderDispatchResult::Success
    }

    /// Renders a volume with the viewport shader, recompiling first when a change is pending.
    ///
    /// A failed compile disables dispatch until the next change request.
    pub fn dispatch_nanovdb_shader(
        &mut self,
        nanovdb: &ComputeArray,
        shader_name: &str,
        background: &mut Texture,
        view: &Mat4,
        projection: &Mat4,
        scene: &mut dyn RenderScene,
    ) -> ShaderDispatchResult {
        if nanovdb.len_bytes() == 0 || shader_name.is_empty() {
            return ShaderDispatchResult::NoData;
        }

        if self.requests.is_update_pending() {
            if let ShaderDispatchResult::CompilationFailed = self.compile(shader_name, scene) {
                return ShaderDispatchResult::CompilationFailed;
            }
        }
        if !self.dispatch_shader {
            return ShaderDispatchResult::Skipped;
        }
        let shader_name = self.active_shader.clone().unwrap_or_else(|| shader_name.to_string());

        let (width, height) = (background.width(), background.height());
        self.editor_params = EditorParams::new(*view, *projection, width, height);

        self.shader_params_upload.fill(0);
        let written = scene.current_shader_params(&shader_name, &mut self.shader_params_upload);
        if written > self.shader_params_upload.len() {
            warn!("Shader params for '{shader_name}' exceed the constant buffer size");
        }

        if self.render_nanovdb(nanovdb, background) {
            ShaderDispatchResult::Success
        } else {
            ShaderDispatchResult::Skipped
        }
    }

    fn render_nanovdb(&mut self, nanovdb: &ComputeArray, background: &mut Texture) -> bool {
        let Some(context) = self.shader_context.as_ref() else {
            return false;
        };

        let cached = self
            .nanovdb_buffer
            .as_ref()
            .is_some_and(|b| b.source_id() == nanovdb.id());
        if !cached {
            self.nanovdb_buffer = None;
            match self.compute.upload_nanovdb(nanovdb) {
                Ok(buffer) => self.nanovdb_buffer = Some(buffer),
                Err(e) => {
                    error!("Volume upload failed: {e}");
                    return false;
                }
            }
        }
        let Some(buffer) = self.nanovdb_buffer.as_ref() else {
            return false;
        };

        let params = DispatchParams {
            editor_params: &self.editor_params,
            shader_params: &self.shader_params_upload,
            width: background.width(),
            height: background.height(),
        };
        match self
            .compute
            .dispatch_shader_on_nanovdb_array(context, buffer, &params, background)
        {
            Ok(()) => true,
            Err(e) => {
                error!("Dispatch of '{}' failed: {e}", context.shader_name());
                false
            }
        }
    }

    pub fn render_gaussian(
        &self,
        data: &GaussianData,
        background: &mut Texture,
        view: &Mat4,
        projection: &Mat4,
        params: &RasterShaderParams,
    ) -> bool {
        match self.raster.raster_gaussian_2d(data, background, view, projection, params) {
            Ok(()) => true,
            Err(e) => {
                error!("Gaussian raster failed: {e}");
                false
            }
        }
    }

    /// Releases the shader context and the cached volume.
    pub fn cleanup(&mut self) {
        self.compute.wait_idle();
        self.shader_context = None;
        self.nanovdb_buffer = None;
        debug!("Renderer resources released");
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compute::cpu::{CpuCompiler, CpuCompute, CpuRaster, DEFAULT_EDITOR_SHADER, VoxelGrid, volume_kernel};
    use compute::{ComputeArray, GaussianDataDesc, TextureFormat};
    use glam::{IVec3, Vec3};
    use params::ReflectType;
    use std::path::Path;

    const GOOD_SHADER: &str = "struct shader_params { float density; };\nvoid main() { }\n";

    #[derive(Default)]
    struct RecordingScene {
        selected: Vec<String>,
        reloads: usize,
    }

    impl RenderScene for RecordingScene {
        fn set_selected_shader(&mut self, shader_name: &str) {
            self.selected.push(shader_name.to_string());
        }

        fn reload_shader_params(&mut self, _shader_name: &str) {
            self.reloads += 1;
        }

        fn current_shader_params(&mut self, _shader_name: &str, dst: &mut [u8]) -> usize {
            dst[..4].copy_from_slice(&1.0f32.to_le_bytes());
            4
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        shader_path: std::path::PathBuf,
        compute: Arc<CpuCompute>,
        compiler: Arc<CpuCompiler>,
        renderer: Renderer,
    }

    impl Fixture {
        fn new(source: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let settings = CompilerSettings {
                shader_dir: dir.path().join("shaders"),
                cache_dir: dir.path().join("cache"),
                ..Default::default()
            };
            let shader_path = settings.shader_dir.join(DEFAULT_EDITOR_SHADER);
            write(&shader_path, source);

            let compute = Arc::new(CpuCompute::new());
            let compiler = Arc::new(CpuCompiler::new());
            let renderer = Renderer::new(
                compute.clone(),
                compiler.clone(),
                Arc::new(CpuRaster::new()),
                Arc::new(ShaderRequests::new(settings)),
            );
            Self {
                _dir: dir,
                shader_path,
                compute,
                compiler,
                renderer,
            }
        }

        fn frame(&mut self, array: &ComputeArray, scene: &mut RecordingScene) -> (ShaderDispatchResult, Texture) {
            let mut target = Texture::new(TextureFormat::Rgba8Unorm, 64, 64);
            let (view, projection) = camera();
            let result = self.renderer.dispatch_nanovdb_shader(
                array,
                DEFAULT_EDITOR_SHADER,
                &mut target,
                &view,
                &projection,
                scene,
            );
            (result, target)
        }
    }

    fn write(path: &Path, source: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, source).unwrap();
    }

    fn camera() -> (Mat4, Mat4) {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, -2.0), Vec3::ZERO, Vec3::Y);
        let projection = Mat4::perspective_rh(45f32.to_radians(), 1.0, 0.1, 100.0);
        (view, projection)
    }

    fn voxel_array(value: f32) -> ComputeArray {
        let mut grid = VoxelGrid::new(1.0);
        if value > 0.0 {
            grid.set(IVec3::ZERO, value);
        }
        grid.to_array()
    }

    #[test]
    fn compile_failure_latches_until_change() {
        let mut fx = Fixture::new("void main() {\n");
        let mut scene = RecordingScene::default();
        let array = voxel_array(1.0);

        assert_eq!(fx.frame(&array, &mut scene).0, ShaderDispatchResult::CompilationFailed);
        for _ in 0..9 {
            assert_eq!(fx.frame(&array, &mut scene).0, ShaderDispatchResult::Skipped);
        }
        assert_eq!(fx.compiler.attempts(), 1);
        assert_eq!(fx.renderer.failed_shader(), Some(DEFAULT_EDITOR_SHADER));
        assert_eq!(fx.compute.dispatch_count(), 0);

        write(&fx.shader_path, GOOD_SHADER);
        fx.renderer.requests().request_update();
        let (result, target) = fx.frame(&array, &mut scene);
        assert_eq!(result, ShaderDispatchResult::Success);
        assert_eq!(fx.compiler.attempts(), 2);
        assert_eq!(fx.renderer.failed_shader(), None);
        assert_eq!(scene.reloads, 1);
        assert!(target.pixel(32, 32)[0] > 230);
    }

    #[test]
    fn editor_shader_is_published_on_compile() {
        let mut fx = Fixture::new(GOOD_SHADER);
        let mut scene = RecordingScene::default();
        write(&fx.shader_path.with_file_name("custom.slang"), GOOD_SHADER);
        fx.compute.register_kernel("editor/custom.slang", Arc::new(volume_kernel));
        fx.renderer.requests().set_editor_shader("editor/custom.slang");
        assert_eq!(fx.frame(&voxel_array(1.0), &mut scene).0, ShaderDispatchResult::Success);
        assert_eq!(scene.selected, ["editor/custom.slang"]);
        assert_eq!(fx.renderer.active_shader(), Some("editor/custom.slang"));

        // No change, no recompile.
        assert_eq!(fx.frame(&voxel_array(1.0), &mut scene).0, ShaderDispatchResult::Success);
        assert_eq!(fx.compiler.attempts(), 1);
        assert_eq!(fx.renderer.editor_params().width, 64);
    }

    #[test]
    fn volume_cache_follows_input_array() {
        let mut fx = Fixture::new(GOOD_SHADER);
        let mut scene = RecordingScene::default();
        let filled = voxel_array(1.0);
        let empty = voxel_array(0.0);

        let (_, target) = fx.frame(&filled, &mut scene);
        assert!(target.pixel(32, 32)[0] > 230);
        let (_, target) = fx.frame(&filled, &mut scene);
        assert!(target.pixel(32, 32)[0] > 230);
        // shader context + cached volume
        assert_eq!(fx.compute.live_resources(), 2);

        let (result, target) = fx.frame(&empty, &mut scene);
        assert_eq!(result, ShaderDispatchResult::Success);
        assert_eq!(target.pixel(32, 32)[0], 0);
        assert_eq!(fx.compute.live_resources(), 2);

        fx.renderer.cleanup();
        assert_eq!(fx.compute.live_resources(), 0);
        assert_eq!(fx.compute.dispatch_count(), 3);
    }

    #[test]
    fn empty_input_is_no_data() {
        let mut fx = Fixture::new(GOOD_SHADER);
        let mut scene = RecordingScene::default();
        let (result, target) = fx.frame(&ComputeArray::new(1, 0), &mut scene);
        assert_eq!(result, ShaderDispatchResult::NoData);
        assert!(target.as_bytes().iter().all(|b| *b == 0));
        assert_eq!(fx.compiler.attempts(), 0);
    }

    #[test]
    fn gaussian_renders_over_background() {
        let fx = Fixture::new(GOOD_SHADER);
        let data = GaussianData::from_desc(GaussianDataDesc {
            means: Some(ComputeArray::from_slice(&[0.0f32, 0.0, 0.0])),
            opacities: Some(ComputeArray::from_slice(&[4.0f32])),
            scales: Some(ComputeArray::from_slice(&[(0.1f32).ln(); 3])),
            ..Default::default()
        })
        .unwrap();
        let mut target = Texture::new(TextureFormat::Rgba8Unorm, 64, 64);
        let (view, projection) = camera();
        assert!(fx.renderer.render_gaussian(
            &data,
            &mut target,
            &view,
            &projection,
            &RasterShaderParams::default()
        ));
        assert!(target.pixel(32, 32)[0] > 0);
        assert_eq!(target.pixel(0, 0)[0], 0);
    }

    #[test]
    fn render_type_by_object() {
        assert_eq!(RenderType::from(ObjectType::NanoVdb), RenderType::NanoVdb);
        assert_eq!(RenderType::from(ObjectType::Array), RenderType::NanoVdb);
        assert_eq!(RenderType::from(ObjectType::GaussianData), RenderType::Raster2D);
        assert_eq!(RenderType::from(ObjectType::Camera), RenderType::None);
    }

    #[test]
    fn raster_params_read_by_name() {
        assert_eq!(raster_shader_params(None), RasterShaderParams::default());
        let block = ParamBlock::new(
            ReflectType::new("client")
                .with_f32("eps2d", 0.5)
                .with_i32("sh_degree_override", 1),
        );
        let params = raster_shader_params(Some(&block));
        assert_eq!(params.eps2d, 0.5);
        assert_eq!(params.sh_degree_override, 1);
        assert_eq!(params.far_plane_override, 0.0);
    }
}
