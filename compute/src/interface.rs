use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use serde::{Deserialize, Serialize};

use crate::{ComputeArray, GaussianData, GaussianDataDesc, ResourceGuard, Result, Texture, TextureFormat};

/// Upper bound for a single constant buffer upload.
pub const CONSTANT_BUFFER_MAX_SIZE: usize = 65536;
pub const DEFAULT_ENTRY_POINT: &str = "main";

/// Location of the reflection document the compiler writes for `shader_name`.
pub fn reflection_path(cache_dir: &Path, shader_name: &str) -> PathBuf {
    cache_dir.join(format!("{shader_name}.json"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerSettings {
    pub shader_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub entry_point: String,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            shader_dir: PathBuf::from("shaders"),
            cache_dir: PathBuf::from("shaders/_cache"),
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledShader {
    pub shader_name: String,
    pub entry_point: String,
    pub reflection_path: PathBuf,
}

#[derive(Debug)]
pub struct ShaderContext {
    shader_name: String,
    compiled: Option<CompiledShader>,
    _guard: Option<ResourceGuard>,
}

impl ShaderContext {
    pub fn new(shader_name: impl Into<String>) -> Self {
        Self {
            shader_name: shader_name.into(),
            compiled: None,
            _guard: None,
        }
    }

    pub fn with_guard(mut self, guard: ResourceGuard) -> Self {
        self._guard = Some(guard);
        self
    }

    pub fn shader_name(&self) -> &str {
        &self.shader_name
    }

    pub fn compiled(&self) -> Option<&CompiledShader> {
        self.compiled.as_ref()
    }

    pub fn set_compiled(&mut self, compiled: CompiledShader) {
        self.compiled = Some(compiled);
    }
}

/// Device-side copy of an uploaded array. Remembers the id of the array it came from.
#[derive(Debug)]
pub struct DeviceBuffer {
    source_id: u64,
    bytes: Arc<[u8]>,
    _guard: Option<ResourceGuard>,
}

impl DeviceBuffer {
    pub fn new(array: &ComputeArray, guard: Option<ResourceGuard>) -> Self {
        Self {
            source_id: array.id(),
            bytes: Arc::from(array.as_bytes()),
            _guard: guard,
        }
    }

    pub fn source_id(&self) -> u64 {
        self.source_id
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Camera block consumed by the editor shaders. Matrices are stored transposed (row-major).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct EditorParams {
    pub view_inv: [[f32; 4]; 4],
    pub projection_inv: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub width: u32,
    pub height: u32,
    pub _pad: [u32; 2],
}

fn rows(m: Mat4) -> [[f32; 4]; 4] {
    m.transpose().to_cols_array_2d()
}

fn from_rows(r: &[[f32; 4]; 4]) -> Mat4 {
    Mat4::from_cols_array_2d(r).transpose()
}

impl EditorParams {
    pub fn new(view: Mat4, projection: Mat4, width: u32, height: u32) -> Self {
        Self {
            view_inv: rows(view.inverse()),
            projection_inv: rows(projection.inverse()),
            view: rows(view),
            projection: rows(projection),
            width,
            height,
            _pad: [0; 2],
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        from_rows(&self.view)
    }

    pub fn view_inv_matrix(&self) -> Mat4 {
        from_rows(&self.view_inv)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        from_rows(&self.projection)
    }

    pub fn projection_inv_matrix(&self) -> Mat4 {
        from_rows(&self.projection_inv)
    }
}

pub struct DispatchParams<'a> {
    pub editor_params: &'a EditorParams,
    pub shader_params: &'a [u8],
    pub width: u32,
    pub height: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct RasterShaderParams {
    pub near_plane_override: f32,
    pub far_plane_override: f32,
    pub eps2d: f32,
    pub sh_degree_override: i32,
}

impl Default for RasterShaderParams {
    fn default() -> Self {
        Self {
            near_plane_override: 0.0,
            far_plane_override: 0.0,
            eps2d: 0.3,
            sh_degree_override: -1,
        }
    }
}

/// Compute device the renderer dispatches volume shaders on.
pub trait Compute: Send + Sync {
    fn constant_buffer_max_size(&self) -> usize {
        CONSTANT_BUFFER_MAX_SIZE
    }

    fn create_shader_context(&self, shader_name: &str) -> ShaderContext {
        ShaderContext::new(shader_name)
    }

    /// Compiles the context's shader and binds the result to it.
    fn init_shader(
        &self,
        ctx: &mut ShaderContext,
        compiler: &dyn ShaderCompiler,
        settings: &CompilerSettings,
    ) -> Result<()>;

    fn upload_nanovdb(&self, array: &ComputeArray) -> Result<DeviceBuffer>;

    fn dispatch_shader_on_nanovdb_array(
        &self,
        ctx: &ShaderContext,
        nanovdb: &DeviceBuffer,
        params: &DispatchParams<'_>,
        target: &mut Texture,
    ) -> Result<()>;

    fn create_texture(&self, format: TextureFormat, width: u32, height: u32) -> Texture {
        Texture::new(format, width, height)
    }

    fn wait_idle(&self) {}

    /// Number of device objects currently alive.
    fn live_resources(&self) -> usize;
}

pub trait ShaderCompiler: Send + Sync {
    /// Compiles `shader_name` (relative to the shader directory) and writes its reflection
    /// document into the cache directory.
    fn compile(&self, shader_name: &str, settings: &CompilerSettings) -> Result<CompiledShader>;
}

pub trait Raster: Send + Sync {
    fn create_gaussian_data(&self, desc: GaussianDataDesc) -> Result<GaussianData> {
        GaussianData::from_desc(desc)
    }

    /// Splats `data` into a sparse volume with the given voxel size.
    fn raster_to_nanovdb(
        &self,
        data: &GaussianData,
        voxel_size: f32,
        progress: &dyn Fn(&str, f32),
    ) -> Result<ComputeArray>;

    /// Composites `data` over `background`.
    fn raster_gaussian_2d(
        &self,
        data: &GaussianData,
        background: &mut Texture,
        view: &Mat4,
        projection: &Mat4,
        params: &RasterShaderParams,
    ) -> Result<()>;
}

pub trait FileLoader: Send + Sync {
    fn load_nanovdb(&self, path: &Path) -> Result<ComputeArray>;

    fn load_gaussian(&self, path: &Path) -> Result<GaussianDataDesc>;

    fn save_nanovdb(&self, array: &ComputeArray, path: &Path) -> Result<()>;
}
