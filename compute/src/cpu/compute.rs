use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use glam::{Vec3, Vec4};
use tracing::debug;

use super::grid::VoxelGrid;
use crate::{
    Compute, ComputeArray, ComputeError, CompilerSettings, DeviceBuffer, DispatchParams,
    EditorParams, ResourceGuard, Result, ShaderCompiler, ShaderContext, Texture, TextureFormat,
};

pub const DEFAULT_EDITOR_SHADER: &str = "editor/editor.slang";

const DENSITY_SCALE: f32 = 4.0;

pub struct KernelInput<'a> {
    pub nanovdb: &'a [u8],
    pub params: &'a EditorParams,
    pub shader_params: &'a [u8],
}

pub type CpuKernel = Arc<dyn Fn(&KernelInput<'_>, &mut Texture) -> Result<()> + Send + Sync>;

/// Emission-absorption ray march over a [`VoxelGrid`]. Accumulated opacity goes into red,
/// composited over whatever the target already holds.
pub fn volume_kernel(input: &KernelInput<'_>, target: &mut Texture) -> Result<()> {
    let grid = VoxelGrid::from_bytes(input.nanovdb)?;
    let view_inv = input.params.view_inv_matrix();
    let proj_inv = input.params.projection_inv_matrix();
    let (width, height) = (target.width(), target.height());
    if target.format() != TextureFormat::Rgba8Unorm {
        return Err(ComputeError::InvalidGrid(
            "volume kernel writes RGBA8 targets only".to_string(),
        ));
    }

    let projection = input.params.projection_matrix();
    let orthographic = projection.w_axis.w == 1.0;
    let eye = view_inv.w_axis.truncate();
    let unproject = |x: f32, y: f32, z: f32| {
        let view = proj_inv * Vec4::new(x, y, z, 1.0);
        (view_inv * (view / view.w)).truncate()
    };

    for y in 0..height {
        for x in 0..width {
            let ndc_x = (x as f32 + 0.5) / width as f32 * 2.0 - 1.0;
            let ndc_y = 1.0 - (y as f32 + 0.5) / height as f32 * 2.0;
            let (origin, dir) = if orthographic {
                // the segment between the clip planes is integrated end to end
                let a = unproject(ndc_x, ndc_y, 0.0);
                let b = unproject(ndc_x, ndc_y, 1.0);
                (a, (b - a).normalize_or_zero())
            } else {
                // depth 0.5 stays finite for reverse and infinite projections
                (eye, (unproject(ndc_x, ndc_y, 0.5) - eye).normalize_or_zero())
            };
            if dir == Vec3::ZERO {
                continue;
            }

            let depth = grid.optical_depth(origin, dir);
            let alpha = 1.0 - (-DENSITY_SCALE * depth).exp();
            let pixel = target.pixel_mut(x, y);
            let blend = |dst: u8, src: f32| ((dst as f32 / 255.0) * (1.0 - alpha) + src * alpha) * 255.0;
            pixel[0] = blend(pixel[0], 1.0).round().clamp(0.0, 255.0) as u8;
            pixel[1] = blend(pixel[1], 0.0).round().clamp(0.0, 255.0) as u8;
            pixel[2] = blend(pixel[2], 0.0).round().clamp(0.0, 255.0) as u8;
            pixel[3] = 255;
        }
    }
    Ok(())
}

/// CPU stand-in for the compute device. Shaders are Rust closures looked up by shader name.
pub struct CpuCompute {
    kernels: RwLock<HashMap<String, CpuKernel>>,
    live: Arc<AtomicUsize>,
    dispatches: AtomicUsize,
}

impl Default for CpuCompute {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuCompute {
    pub fn new() -> Self {
        let compute = Self {
            kernels: RwLock::new(HashMap::new()),
            live: Arc::new(AtomicUsize::new(0)),
            dispatches: AtomicUsize::new(0),
        };
        compute.register_kernel(DEFAULT_EDITOR_SHADER, Arc::new(volume_kernel));
        compute
    }

    pub fn register_kernel(&self, shader_name: &str, kernel: CpuKernel) {
        self.kernels
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(shader_name.to_string(), kernel);
    }

    fn kernel(&self, shader_name: &str) -> Option<CpuKernel> {
        self.kernels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(shader_name)
            .cloned()
    }

    /// Number of successful dispatches so far.
    pub fn dispatch_count(&self) -> usize {
        self.dispatches.load(Ordering::Acquire)
    }
}

impl Compute for CpuCompute {
    fn create_shader_context(&self, shader_name: &str) -> ShaderContext {
        ShaderContext::new(shader_name).with_guard(ResourceGuard::new(&self.live))
    }

    fn init_shader(
        &self,
        ctx: &mut ShaderContext,
        compiler: &dyn ShaderCompiler,
        settings: &CompilerSettings,
    ) -> Result<()> {
        let compiled = compiler.compile(ctx.shader_name(), settings)?;
        if self.kernel(ctx.shader_name()).is_none() {
            return Err(ComputeError::KernelNotFound(ctx.shader_name().to_string()));
        }
        ctx.set_compiled(compiled);
        Ok(())
    }

    fn upload_nanovdb(&self, array: &ComputeArray) -> Result<DeviceBuffer> {
        debug!("Uploading volume array {} ({} bytes)", array.id(), array.len_bytes());
        Ok(DeviceBuffer::new(array, Some(ResourceGuard::new(&self.live))))
    }

    fn dispatch_shader_on_nanovdb_array(
        &self,
        ctx: &ShaderContext,
        nanovdb: &DeviceBuffer,
        params: &DispatchParams<'_>,
        target: &mut Texture,
    ) -> Result<()> {
        if ctx.compiled().is_none() {
            return Err(ComputeError::ShaderNotInitialized(ctx.shader_name().to_string()));
        }
        let kernel = self
            .kernel(ctx.shader_name())
            .ok_or_else(|| ComputeError::KernelNotFound(ctx.shader_name().to_string()))?;
        let input = KernelInput {
            nanovdb: nanovdb.as_bytes(),
            params: params.editor_params,
            shader_params: params.shader_params,
        };
        kernel(&input, target)?;
        self.dispatches.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn create_texture(&self, format: TextureFormat, width: u32, height: u32) -> Texture {
        Texture::tracked(format, width, height, &self.live)
    }

    fn live_resources(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}
