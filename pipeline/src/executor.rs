use compute::{GaussianData, GaussianDataDesc};
use tracing::{debug, error, info};

use crate::{ExecutionContext, PipelineConfig, PipelineOutput, PipelineStatus, Raster3DParams};
use scene::Payload;

/// What a pipeline kind does when it runs.
pub trait PipelineExecutor: Send + Sync {
    fn execute(&self, config: &mut PipelineConfig, ctx: &mut ExecutionContext<'_>) -> PipelineStatus;

    fn can_execute(&self, config: &PipelineConfig, ctx: &ExecutionContext<'_>) -> bool;
}

/// Pass-through: the output is the input handle.
pub struct NullExecutor;

impl PipelineExecutor for NullExecutor {
    fn execute(&self, _config: &mut PipelineConfig, ctx: &mut ExecutionContext<'_>) -> PipelineStatus {
        ctx.output = ctx.input.clone().map(PipelineOutput::Passthrough);
        PipelineStatus::Completed
    }

    fn can_execute(&self, _config: &PipelineConfig, _ctx: &ExecutionContext<'_>) -> bool {
        true
    }
}

/// Drawing happens in the renderer each frame; the pipeline only tracks that the object has
/// something renderable.
pub struct RenderExecutor;

impl PipelineExecutor for RenderExecutor {
    fn execute(&self, _config: &mut PipelineConfig, _ctx: &mut ExecutionContext<'_>) -> PipelineStatus {
        PipelineStatus::Completed
    }

    fn can_execute(&self, config: &PipelineConfig, ctx: &ExecutionContext<'_>) -> bool {
        let renderable = matches!(
            ctx.input,
            Some(Payload::NanoVdb(_) | Payload::Array(_) | Payload::GaussianData(_))
        );
        renderable || !config.input_components.is_empty()
    }
}

const GAUSSIAN_ARRAYS: [&str; 6] = ["means", "opacities", "quaternions", "scales", "sh_0", "sh_n"];

/// Rasterizes gaussian data into a volume.
pub struct Raster3DExecutor;

impl Raster3DExecutor {
    fn voxel_size(config: &PipelineConfig) -> f32 {
        let default = Raster3DParams::default().voxel_size;
        config
            .params
            .as_ref()
            .and_then(|p| p.get::<f32>("voxel_size"))
            .filter(|v| *v > 0.0)
            .unwrap_or(default)
    }

    /// Gaussians to rasterize: the object's payload when it is gaussian data, else a set
    /// rebuilt from the named arrays.
    fn gaussians(config: &PipelineConfig, ctx: &ExecutionContext<'_>) -> compute::Result<std::sync::Arc<GaussianData>> {
        if let Some(data) = ctx.input_gaussian() {
            return Ok(data.clone());
        }
        let array = |name: &str| ctx.resolve_array(config, name).map(|a| a.duplicate());
        let desc = GaussianDataDesc {
            means: array(GAUSSIAN_ARRAYS[0]),
            opacities: array(GAUSSIAN_ARRAYS[1]),
            quaternions: array(GAUSSIAN_ARRAYS[2]),
            scales: array(GAUSSIAN_ARRAYS[3]),
            sh_0: array(GAUSSIAN_ARRAYS[4]),
            sh_n: array(GAUSSIAN_ARRAYS[5]),
        };
        let data = match ctx.raster {
            Some(raster) => raster.create_gaussian_data(desc)?,
            None => GaussianData::from_desc(desc)?,
        };
        Ok(std::sync::Arc::new(data))
    }
}

impl PipelineExecutor for Raster3DExecutor {
    fn execute(&self, config: &mut PipelineConfig, ctx: &mut ExecutionContext<'_>) -> PipelineStatus {
        let Some(raster) = ctx.raster else {
            error!("Raster3D: no rasterizer available");
            return PipelineStatus::Failed;
        };
        let data = match Self::gaussians(config, ctx) {
            Ok(data) => data,
            Err(e) => {
                error!("Raster3D: {e}");
                return PipelineStatus::Failed;
            }
        };
        for name in GAUSSIAN_ARRAYS {
            debug!("Raster3D: {name} {}", if data.array(name).is_some() { "found" } else { "missing" });
        }

        let voxel_size = Self::voxel_size(config);
        info!("Raster3D: rasterizing {} gaussians at voxel size {voxel_size}", data.count());
        match raster.raster_to_nanovdb(&data, voxel_size, &|_, _| {}) {
            Ok(array) => {
                info!("Raster3D: produced {} byte volume", array.len_bytes());
                ctx.output = Some(PipelineOutput::Produced(Payload::NanoVdb(std::sync::Arc::new(array))));
                PipelineStatus::Completed
            }
            Err(e) => {
                error!("Raster3D: rasterization failed: {e}");
                PipelineStatus::Failed
            }
        }
    }

    fn can_execute(&self, config: &PipelineConfig, ctx: &ExecutionContext<'_>) -> bool {
        ctx.raster.is_some() && (ctx.input_gaussian().is_some() || ctx.resolve_array(config, "means").is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PipelineType;
    use compute::ComputeArray;
    use compute::cpu::{CpuRaster, VoxelGrid};
    use params::ParamBlock;
    use scene::NamedComponent;
    use std::sync::Arc;
    use token::TokenTable;

    fn single_gaussian() -> GaussianDataDesc {
        GaussianDataDesc {
            means: Some(ComputeArray::from_slice(&[0.0f32, 0.0, 0.0])),
            opacities: Some(ComputeArray::from_slice(&[4.0f32])),
            quaternions: Some(ComputeArray::from_slice(&[1.0f32, 0.0, 0.0, 0.0])),
            scales: Some(ComputeArray::from_slice(&[(0.03f32).ln(); 3])),
            ..Default::default()
        }
    }

    #[test]
    fn null_aliases_input() {
        let tokens = TokenTable::new();
        let array = Arc::new(ComputeArray::new(1, 8));
        let mut ctx = ExecutionContext::new(&tokens);
        ctx.input = Some(Payload::NanoVdb(array.clone()));
        let mut config = PipelineConfig::new(PipelineType::Null);
        assert_eq!(NullExecutor.execute(&mut config, &mut ctx), PipelineStatus::Completed);
        let output = ctx.output.unwrap();
        assert!(output.is_passthrough());
        assert!(Arc::ptr_eq(output.payload().as_nanovdb().unwrap(), &array));
    }

    #[test]
    fn render_needs_renderable_input() {
        let tokens = TokenTable::new();
        let config = PipelineConfig::new(PipelineType::Render);
        let mut ctx = ExecutionContext::new(&tokens);
        assert!(!RenderExecutor.can_execute(&config, &ctx));
        ctx.input = Some(Payload::Array(Arc::new(ComputeArray::new(4, 1))));
        assert!(RenderExecutor.can_execute(&config, &ctx));
    }

    #[test]
    fn raster3d_builds_from_named_arrays() {
        let tokens = TokenTable::new();
        let raster = CpuRaster::default();
        let mut ctx = ExecutionContext::new(&tokens).with_raster(&raster);
        let mut config = PipelineConfig::new(PipelineType::Raster3D);
        config.params = Some(ParamBlock::new(Raster3DParams::descriptor()));
        assert!(!Raster3DExecutor.can_execute(&config, &ctx));

        let desc = single_gaussian();
        for (name, array) in [
            ("means", desc.means),
            ("opacities", desc.opacities),
            ("quaternions", desc.quaternions),
            ("scales", desc.scales),
        ] {
            let token = tokens.get_or_create(name);
            let array = Arc::new(array.unwrap());
            ctx.named_arrays.insert(token.id(), NamedComponent { name: token, array });
        }
        assert!(Raster3DExecutor.can_execute(&config, &ctx));
        assert_eq!(Raster3DExecutor.execute(&mut config, &mut ctx), PipelineStatus::Completed);

        let output = ctx.output.unwrap();
        let array = output.payload().as_nanovdb().unwrap();
        let grid = VoxelGrid::from_bytes(array.as_bytes()).unwrap();
        assert!(!grid.is_empty());
        assert!(grid.get(glam::IVec3::ZERO) > 0.0);
    }

    #[test]
    fn raster3d_fails_on_malformed_means() {
        let tokens = TokenTable::new();
        let raster = CpuRaster::default();
        let mut ctx = ExecutionContext::new(&tokens).with_raster(&raster);
        let desc = GaussianDataDesc {
            means: Some(ComputeArray::from_slice(&[0.0f32, 0.0])),
            ..Default::default()
        };
        let token = tokens.get_or_create("means");
        ctx.named_arrays.insert(
            token.id(),
            NamedComponent {
                name: token,
                array: Arc::new(desc.means.unwrap()),
            },
        );
        let mut config = PipelineConfig::new(PipelineType::Raster3D);
        // Two floats cannot form a gaussian position.
        assert_eq!(Raster3DExecutor.execute(&mut config, &mut ctx), PipelineStatus::Failed);
        assert!(ctx.output.is_none());
    }
}
