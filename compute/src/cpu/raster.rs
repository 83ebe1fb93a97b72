use glam::{IVec3, Mat4, Quat, Vec3};
use tracing::debug;

use super::grid::VoxelGrid;
use crate::{ComputeArray, ComputeError, GaussianData, Raster, RasterShaderParams, Result, Texture, TextureFormat};

const SH_C0: f32 = 0.282_094_8;
// Voxel half-extent cap per gaussian when splatting into a volume.
const MAX_SPLAT_RADIUS: i32 = 32;
const MIN_WEIGHT: f32 = 1e-3;

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

struct Splat {
    mean: Vec3,
    rotation: Quat,
    sigma: Vec3,
    opacity: f32,
    color: Vec3,
}

fn splats(data: &GaussianData) -> Vec<Splat> {
    let means = data.means.read::<f32>();
    let opacities = data.opacities.as_ref().map(|a| a.read::<f32>());
    let quats = data.quaternions.as_ref().map(|a| a.read::<f32>());
    let scales = data.scales.as_ref().map(|a| a.read::<f32>());
    let sh_0 = data.sh_0.as_ref().map(|a| a.read::<f32>());

    (0..data.count())
        .map(|i| {
            let mean = Vec3::from_slice(&means[i * 3..i * 3 + 3]);
            let rotation = quats
                .as_ref()
                .map(|q| Quat::from_xyzw(q[i * 4 + 1], q[i * 4 + 2], q[i * 4 + 3], q[i * 4]).normalize())
                .filter(|q| q.is_finite())
                .unwrap_or(Quat::IDENTITY);
            let sigma = scales
                .as_ref()
                .map(|s| Vec3::new(s[i * 3].exp(), s[i * 3 + 1].exp(), s[i * 3 + 2].exp()))
                .unwrap_or(Vec3::splat(0.01))
                .max(Vec3::splat(1e-6));
            let opacity = opacities.as_ref().map(|o| sigmoid(o[i])).unwrap_or(1.0);
            let color = sh_0
                .as_ref()
                .map(|c| Vec3::splat(0.5) + Vec3::from_slice(&c[i * 3..i * 3 + 3]) * SH_C0)
                .unwrap_or(Vec3::splat(0.5))
                .clamp(Vec3::ZERO, Vec3::ONE);
            Splat {
                mean,
                rotation,
                sigma,
                opacity,
                color,
            }
        })
        .collect()
}

/// Gaussian splatting on the CPU, both into volumes and into images.
#[derive(Debug, Default)]
pub struct CpuRaster;

impl CpuRaster {
    pub fn new() -> Self {
        Self
    }
}

impl Raster for CpuRaster {
    fn raster_to_nanovdb(
        &self,
        data: &GaussianData,
        voxel_size: f32,
        progress: &dyn Fn(&str, f32),
    ) -> Result<ComputeArray> {
        if voxel_size.is_nan() || voxel_size <= 0.0 {
            return Err(ComputeError::InvalidGaussianData(format!(
                "voxel size must be positive, got {voxel_size}"
            )));
        }

        let splats = splats(data);
        let mut grid = VoxelGrid::new(voxel_size);
        for (n, splat) in splats.iter().enumerate() {
            if n % 64 == 0 {
                progress("Rasterizing gaussians", n as f32 / splats.len() as f32);
            }
            let extent = 3.0 * splat.sigma.max_element();
            let radius = ((extent / voxel_size).ceil() as i32).clamp(0, MAX_SPLAT_RADIUS);
            let center = (splat.mean / voxel_size).round().as_ivec3();
            let inv_rotation = splat.rotation.inverse();

            for k in -radius..=radius {
                for j in -radius..=radius {
                    for i in -radius..=radius {
                        let ijk = center + IVec3::new(i, j, k);
                        let local = inv_rotation * (ijk.as_vec3() * voxel_size - splat.mean);
                        let q = local / splat.sigma;
                        let weight = splat.opacity * (-0.5 * q.length_squared()).exp();
                        if weight > MIN_WEIGHT {
                            grid.add(ijk, weight);
                        }
                    }
                }
            }
        }
        progress("Rasterizing gaussians", 1.0);
        debug!("Rasterized {} gaussians into {} voxels", splats.len(), grid.len());
        Ok(grid.to_array())
    }

    fn raster_gaussian_2d(
        &self,
        data: &GaussianData,
        background: &mut Texture,
        view: &Mat4,
        projection: &Mat4,
        params: &RasterShaderParams,
    ) -> Result<()> {
        if background.format() != TextureFormat::Rgba8Unorm {
            return Err(ComputeError::InvalidGaussianData(
                "2D raster targets must be RGBA8".to_string(),
            ));
        }
        let (width, height) = (background.width() as f32, background.height() as f32);
        let near = if params.near_plane_override > 0.0 {
            params.near_plane_override
        } else {
            0.01
        };
        let far = if params.far_plane_override > 0.0 {
            params.far_plane_override
        } else {
            f32::INFINITY
        };
        let orthographic = projection.w_axis.w == 1.0;
        let focal = projection.x_axis.x * width * 0.5;

        let splats = splats(data);
        let mut projected: Vec<(f32, f32, f32, f32, &Splat)> = Vec::new();
        for splat in &splats {
            let view_pos = *view * splat.mean.extend(1.0);
            let depth = -view_pos.z;
            if depth < near || depth > far {
                continue;
            }
            let clip = *projection * view_pos;
            let ndc = clip.truncate() / clip.w;
            let px = (ndc.x * 0.5 + 0.5) * width;
            let py = (0.5 - ndc.y * 0.5) * height;
            let radius = if orthographic {
                splat.sigma.max_element() * focal
            } else {
                splat.sigma.max_element() * focal / depth
            };
            let variance = radius * radius + params.eps2d;
            projected.push((depth, px, py, variance, splat));
        }
        // back to front
        projected.sort_by(|a, b| b.0.total_cmp(&a.0));

        for (_, px, py, variance, splat) in projected {
            let reach = 3.0 * variance.sqrt();
            let x0 = (px - reach).floor().max(0.0) as u32;
            let y0 = (py - reach).floor().max(0.0) as u32;
            let x1 = ((px + reach).ceil().min(width - 1.0)).max(0.0) as u32;
            let y1 = ((py + reach).ceil().min(height - 1.0)).max(0.0) as u32;
            for y in y0..=y1 {
                for x in x0..=x1 {
                    let dx = x as f32 + 0.5 - px;
                    let dy = y as f32 + 0.5 - py;
                    let alpha = (splat.opacity * (-0.5 * (dx * dx + dy * dy) / variance).exp()).min(0.99);
                    if alpha < 1.0 / 255.0 {
                        continue;
                    }
                    let pixel = background.pixel_mut(x, y);
                    for c in 0..3 {
                        let dst = pixel[c] as f32 / 255.0;
                        let out = dst * (1.0 - alpha) + splat.color[c] * alpha;
                        pixel[c] = (out * 255.0).round().clamp(0.0, 255.0) as u8;
                    }
                    pixel[3] = 255;
                }
            }
        }
        Ok(())
    }
}
