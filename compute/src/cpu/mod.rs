//! Reference implementations of the device interfaces that run entirely on the CPU.
//!
//! The volume payload here is a sparse voxel list rather than a real NanoVDB tree, which keeps
//! every rendering path testable without a GPU.

mod compiler;
mod compute;
mod grid;
mod loader;
mod raster;

pub use compiler::{CpuCompiler, SHADER_PARAMS_STRUCT};
pub use compute::{CpuCompute, CpuKernel, DEFAULT_EDITOR_SHADER, KernelInput, volume_kernel};
pub use grid::{NANOVDB_MAGIC_PREFIX, VOXEL_GRID_MAGIC, VoxelGrid, has_volume_magic};
pub use loader::CpuFileLoader;
pub use raster::CpuRaster;
