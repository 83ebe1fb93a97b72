use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use glam::{IVec3, Vec3};

use crate::{ComputeArray, ComputeError, Result};

pub const VOXEL_GRID_MAGIC: [u8; 8] = *b"VOXGRID1";
pub const NANOVDB_MAGIC_PREFIX: &[u8] = b"NanoVDB";

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct GridHeader {
    magic: [u8; 8],
    voxel_size: f32,
    count: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct VoxelRecord {
    ijk: [i32; 3],
    value: f32,
}

/// True when `bytes` starts with either the voxel-grid or a NanoVDB magic.
pub fn has_volume_magic(bytes: &[u8]) -> bool {
    bytes.starts_with(&VOXEL_GRID_MAGIC) || bytes.starts_with(NANOVDB_MAGIC_PREFIX)
}

/// Sparse float volume. Voxel `ijk` is centered at `ijk * voxel_size` in world space.
#[derive(Debug, Clone)]
pub struct VoxelGrid {
    voxel_size: f32,
    voxels: HashMap<IVec3, f32>,
}

impl VoxelGrid {
    pub fn new(voxel_size: f32) -> Self {
        Self {
            voxel_size,
            voxels: HashMap::new(),
        }
    }

    pub fn voxel_size(&self) -> f32 {
        self.voxel_size
    }

    pub fn len(&self) -> usize {
        self.voxels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voxels.is_empty()
    }

    pub fn set(&mut self, ijk: IVec3, value: f32) {
        self.voxels.insert(ijk, value);
    }

    pub fn add(&mut self, ijk: IVec3, value: f32) {
        *self.voxels.entry(ijk).or_insert(0.0) += value;
    }

    pub fn get(&self, ijk: IVec3) -> f32 {
        self.voxels.get(&ijk).copied().unwrap_or(0.0)
    }

    pub fn index_bbox(&self) -> Option<(IVec3, IVec3)> {
        let mut keys = self.voxels.keys();
        let first = *keys.next()?;
        Some(keys.fold((first, first), |(lo, hi), &k| (lo.min(k), hi.max(k))))
    }

    pub fn world_bbox(&self) -> Option<(Vec3, Vec3)> {
        let (lo, hi) = self.index_bbox()?;
        Some((
            (lo.as_vec3() - Vec3::splat(0.5)) * self.voxel_size,
            (hi.as_vec3() + Vec3::splat(0.5)) * self.voxel_size,
        ))
    }

    /// Integrates the voxel values along a ray with a normalized world-space direction.
    pub fn optical_depth(&self, origin: Vec3, dir: Vec3) -> f32 {
        let Some((lo, hi)) = self.index_bbox() else {
            return 0.0;
        };
        if self.voxel_size <= 0.0 {
            return 0.0;
        }

        // index space: voxel ijk covers [ijk, ijk + 1)
        let o = origin / self.voxel_size + Vec3::splat(0.5);
        let d = dir / self.voxel_size;
        let box_min = lo.as_vec3();
        let box_max = (hi + IVec3::ONE).as_vec3();

        let inv = d.recip();
        let ta = (box_min - o) * inv;
        let tb = (box_max - o) * inv;
        let t_enter = ta.min(tb).max_element().max(0.0);
        let t_exit = ta.max(tb).min_element();
        if t_enter >= t_exit {
            return 0.0;
        }

        let start = o + d * (t_enter + 1e-6);
        let mut cell = start.floor().as_ivec3().clamp(lo, hi);
        let step = IVec3::new(
            if d.x >= 0.0 { 1 } else { -1 },
            if d.y >= 0.0 { 1 } else { -1 },
            if d.z >= 0.0 { 1 } else { -1 },
        );
        let crossing = |axis: usize| {
            if d[axis] == 0.0 {
                f32::INFINITY
            } else {
                let edge = if step[axis] > 0 { cell[axis] + 1 } else { cell[axis] };
                (edge as f32 - o[axis]) * inv[axis]
            }
        };
        let mut t_next = Vec3::new(crossing(0), crossing(1), crossing(2));
        let t_delta = inv.abs();

        let max_steps = ((hi - lo).abs().element_sum() + 4) as usize;
        let mut t = t_enter;
        let mut depth = 0.0;
        for _ in 0..max_steps {
            if t >= t_exit {
                break;
            }
            let axis = if t_next.x <= t_next.y && t_next.x <= t_next.z {
                0
            } else if t_next.y <= t_next.z {
                1
            } else {
                2
            };
            let t_leave = t_next[axis].min(t_exit);
            depth += self.get(cell) * (t_leave - t);
            t = t_leave;
            cell[axis] += step[axis];
            t_next[axis] += t_delta[axis];
        }
        depth
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut records: Vec<VoxelRecord> = self
            .voxels
            .iter()
            .map(|(ijk, value)| VoxelRecord {
                ijk: ijk.to_array(),
                value: *value,
            })
            .collect();
        records.sort_by_key(|r| r.ijk);

        let header = GridHeader {
            magic: VOXEL_GRID_MAGIC,
            voxel_size: self.voxel_size,
            count: records.len() as u32,
        };
        let mut bytes = bytemuck::bytes_of(&header).to_vec();
        bytes.extend_from_slice(bytemuck::cast_slice(&records));
        bytes
    }

    pub fn to_array(&self) -> ComputeArray {
        let bytes = self.to_bytes();
        ComputeArray::from_bytes(1, bytes.len(), &bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header_len = size_of::<GridHeader>();
        if bytes.len() < header_len || !bytes.starts_with(&VOXEL_GRID_MAGIC) {
            return Err(ComputeError::InvalidGrid("missing voxel grid header".to_string()));
        }
        let header: GridHeader = bytemuck::pod_read_unaligned(&bytes[..header_len]);
        let record_len = size_of::<VoxelRecord>();
        let needed = header_len + header.count as usize * record_len;
        if bytes.len() < needed {
            return Err(ComputeError::InvalidGrid(format!(
                "{} voxels declared but only {} bytes present",
                header.count,
                bytes.len()
            )));
        }

        let mut grid = Self::new(header.voxel_size);
        for chunk in bytes[header_len..needed].chunks_exact(record_len) {
            let record: VoxelRecord = bytemuck::pod_read_unaligned(chunk);
            grid.set(IVec3::from_array(record.ijk), record.value);
        }
        Ok(grid)
    }
}
