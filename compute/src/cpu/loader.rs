use std::fs;
use std::path::Path;

use tracing::info;

use super::grid::has_volume_magic;
use crate::{ComputeArray, ComputeError, FileLoader, GaussianDataDesc, Result};

/// Reads and writes volume payloads as raw bytes. Gaussian file parsing is left to richer
/// loaders.
#[derive(Debug, Default)]
pub struct CpuFileLoader;

impl CpuFileLoader {
    pub fn new() -> Self {
        Self
    }
}

impl FileLoader for CpuFileLoader {
    fn load_nanovdb(&self, path: &Path) -> Result<ComputeArray> {
        let bytes = fs::read(path)?;
        if !has_volume_magic(&bytes) {
            return Err(ComputeError::InvalidNanoVdb(path.to_path_buf()));
        }
        info!("Loaded volume '{}' ({} bytes)", path.display(), bytes.len());
        Ok(ComputeArray::from_bytes(1, bytes.len(), &bytes).with_filepath(path))
    }

    fn load_gaussian(&self, path: &Path) -> Result<GaussianDataDesc> {
        Err(ComputeError::UnsupportedFormat(path.display().to_string()))
    }

    fn save_nanovdb(&self, array: &ComputeArray, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, array.as_bytes())?;
        info!("Saved volume '{}'", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::VoxelGrid;
    use glam::IVec3;

    #[test]
    fn save_then_load_volume() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/grid.nvdb");
        let mut grid = VoxelGrid::new(1.0);
        grid.set(IVec3::ONE, 2.0);

        let loader = CpuFileLoader::new();
        loader.save_nanovdb(&grid.to_array(), &path).unwrap();
        let array = loader.load_nanovdb(&path).unwrap();
        assert_eq!(array.filepath(), Some(path.as_path()));
        assert_eq!(VoxelGrid::from_bytes(array.as_bytes()).unwrap().get(IVec3::ONE), 2.0);
    }

    #[test]
    fn rejects_files_without_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.nvdb");
        fs::write(&path, b"hello").unwrap();
        assert!(matches!(
            CpuFileLoader::new().load_nanovdb(&path),
            Err(ComputeError::InvalidNanoVdb(_))
        ));
    }
}
