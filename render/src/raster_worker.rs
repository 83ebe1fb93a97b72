use std::path::Path;
use std::sync::Arc;

use compute::{FileLoader, Raster};
use pipeline::{FileImportConfig, FileImportExecutor, ImportCompletion, TaskId, install_imported};
use scene::{SceneManager, SceneView};
use tracing::info;

use crate::{RenderError, Result};

/// Background rasterization of a gaussian file into gaussian data or a volume.
///
/// Completion is polled once per frame; the caller owns whatever the result displaced.
pub struct RasterizationWorker {
    executor: FileImportExecutor,
}

impl RasterizationWorker {
    pub fn new(loader: Arc<dyn FileLoader>, raster: Arc<dyn Raster>) -> Result<Self> {
        Ok(Self {
            executor: FileImportExecutor::new(loader, raster)?,
        })
    }

    pub fn start_rasterization(
        &self,
        filepath: impl AsRef<Path>,
        voxels_per_unit: f32,
        rasterize_to_nanovdb: bool,
    ) -> Result<TaskId> {
        if self.executor.is_importing() {
            return Err(RenderError::RasterizationInProgress);
        }
        let mut config = FileImportConfig::new(filepath.as_ref());
        if voxels_per_unit > 0.0 {
            config.voxels_per_unit = voxels_per_unit;
        }
        config.rasterize_to_nanovdb = rasterize_to_nanovdb;
        info!("Running rasterization: '{}'...", filepath.as_ref().display());
        Ok(self.executor.start(&config)?)
    }

    pub fn is_rasterizing(&self) -> bool {
        self.executor.is_importing()
    }

    pub fn progress(&self) -> Option<(String, f32)> {
        self.executor.progress()
    }

    /// Installs a finished task into the current scene. `None` while nothing has finished.
    pub fn handle_rasterization_completion(
        &self,
        scenes: &SceneManager,
        views: &SceneView,
    ) -> Option<ImportCompletion> {
        let (filepath, result) = self.executor.take_completed()?;
        Some(install_imported(scenes, views, filepath, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compute::cpu::{CpuFileLoader, CpuRaster, VoxelGrid};
    use compute::{ComputeArray, ComputeError, GaussianDataDesc};
    use std::time::{Duration, Instant};
    use token::TokenTable;

    /// Serves one isotropic gaussian for any path.
    struct OneGaussianLoader;

    impl FileLoader for OneGaussianLoader {
        fn load_nanovdb(&self, path: &Path) -> compute::Result<ComputeArray> {
            Err(ComputeError::UnsupportedFormat(path.display().to_string()))
        }

        fn load_gaussian(&self, _path: &Path) -> compute::Result<GaussianDataDesc> {
            Ok(GaussianDataDesc {
                means: Some(ComputeArray::from_slice(&[0.0f32, 0.0, 0.0])),
                opacities: Some(ComputeArray::from_slice(&[4.0f32])),
                scales: Some(ComputeArray::from_slice(&[(0.02f32).ln(); 3])),
                ..Default::default()
            })
        }

        fn save_nanovdb(&self, _array: &ComputeArray, _path: &Path) -> compute::Result<()> {
            Ok(())
        }
    }

    fn wait(worker: &RasterizationWorker, scenes: &SceneManager, views: &SceneView) -> ImportCompletion {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(done) = worker.handle_rasterization_completion(scenes, views) {
                return done;
            }
            assert!(Instant::now() < deadline, "rasterization did not finish");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn rasterizes_file_into_volume() {
        let scenes = SceneManager::new();
        let views = SceneView::new(Arc::new(TokenTable::new()));
        let worker = RasterizationWorker::new(Arc::new(OneGaussianLoader), Arc::new(CpuRaster::new())).unwrap();
        worker.start_rasterization("splats/bunny.ply", 64.0, true).unwrap();

        let done = wait(&worker, &scenes, &views);
        assert!(done.succeeded());
        assert!(!worker.is_rasterizing());
        assert_eq!(done.name.as_str(), "bunny");
        let volume = scenes
            .get(&done.scene, &done.name)
            .and_then(|o| o.payload.as_nanovdb().cloned())
            .unwrap();
        let grid = VoxelGrid::from_bytes(volume.as_bytes()).unwrap();
        assert_eq!(grid.voxel_size(), 1.0 / 64.0);
        assert!(grid.get(glam::IVec3::ZERO) > 0.0);
        assert_eq!(volume.filepath(), Some(Path::new("splats/bunny.ply")));
    }

    #[test]
    fn gaussian_mode_keeps_gaussians() {
        let scenes = SceneManager::new();
        let views = SceneView::new(Arc::new(TokenTable::new()));
        let worker = RasterizationWorker::new(Arc::new(OneGaussianLoader), Arc::new(CpuRaster::new())).unwrap();
        worker.start_rasterization("bunny.ply", 0.0, false).unwrap();
        let done = wait(&worker, &scenes, &views);
        let object = scenes.get(&done.scene, &done.name).unwrap();
        assert_eq!(object.payload.as_gaussian().unwrap().count(), 1);
        assert_eq!(views.current_view(None), Some(done.name.clone()));
    }

    #[test]
    fn loader_errors_are_reported() {
        let scenes = SceneManager::new();
        let views = SceneView::new(Arc::new(TokenTable::new()));
        let worker = RasterizationWorker::new(Arc::new(CpuFileLoader::new()), Arc::new(CpuRaster::new())).unwrap();
        worker.start_rasterization("missing.ply", 128.0, true).unwrap();
        let done = wait(&worker, &scenes, &views);
        assert!(!done.succeeded());
        assert_eq!(scenes.count(), 0);
    }
}
