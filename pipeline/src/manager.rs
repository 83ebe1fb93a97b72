use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use compute::{FileLoader, Raster};
use params::{ParamBlock, ShaderParams};
use scene::{ObjectType, Payload, SceneManager, SceneView};
use token::{Token, TokenTable};
use tracing::{debug, info, warn};

use crate::config::{RASTER2D_GAUSSIAN_SHADER, RASTER2D_SHADER_GROUP, RASTER3D_GAUSSIAN_SHADER};
use crate::executor::{NullExecutor, Raster3DExecutor, RenderExecutor};
use crate::import::install_imported;
use crate::types::{make_object_pipeline_key, make_pipeline_key};
use crate::{
    ExecutionContext, FileImportConfig, FileImportExecutor, ImportCompletion, PipelineConfig,
    PipelineError, PipelineExecutor, PipelineOutput, PipelineSettings, PipelineShader, PipelineStatus, PipelineType,
    Raster3DParams, Result,
};

/// Shared services a run may need.
#[derive(Clone, Copy)]
pub struct PipelineResources<'a> {
    pub scenes: &'a SceneManager,
    pub raster: Option<&'a dyn Raster>,
    pub tokens: &'a TokenTable,
}

/// Outcome of one manager tick.
#[derive(Debug, Default)]
pub struct TickReport {
    pub executed: usize,
    /// Outputs displaced by new results; drop them once no frame references them.
    pub retired: Vec<Payload>,
}

/// Every pipeline of the editor, keyed by type and scope.
pub struct PipelineManager {
    conversion: BTreeMap<u64, PipelineConfig>,
    render: BTreeMap<u64, PipelineConfig>,
    executors: HashMap<PipelineType, Arc<dyn PipelineExecutor>>,
    file_import: Option<Arc<FileImportExecutor>>,
    import_config: Option<FileImportConfig>,
}

impl Default for PipelineManager {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_context<'a>(config: &PipelineConfig, res: &PipelineResources<'a>) -> ExecutionContext<'a> {
    let mut ctx = ExecutionContext::new(res.tokens);
    ctx.raster = res.raster;
    if let (Some(scene), Some(object)) = (&config.scene, &config.object) {
        if let Some(object) = res.scenes.get(scene, object) {
            ctx.input = Some(object.payload);
            ctx.named_arrays = object.named_components;
        }
    }
    ctx
}

/// Runs `config` once. Returns `None` when the executor reports missing inputs.
fn run(
    executor: &dyn PipelineExecutor,
    config: &mut PipelineConfig,
    res: &PipelineResources<'_>,
    retired: &mut Vec<Payload>,
) -> Option<PipelineStatus> {
    let mut ctx = resolve_context(config, res);
    if !executor.can_execute(config, &ctx) {
        debug!("{} pipeline cannot execute (missing inputs or resources)", config.ty);
        return None;
    }

    config.status = PipelineStatus::Running;
    let status = executor.execute(config, &mut ctx);
    config.status = status;
    config.needs_run = false;

    if status == PipelineStatus::Completed {
        if let (Some(output), Some(scene), Some(object)) = (&ctx.output, &config.scene, &config.object) {
            match res.scenes.set_output(scene, object, output.payload().clone()) {
                Ok(previous) => retired.extend(previous),
                Err(e) => warn!("{} pipeline output dropped: {e}", config.ty),
            }
        }
    }
    if status.is_terminal() {
        if let Some(callback) = &config.on_complete {
            callback(status, ctx.output.as_ref());
        }
    }
    Some(status)
}

impl PipelineManager {
    pub fn new() -> Self {
        let mut executors: HashMap<PipelineType, Arc<dyn PipelineExecutor>> = HashMap::new();
        executors.insert(PipelineType::Null, Arc::new(NullExecutor));
        executors.insert(PipelineType::Render, Arc::new(RenderExecutor));
        executors.insert(PipelineType::Raster3D, Arc::new(Raster3DExecutor));
        Self {
            conversion: BTreeMap::new(),
            render: BTreeMap::new(),
            executors,
            file_import: None,
            import_config: None,
        }
    }

    /// Starts the import worker. Required before `import_file`.
    pub fn configure_file_import(&mut self, loader: Arc<dyn FileLoader>, raster: Arc<dyn Raster>) -> Result<()> {
        let executor = Arc::new(FileImportExecutor::new(loader, raster)?);
        self.executors.insert(PipelineType::FileImport, executor.clone());
        self.file_import = Some(executor);
        Ok(())
    }

    pub fn register_executor(&mut self, ty: PipelineType, executor: Arc<dyn PipelineExecutor>) {
        self.executors.insert(ty, executor);
    }

    fn executor(&self, ty: PipelineType) -> Option<Arc<dyn PipelineExecutor>> {
        self.executors.get(&ty).cloned()
    }

    fn map_for(&mut self, ty: PipelineType) -> &mut BTreeMap<u64, PipelineConfig> {
        if ty.is_conversion() {
            &mut self.conversion
        } else {
            &mut self.render
        }
    }

    pub fn set_conversion_pipeline(&mut self, ty: PipelineType, mut config: PipelineConfig, name: Option<&Token>) {
        config.ty = ty;
        config.name = name.cloned();
        config.status = PipelineStatus::NotRun;
        config.needs_run = true;
        self.conversion.insert(make_pipeline_key(ty, name), config);
    }

    pub fn set_render_pipeline(&mut self, mut config: PipelineConfig, name: Option<&Token>) {
        config.ty = PipelineType::Render;
        config.name = name.cloned();
        self.render.insert(make_pipeline_key(PipelineType::Render, name), config);
    }

    pub fn conversion_pipeline(&self, ty: PipelineType, name: Option<&Token>) -> Option<&PipelineConfig> {
        self.conversion.get(&make_pipeline_key(ty, name))
    }

    pub fn render_pipeline(&self, name: Option<&Token>) -> Option<&PipelineConfig> {
        self.render.get(&make_pipeline_key(PipelineType::Render, name))
    }

    pub fn set_object_conversion_pipeline(
        &mut self,
        scene: &Token,
        object: &Token,
        ty: PipelineType,
        mut config: PipelineConfig,
        name: Option<&Token>,
    ) {
        config.ty = ty;
        config.name = name.cloned();
        config.scene = Some(scene.clone());
        config.object = Some(object.clone());
        config.status = PipelineStatus::NotRun;
        config.needs_run = true;
        let key = make_object_pipeline_key(Some(scene), Some(object), ty, name);
        self.conversion.insert(key, config);
    }

    pub fn set_object_render_pipeline(
        &mut self,
        scene: &Token,
        object: &Token,
        mut config: PipelineConfig,
        name: Option<&Token>,
    ) {
        config.ty = PipelineType::Render;
        config.name = name.cloned();
        config.scene = Some(scene.clone());
        config.object = Some(object.clone());
        let key = make_object_pipeline_key(Some(scene), Some(object), PipelineType::Render, name);
        self.render.insert(key, config);
    }

    pub fn object_pipeline(
        &self,
        scene: &Token,
        object: &Token,
        ty: PipelineType,
        name: Option<&Token>,
    ) -> Option<&PipelineConfig> {
        let key = make_object_pipeline_key(Some(scene), Some(object), ty, name);
        if ty.is_conversion() {
            self.conversion.get(&key)
        } else {
            self.render.get(&key)
        }
    }

    pub fn object_pipeline_mut(
        &mut self,
        scene: &Token,
        object: &Token,
        ty: PipelineType,
        name: Option<&Token>,
    ) -> Option<&mut PipelineConfig> {
        let key = make_object_pipeline_key(Some(scene), Some(object), ty, name);
        self.map_for(ty).get_mut(&key)
    }

    /// Pipelines attached to one object, conversion pipelines first.
    pub fn object_pipelines(&self, scene: &Token, object: &Token) -> Vec<&PipelineConfig> {
        self.conversion
            .values()
            .chain(self.render.values())
            .filter(|c| c.is_scoped_to(scene, object))
            .collect()
    }

    pub fn pipeline_status(
        &self,
        scene: &Token,
        object: &Token,
        ty: PipelineType,
        name: Option<&Token>,
    ) -> Option<PipelineStatus> {
        self.object_pipeline(scene, object, ty, name).map(|c| c.status)
    }

    pub fn mark_dirty(&mut self, ty: PipelineType, name: Option<&Token>) {
        if let Some(config) = self.conversion.get_mut(&make_pipeline_key(ty, name)) {
            config.mark_dirty();
        }
    }

    pub fn mark_all_dirty(&mut self) {
        self.conversion.values_mut().for_each(PipelineConfig::mark_dirty);
    }

    pub fn mark_object_dirty(&mut self, scene: &Token, object: &Token, ty: PipelineType, name: Option<&Token>) {
        let key = make_object_pipeline_key(Some(scene), Some(object), ty, name);
        if let Some(config) = self.conversion.get_mut(&key) {
            config.mark_dirty();
        }
    }

    pub fn mark_object_all_dirty(&mut self, scene: &Token, object: &Token) {
        self.conversion
            .values_mut()
            .filter(|c| c.is_scoped_to(scene, object))
            .for_each(PipelineConfig::mark_dirty);
    }

    pub fn has_pending_work(&self) -> bool {
        self.conversion
            .values()
            .any(|c| c.needs_run || c.status == PipelineStatus::Dirty)
    }

    fn execute_key(
        &mut self,
        key: u64,
        ty: PipelineType,
        res: &PipelineResources<'_>,
        retired: &mut Vec<Payload>,
    ) -> Result<PipelineStatus> {
        let executor = self
            .executor(ty)
            .ok_or_else(|| PipelineError::NotFound(format!("{ty} executor")))?;
        let config = self
            .map_for(ty)
            .get_mut(&key)
            .ok_or_else(|| PipelineError::NotFound(ty.to_string()))?;
        run(executor.as_ref(), config, res, retired)
            .ok_or_else(|| PipelineError::CannotExecute(format!("{ty} is missing inputs or resources")))
    }

    /// Runs an unscoped pipeline now, regardless of its dirty state.
    pub fn execute_pipeline(
        &mut self,
        ty: PipelineType,
        name: Option<&Token>,
        res: &PipelineResources<'_>,
    ) -> Result<(PipelineStatus, Vec<Payload>)> {
        let mut retired = Vec::new();
        let status = self.execute_key(make_pipeline_key(ty, name), ty, res, &mut retired)?;
        Ok((status, retired))
    }

    /// Runs one object's pipeline now, bypassing `auto_execute`.
    pub fn run_pipeline_manual(
        &mut self,
        scene: &Token,
        object: &Token,
        ty: PipelineType,
        name: Option<&Token>,
        res: &PipelineResources<'_>,
    ) -> Result<(PipelineStatus, Vec<Payload>)> {
        info!("Manual run of {ty} pipeline for '{object}'");
        let key = make_object_pipeline_key(Some(scene), Some(object), ty, name);
        let mut retired = Vec::new();
        let status = self.execute_key(key, ty, res, &mut retired)?;
        Ok((status, retired))
    }

    /// Runs every auto-executing conversion pipeline that is dirty or has not run yet.
    pub fn execute_dirty_pipelines(&mut self, res: &PipelineResources<'_>) -> TickReport {
        let mut report = TickReport::default();
        let Self {
            conversion, executors, ..
        } = self;
        for config in conversion.values_mut() {
            if !config.wants_run() {
                continue;
            }
            let Some(executor) = executors.get(&config.ty) else {
                continue;
            };
            if run(executor.as_ref(), config, res, &mut report.retired).is_some() {
                report.executed += 1;
            }
        }
        report
    }

    /// Creates the conversion and render pipelines an object of `ty` starts with.
    ///
    /// Pipelines that already exist are kept, with their edits, and marked dirty.
    pub fn create_default_pipelines(
        &mut self,
        scene: &Token,
        object: &Token,
        ty: ObjectType,
        object_params: Option<Arc<ParamBlock>>,
    ) {
        let (conversion_ty, mut conversion, mut render) = match ty {
            ObjectType::NanoVdb => (
                PipelineType::Null,
                PipelineConfig::new(PipelineType::Null),
                PipelineConfig::new(PipelineType::Render),
            ),
            ObjectType::GaussianData => {
                let mut raster = PipelineConfig::new(PipelineType::Raster3D);
                raster.add_shader(PipelineShader::new(RASTER3D_GAUSSIAN_SHADER));
                raster.params = Some(ParamBlock::new(Raster3DParams::descriptor()));

                let mut render = PipelineConfig::new(PipelineType::Render);
                render.params_json_name = RASTER2D_GAUSSIAN_SHADER.to_string();
                render.add_shader(PipelineShader::new(RASTER2D_GAUSSIAN_SHADER));
                (PipelineType::Raster3D, raster, render)
            }
            ObjectType::Array | ObjectType::Camera => return,
        };
        conversion.auto_execute = true;
        render.auto_execute = true;
        render.params = object_params;

        match self.object_pipeline_mut(scene, object, conversion_ty, None) {
            Some(existing) => existing.mark_dirty(),
            None => self.set_object_conversion_pipeline(scene, object, conversion_ty, conversion, None),
        }
        match self.object_pipeline_mut(scene, object, PipelineType::Render, None) {
            Some(existing) => {
                if render.params.is_some() {
                    existing.params = render.params;
                }
            }
            None => self.set_object_render_pipeline(scene, object, render, None),
        }
        debug!("Default pipelines ready for '{scene}/{object}'");
    }

    /// Seeds `config.params` from the parameter files of `config.params_json_name`.
    ///
    /// An existing block keeps the values of fields that survive the schema.
    pub fn initialize_params_from_json(config: &mut PipelineConfig, store: &mut ShaderParams) -> bool {
        if !config.uses_dynamic_params() {
            return false;
        }
        let shader = config.params_json_name.clone();
        store.load_group(RASTER2D_SHADER_GROUP, false);
        store.load(&shader, false);
        let Some(descriptor) = store.descriptor(&shader) else {
            debug!("No parameters for '{shader}' yet");
            return false;
        };
        match &config.params {
            Some(block) => block.migrate(Arc::new(descriptor)),
            None => config.params = Some(ParamBlock::new(descriptor)),
        }
        true
    }

    pub fn remove_object_pipelines(&mut self, scene: &Token, object: &Token) {
        let before = self.conversion.len() + self.render.len();
        self.conversion.retain(|_, c| !c.is_scoped_to(scene, object));
        self.render.retain(|_, c| !c.is_scoped_to(scene, object));
        let removed = before - self.conversion.len() - self.render.len();
        if removed > 0 {
            debug!("Removed {removed} pipelines of '{scene}/{object}'");
        }
    }

    /// Applies shader and parameter overrides. Returns whether anything changed.
    pub fn configure_pipeline(
        &mut self,
        scene: &Token,
        object: &Token,
        ty: PipelineType,
        settings: &PipelineSettings,
        name: Option<&Token>,
    ) -> Result<bool> {
        let config = self
            .object_pipeline_mut(scene, object, ty, name)
            .ok_or_else(|| PipelineError::NotFound(format!("{ty} for '{object}'")))?;

        let mut modified = false;
        if let Some(path) = &settings.shader_path {
            if config.set_shader(0, path, settings.shader_entry_point.as_deref()) {
                debug!("Set shader '{path}' for '{object}'");
                modified = true;
            }
        }
        for (param, value) in &settings.params {
            let applied = config.params.as_ref().is_some_and(|p| p.set(param, *value));
            if applied {
                modified = true;
            } else {
                warn!("configure_pipeline: '{object}' has no parameter '{param}'");
            }
        }
        if modified {
            config.status = PipelineStatus::Dirty;
            config.needs_run = true;
        }
        Ok(modified)
    }

    /// Starts loading `filepath` on the import worker.
    pub fn import_file(
        &mut self,
        filepath: impl AsRef<Path>,
        rasterize_to_nanovdb: bool,
        voxel_size: Option<f32>,
        res: &PipelineResources<'_>,
    ) -> Result<()> {
        if self.file_import.is_none() {
            return Err(PipelineError::NotFound("file import executor".to_string()));
        }
        if self.is_importing() {
            return Err(PipelineError::ImportInProgress);
        }
        let mut import = FileImportConfig::new(filepath.as_ref());
        import.rasterize_to_nanovdb = rasterize_to_nanovdb;
        if let Some(voxel_size) = voxel_size.filter(|v| *v > 0.0) {
            import.voxels_per_unit = 1.0 / voxel_size;
        }

        let mut config = PipelineConfig::new(PipelineType::FileImport);
        config.auto_execute = false;
        config.import = Some(import.clone());
        self.import_config = Some(import);
        self.conversion
            .insert(make_pipeline_key(PipelineType::FileImport, None), config);

        match self.execute_pipeline(PipelineType::FileImport, None, res)?.0 {
            PipelineStatus::Running | PipelineStatus::Completed => Ok(()),
            _ => Err(PipelineError::ImportInProgress),
        }
    }

    pub fn is_importing(&self) -> bool {
        self.file_import.as_ref().is_some_and(|e| e.is_importing())
    }

    pub fn import_config(&self) -> Option<&FileImportConfig> {
        self.import_config.as_ref()
    }

    pub fn import_progress(&self) -> Option<(String, f32)> {
        self.file_import.as_ref().and_then(|e| e.progress())
    }

    /// Installs a finished import into the current scene. Call once per frame.
    pub fn poll_import(&mut self, scenes: &SceneManager, views: &SceneView) -> Option<ImportCompletion> {
        let executor = self.file_import.clone()?;
        let (filepath, result) = executor.take_completed()?;

        let completion = install_imported(scenes, views, filepath, result);
        if let Some(payload) = &completion.payload {
            self.create_default_pipelines(&completion.scene, &completion.name, payload.object_type(), None);
        }

        let status = if completion.succeeded() {
            PipelineStatus::Completed
        } else {
            PipelineStatus::Failed
        };
        let key = make_pipeline_key(PipelineType::FileImport, None);
        if let Some(config) = self.conversion.get_mut(&key) {
            config.status = status;
            if let Some(callback) = &config.on_complete {
                let output = completion.payload.clone().map(PipelineOutput::Produced);
                callback(status, output.as_ref());
            }
        }
        Some(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compute::cpu::{CpuFileLoader, CpuRaster, VoxelGrid};
    use compute::{ComputeArray, GaussianData, GaussianDataDesc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    struct Fixture {
        tokens: Arc<TokenTable>,
        scenes: SceneManager,
        raster: CpuRaster,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                tokens: Arc::new(TokenTable::new()),
                scenes: SceneManager::new(),
                raster: CpuRaster::default(),
            }
        }

        fn res(&self) -> PipelineResources<'_> {
            PipelineResources {
                scenes: &self.scenes,
                raster: Some(&self.raster),
                tokens: &self.tokens,
            }
        }

        fn token(&self, name: &str) -> Token {
            self.tokens.get_or_create(name)
        }
    }

    fn gaussian() -> Arc<GaussianData> {
        let desc = GaussianDataDesc {
            means: Some(ComputeArray::from_slice(&[0.0f32, 0.0, 0.0])),
            opacities: Some(ComputeArray::from_slice(&[4.0f32])),
            quaternions: Some(ComputeArray::from_slice(&[1.0f32, 0.0, 0.0, 0.0])),
            scales: Some(ComputeArray::from_slice(&[(0.03f32).ln(); 3])),
            ..Default::default()
        };
        Arc::new(GaussianData::from_desc(desc).unwrap())
    }

    #[test]
    fn nanovdb_defaults_alias_input() {
        let fx = Fixture::new();
        let (s, g) = (fx.token("S"), fx.token("G"));
        let array = Arc::new(ComputeArray::new(1, 16));
        let _ = fx.scenes.add_nanovdb(&s, &g, array.clone(), None, None);

        let mut manager = PipelineManager::new();
        manager.create_default_pipelines(&s, &g, ObjectType::NanoVdb, None);
        assert_eq!(manager.object_pipelines(&s, &g).len(), 2);
        assert!(manager.has_pending_work());

        let report = manager.execute_dirty_pipelines(&fx.res());
        assert_eq!(report.executed, 1);
        assert_eq!(
            manager.pipeline_status(&s, &g, PipelineType::Null, None),
            Some(PipelineStatus::Completed)
        );
        let output = fx.scenes.output(&s, &g).unwrap();
        assert!(Arc::ptr_eq(output.as_nanovdb().unwrap(), &array));
        assert!(!manager.has_pending_work());

        // Nothing to do until something changes.
        assert_eq!(manager.execute_dirty_pipelines(&fx.res()).executed, 0);
    }

    #[test]
    fn raster3d_runs_and_reruns_when_dirty() {
        let fx = Fixture::new();
        let (s, h) = (fx.token("S"), fx.token("H"));
        let data = gaussian();
        let _ = fx.scenes.add_gaussian_data(&s, &h, data, None, None);

        let mut manager = PipelineManager::new();
        manager.create_default_pipelines(&s, &h, ObjectType::GaussianData, None);
        let completed = Arc::new(AtomicUsize::new(0));
        let seen = completed.clone();
        manager
            .object_pipeline_mut(&s, &h, PipelineType::Raster3D, None)
            .unwrap()
            .on_complete = Some(Arc::new(move |status: PipelineStatus, output: Option<&PipelineOutput>| {
            assert_eq!(status, PipelineStatus::Completed);
            assert!(output.is_some());
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        let report = manager.execute_dirty_pipelines(&fx.res());
        assert_eq!(report.executed, 1);
        assert!(report.retired.is_empty());
        let output = fx.scenes.output(&s, &h).unwrap();
        let grid = VoxelGrid::from_bytes(output.as_nanovdb().unwrap().as_bytes()).unwrap();
        let (lo, hi) = grid.world_bbox().unwrap();
        assert!(lo.cmple(glam::Vec3::ZERO).all() && hi.cmpge(glam::Vec3::ZERO).all());
        assert_eq!(grid.voxel_size(), 1.0 / 128.0);

        let settings = PipelineSettings {
            params: vec![("voxel_size".to_string(), 1.0 / 64.0)],
            ..Default::default()
        };
        assert!(manager.configure_pipeline(&s, &h, PipelineType::Raster3D, &settings, None).unwrap());
        assert_eq!(
            manager.pipeline_status(&s, &h, PipelineType::Raster3D, None),
            Some(PipelineStatus::Dirty)
        );
        let report = manager.execute_dirty_pipelines(&fx.res());
        assert_eq!(report.executed, 1);
        assert_eq!(report.retired.len(), 1);
        assert_eq!(completed.load(Ordering::SeqCst), 2);
        let output = fx.scenes.output(&s, &h).unwrap();
        let grid = VoxelGrid::from_bytes(output.as_nanovdb().unwrap().as_bytes()).unwrap();
        assert_eq!(grid.voxel_size(), 1.0 / 64.0);
    }

    #[test]
    fn manual_run_bypasses_auto_execute() {
        let fx = Fixture::new();
        let (s, g) = (fx.token("S"), fx.token("G"));
        let _ = fx.scenes.add_nanovdb(&s, &g, Arc::new(ComputeArray::new(1, 4)), None, None);
        let mut manager = PipelineManager::new();
        let mut config = PipelineConfig::new(PipelineType::Null);
        config.auto_execute = false;
        manager.set_object_conversion_pipeline(&s, &g, PipelineType::Null, config, None);

        assert_eq!(manager.execute_dirty_pipelines(&fx.res()).executed, 0);
        let (status, _) = manager
            .run_pipeline_manual(&s, &g, PipelineType::Null, None, &fx.res())
            .unwrap();
        assert_eq!(status, PipelineStatus::Completed);
        assert!(matches!(
            manager.run_pipeline_manual(&s, &g, PipelineType::Raster3D, None, &fx.res()),
            Err(PipelineError::NotFound(_))
        ));
    }

    #[test]
    fn existing_defaults_are_kept() {
        let fx = Fixture::new();
        let (s, h) = (fx.token("S"), fx.token("H"));
        let mut manager = PipelineManager::new();
        manager.create_default_pipelines(&s, &h, ObjectType::GaussianData, None);
        let params = manager
            .object_pipeline(&s, &h, PipelineType::Raster3D, None)
            .and_then(|c| c.params.clone())
            .unwrap();
        params.set("voxel_size", 0.5f32);

        manager.create_default_pipelines(&s, &h, ObjectType::GaussianData, None);
        let config = manager.object_pipeline(&s, &h, PipelineType::Raster3D, None).unwrap();
        assert_eq!(config.status, PipelineStatus::Dirty);
        assert_eq!(config.params.as_ref().unwrap().get::<f32>("voxel_size"), Some(0.5));
        let render = manager.object_pipeline(&s, &h, PipelineType::Render, None).unwrap();
        assert_eq!(render.params_json_name, RASTER2D_GAUSSIAN_SHADER);
    }

    #[test]
    fn removing_object_drops_its_pipelines() {
        let fx = Fixture::new();
        let (s, a, b) = (fx.token("S"), fx.token("A"), fx.token("B"));
        let mut manager = PipelineManager::new();
        manager.create_default_pipelines(&s, &a, ObjectType::NanoVdb, None);
        manager.create_default_pipelines(&s, &b, ObjectType::NanoVdb, None);
        manager.remove_object_pipelines(&s, &a);
        assert!(manager.object_pipelines(&s, &a).is_empty());
        assert_eq!(manager.object_pipelines(&s, &b).len(), 2);
    }

    #[test]
    fn render_params_seed_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let config = params::ParamsConfig::new(dir.path().join("shaders"), dir.path().join("cache"));
        let reflection = config.reflection_path(RASTER2D_GAUSSIAN_SHADER);
        std::fs::create_dir_all(reflection.parent().unwrap()).unwrap();
        std::fs::write(
            &reflection,
            r#"{"shaderParams":{"eps2d":{"type":"float","elementCount":1},"sh_degree_override":{"type":"int","elementCount":1}}}"#,
        )
        .unwrap();
        let user = config.user_params_path(RASTER2D_GAUSSIAN_SHADER);
        std::fs::create_dir_all(user.parent().unwrap()).unwrap();
        std::fs::write(&user, r#"{"ShaderParams":{"eps2d":{"value":0.3}}}"#).unwrap();
        let mut store = ShaderParams::new(config);

        let mut render = PipelineConfig::new(PipelineType::Render);
        assert!(!PipelineManager::initialize_params_from_json(&mut render, &mut store));
        render.params_json_name = RASTER2D_GAUSSIAN_SHADER.to_string();

        // Object-provided values survive, missing fields take the file defaults.
        let object_params = ParamBlock::new(params::ReflectType::new("client").with_i32("sh_degree_override", 2));
        render.params = Some(object_params.clone());
        assert!(PipelineManager::initialize_params_from_json(&mut render, &mut store));
        assert_eq!(object_params.get::<i32>("sh_degree_override"), Some(2));
        assert_eq!(object_params.get::<f32>("eps2d"), Some(0.3));
    }

    fn wait_import(manager: &mut PipelineManager, fx: &Fixture, views: &SceneView) -> ImportCompletion {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(done) = manager.poll_import(&fx.scenes, views) {
                return done;
            }
            assert!(Instant::now() < deadline, "import did not finish");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn imports_nanovdb_into_current_scene() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Smoke.NVDB");
        let mut grid = VoxelGrid::new(0.5);
        grid.set(glam::IVec3::ZERO, 1.0);
        std::fs::write(&path, grid.to_bytes()).unwrap();

        let fx = Fixture::new();
        let views = SceneView::new(fx.tokens.clone());
        let mut manager = PipelineManager::new();
        manager
            .configure_file_import(Arc::new(CpuFileLoader::default()), Arc::new(CpuRaster::default()))
            .unwrap();
        manager.import_file(&path, false, None, &fx.res()).unwrap();
        assert_eq!(manager.import_config().unwrap().voxels_per_unit, 128.0);

        let done = wait_import(&mut manager, &fx, &views);
        assert!(done.succeeded());
        assert_eq!(done.name.as_str(), "Smoke");
        assert!(fx.scenes.contains(views.default_scene(), &done.name));
        assert_eq!(views.current_view(None), Some(done.name.clone()));
        assert!(!manager.is_importing());
        assert_eq!(
            manager.conversion_pipeline(PipelineType::FileImport, None).map(|c| c.status),
            Some(PipelineStatus::Completed)
        );
        assert!(manager.object_pipeline(views.default_scene(), &done.name, PipelineType::Null, None).is_some());
    }

    #[test]
    fn failed_import_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.nvdb");
        std::fs::write(&path, b"not a volume").unwrap();

        let fx = Fixture::new();
        let views = SceneView::new(fx.tokens.clone());
        let mut manager = PipelineManager::new();
        assert!(manager.import_file(&path, false, None, &fx.res()).is_err());
        manager
            .configure_file_import(Arc::new(CpuFileLoader::default()), Arc::new(CpuRaster::default()))
            .unwrap();
        manager.import_file(&path, false, None, &fx.res()).unwrap();
        let done = wait_import(&mut manager, &fx, &views);
        assert!(!done.succeeded());
        assert_eq!(fx.scenes.count(), 0);
        assert_eq!(
            manager.conversion_pipeline(PipelineType::FileImport, None).map(|c| c.status),
            Some(PipelineStatus::Failed)
        );
    }
}
