use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use compute::DEFAULT_ENTRY_POINT;
use params::{ParamBlock, ReflectType};
use serde::{Deserialize, Serialize};
use token::Token;

use crate::{PipelineOutput, PipelineStatus, PipelineType};

pub const RASTER3D_GAUSSIAN_SHADER: &str = "raster/gaussian_rasterize_3d.slang";
pub const RASTER2D_GAUSSIAN_SHADER: &str = "raster/gaussian_rasterize_2d.slang";
pub const RASTER2D_SHADER_GROUP: &str = "raster/gaussian_rasterize_2d_group";

pub const DEFAULT_VOXELS_PER_UNIT: f32 = 128.0;

/// Invoked after a run with the final status and, on success, the produced output.
pub type CompletionCallback = Arc<dyn Fn(PipelineStatus, Option<&PipelineOutput>) + Send + Sync>;

/// A shader stage of a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineShader {
    pub path: String,
    pub entry_point: String,
    /// Shader whose parameter files describe this stage; empty for none.
    pub params_json_name: String,
    pub is_overridden: bool,
    pub params: Option<Arc<ParamBlock>>,
}

impl PipelineShader {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            params_json_name: path.clone(),
            path,
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            is_overridden: false,
            params: None,
        }
    }

    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }

    pub fn has_parameters(&self) -> bool {
        self.params.is_some()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Raster3DParams {
    pub voxel_size: f32,
}

impl Default for Raster3DParams {
    fn default() -> Self {
        Self {
            voxel_size: 1.0 / DEFAULT_VOXELS_PER_UNIT,
        }
    }
}

impl Raster3DParams {
    pub fn descriptor() -> ReflectType {
        ReflectType::new("Raster3DParams").with_f32("voxel_size", Self::default().voxel_size)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileImportConfig {
    pub filepath: PathBuf,
    pub voxels_per_unit: f32,
    /// Gaussian files only: produce a volume instead of gaussian data.
    pub rasterize_to_nanovdb: bool,
}

impl FileImportConfig {
    pub fn new(filepath: impl Into<PathBuf>) -> Self {
        Self {
            filepath: filepath.into(),
            voxels_per_unit: DEFAULT_VOXELS_PER_UNIT,
            rasterize_to_nanovdb: false,
        }
    }

    pub fn is_nanovdb_file(&self) -> bool {
        is_nanovdb_file(&self.filepath)
    }

    pub fn voxel_size(&self) -> f32 {
        1.0 / self.voxels_per_unit
    }
}

pub fn is_nanovdb_file(path: &Path) -> bool {
    path.to_string_lossy().to_ascii_lowercase().ends_with(".nvdb")
}

/// Overrides applied through `configure_pipeline`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub shader_path: Option<String>,
    pub shader_entry_point: Option<String>,
    pub params: Vec<(String, f32)>,
}

#[derive(Clone)]
pub struct PipelineConfig {
    pub ty: PipelineType,
    pub name: Option<Token>,
    pub scene: Option<Token>,
    pub object: Option<Token>,

    /// Shader whose parameter files seed `params`; empty when the pipeline has none.
    pub params_json_name: String,
    /// Parameter backing shared with the scene object.
    pub params: Option<Arc<ParamBlock>>,

    pub shaders: Vec<PipelineShader>,

    pub status: PipelineStatus,
    pub auto_execute: bool,
    pub needs_run: bool,

    pub input_components: Vec<Token>,
    pub output_components: Vec<Token>,
    /// Semantic name used by the executor -> named component of the scene object.
    pub named_array_refs: BTreeMap<String, Token>,

    pub import: Option<FileImportConfig>,
    pub on_complete: Option<CompletionCallback>,
}

impl PipelineConfig {
    pub fn new(ty: PipelineType) -> Self {
        Self {
            ty,
            name: None,
            scene: None,
            object: None,
            params_json_name: String::new(),
            params: None,
            shaders: Vec::new(),
            status: PipelineStatus::NotRun,
            auto_execute: true,
            needs_run: false,
            input_components: Vec::new(),
            output_components: Vec::new(),
            named_array_refs: BTreeMap::new(),
            import: None,
            on_complete: None,
        }
    }

    pub fn add_shader(&mut self, shader: PipelineShader) {
        self.shaders.push(shader);
    }

    /// Overrides the shader at `index`. Returns false when there is no such stage.
    pub fn set_shader(&mut self, index: usize, path: &str, entry_point: Option<&str>) -> bool {
        let Some(shader) = self.shaders.get_mut(index) else {
            return false;
        };
        shader.path = path.to_string();
        shader.entry_point = entry_point.unwrap_or(DEFAULT_ENTRY_POINT).to_string();
        shader.params_json_name = shader.path.clone();
        shader.is_overridden = true;
        true
    }

    pub fn shader(&self, index: usize) -> Option<&PipelineShader> {
        self.shaders.get(index)
    }

    pub fn shader_count(&self) -> usize {
        self.shaders.len()
    }

    pub fn uses_dynamic_params(&self) -> bool {
        !self.params_json_name.is_empty()
    }

    pub fn mark_dirty(&mut self) {
        self.status = PipelineStatus::Dirty;
        self.needs_run = self.auto_execute;
    }

    /// Whether the per-frame tick should run this pipeline.
    pub fn wants_run(&self) -> bool {
        self.auto_execute
            && (self.needs_run || matches!(self.status, PipelineStatus::Dirty | PipelineStatus::NotRun))
    }

    pub fn is_scoped_to(&self, scene: &Token, object: &Token) -> bool {
        self.scene.as_ref() == Some(scene) && self.object.as_ref() == Some(object)
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("ty", &self.ty)
            .field("name", &self.name)
            .field("scene", &self.scene)
            .field("object", &self.object)
            .field("params_json_name", &self.params_json_name)
            .field("shaders", &self.shaders)
            .field("status", &self.status)
            .field("auto_execute", &self.auto_execute)
            .field("needs_run", &self.needs_run)
            .field("has_callback", &self.on_complete.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_override_follows_path() {
        let mut config = PipelineConfig::new(PipelineType::Raster3D);
        config.add_shader(PipelineShader::new(RASTER3D_GAUSSIAN_SHADER));
        assert_eq!(config.shader(0).unwrap().entry_point, "main");
        assert_eq!(config.shader(0).unwrap().params_json_name, RASTER3D_GAUSSIAN_SHADER);

        assert!(!config.set_shader(1, "custom.slang", None));
        assert!(config.set_shader(0, "custom.slang", Some("entry")));
        let shader = config.shader(0).unwrap();
        assert!(shader.is_overridden);
        assert_eq!(shader.params_json_name, "custom.slang");
        assert_eq!(shader.entry_point, "entry");
    }

    #[test]
    fn nanovdb_extension_is_case_insensitive() {
        assert!(FileImportConfig::new("a/b/volume.NVDB").is_nanovdb_file());
        assert!(FileImportConfig::new("volume.nvdb").is_nanovdb_file());
        assert!(!FileImportConfig::new("splats.ply").is_nanovdb_file());
        assert!(!FileImportConfig::new("nvdb").is_nanovdb_file());
    }

    #[test]
    fn raster3d_defaults() {
        let ty = Raster3DParams::descriptor();
        let bytes = ty.default_bytes();
        assert_eq!(ty.get::<f32>(&bytes, "voxel_size"), Some(1.0 / 128.0));
        assert_eq!(bytemuck::bytes_of(&Raster3DParams::default()), bytes.as_slice());
    }

    #[test]
    fn dirty_respects_auto_execute() {
        let mut config = PipelineConfig::new(PipelineType::Null);
        config.status = PipelineStatus::Completed;
        assert!(!config.wants_run());
        config.mark_dirty();
        assert!(config.wants_run());

        config.auto_execute = false;
        config.mark_dirty();
        assert!(!config.needs_run);
        assert!(!config.wants_run());
    }
}
