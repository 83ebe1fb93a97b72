use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamsConfig {
    pub shader_dir: PathBuf,
    pub cache_dir: PathBuf,
}

impl Default for ParamsConfig {
    fn default() -> Self {
        Self {
            shader_dir: PathBuf::from("shaders"),
            cache_dir: PathBuf::from("shaders/_cache"),
        }
    }
}

impl ParamsConfig {
    pub fn new(shader_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            shader_dir: shader_dir.into(),
            cache_dir: cache_dir.into(),
        }
    }

    /// User-editable parameter file: the shader path with a `.json` extension.
    pub fn user_params_path(&self, name: &str) -> PathBuf {
        self.shader_dir.join(name).with_extension("json")
    }

    /// Reflection written by the shader compiler.
    pub fn reflection_path(&self, shader_name: &str) -> PathBuf {
        compute::reflection_path(&self.cache_dir, shader_name)
    }

    pub fn shader_path(&self, shader_name: &str) -> PathBuf {
        self.shader_dir.join(shader_name)
    }

    pub fn shader_dir(&self) -> &Path {
        &self.shader_dir
    }
}
