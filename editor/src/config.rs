use std::path::{Path, PathBuf};

use backend::DEFAULT_SERVER_ADDRESS;
use compute::CompilerSettings;
use params::ParamsConfig;
use serde::{Deserialize, Serialize};
use tracing::info;
use viewer::{DEFAULT_ENCODE_FILENAME, DEFAULT_HEIGHT, DEFAULT_SERVER_PORT, DEFAULT_WIDTH, RenderSettings};

use crate::Result;

pub const DEFAULT_UI_PROFILE: &str = "default";

/// Startup options of an editor session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub ip_address: String,
    pub port: u16,
    /// No local window. Output only reaches the stream server or the stream file.
    pub headless: bool,
    pub streaming: bool,
    pub stream_to_file: bool,
    pub ui_profile_name: String,
    pub server_create_max_attempts: u32,
    pub shader_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub encode_filename: PathBuf,
    pub width: u32,
    pub height: u32,
}

impl Default for EditorConfig {
    fn default() -> Self {
        let compiler = CompilerSettings::default();
        Self {
            ip_address: DEFAULT_SERVER_ADDRESS.to_string(),
            port: DEFAULT_SERVER_PORT,
            headless: false,
            streaming: false,
            stream_to_file: false,
            ui_profile_name: DEFAULT_UI_PROFILE.to_string(),
            server_create_max_attempts: 32,
            shader_dir: compiler.shader_dir,
            cache_dir: compiler.cache_dir,
            encode_filename: PathBuf::from(DEFAULT_ENCODE_FILENAME),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }
}

impl EditorConfig {
    /// Reads a JSON config. Relative directories resolve against the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&text)?;
        if let Some(base) = path.parent() {
            config.shader_dir = resolve(base, &config.shader_dir);
            config.cache_dir = resolve(base, &config.cache_dir);
        }
        info!("Loaded editor config from {}", path.display());
        Ok(config)
    }

    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            enable_encoder: self.streaming,
            stream_to_file: self.stream_to_file,
            encode_filename: self.encode_filename.clone(),
            width: self.width,
            height: self.height,
            server_address: self.ip_address.clone(),
            server_port: self.port,
            server_create_max_attempts: self.server_create_max_attempts,
            ..Default::default()
        }
    }

    pub fn compiler_settings(&self) -> CompilerSettings {
        CompilerSettings {
            shader_dir: self.shader_dir.clone(),
            cache_dir: self.cache_dir.clone(),
            ..Default::default()
        }
    }

    pub fn params_config(&self) -> ParamsConfig {
        ParamsConfig::new(&self.shader_dir, &self.cache_dir)
    }
}

fn resolve(base: &Path, dir: &Path) -> PathBuf {
    if dir.is_absolute() || base.as_os_str().is_empty() {
        path_clean::clean(dir)
    } else {
        path_clean::clean(base.join(dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_viewer() {
        let config = EditorConfig::default();
        assert_eq!(config.ip_address, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.ui_profile_name, "default");
        assert_eq!(config.render_settings().width, DEFAULT_WIDTH);
        assert!(!config.render_settings().enable_encoder);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf/editor.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"streaming": true, "port": 9100, "shader_dir": "../shaders/./"}"#).unwrap();

        let config = EditorConfig::load(&path).unwrap();
        assert!(config.streaming);
        assert_eq!(config.port, 9100);
        assert!(!config.headless);
        assert_eq!(config.shader_dir, dir.path().join("shaders"));
        assert_eq!(config.cache_dir, dir.path().join("conf/shaders/_cache"));

        let settings = config.render_settings();
        assert!(settings.enable_encoder);
        assert_eq!(settings.server_config().port, 9100);
        assert_eq!(config.params_config().shader_dir, dir.path().join("shaders"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("editor.json");
        std::fs::write(&path, "{ streaming: ").unwrap();
        assert!(matches!(EditorConfig::load(&path), Err(crate::EditorError::Config(_))));
    }
}
