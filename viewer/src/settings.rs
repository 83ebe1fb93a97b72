use std::path::{Path, PathBuf};

use backend::{DEFAULT_SERVER_ADDRESS, ServerConfig};
use scene::{CameraConfig, CameraState};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;

pub const DEFAULT_WIDTH: u32 = 1440;
pub const DEFAULT_HEIGHT: u32 = 720;
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_ENCODE_FILENAME: &str = "capture_stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMode {
    /// Render at `width` x `height`.
    #[default]
    Fixed,
    /// Follow the size reported by the remote client.
    FitClient,
}

/// Per-viewport render configuration, persisted between sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub is_projection_rh: bool,
    pub is_orthographic: bool,
    pub is_reverse_z: bool,
    pub is_y_up: bool,
    pub is_upside_down: bool,
    pub vsync: bool,
    pub enable_encoder: bool,
    pub stream_to_file: bool,
    pub encode_filename: PathBuf,
    pub resolution_mode: ResolutionMode,
    pub width: u32,
    pub height: u32,
    pub server_address: String,
    pub server_port: u16,
    pub server_create_max_attempts: u32,
    pub camera_state: CameraState,
    pub camera_config: CameraConfig,
    /// One-shot request to push `camera_state` into the live camera.
    #[serde(skip)]
    pub sync_camera: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            is_projection_rh: true,
            is_orthographic: false,
            is_reverse_z: true,
            is_y_up: false,
            is_upside_down: false,
            vsync: true,
            enable_encoder: false,
            stream_to_file: false,
            encode_filename: PathBuf::from(DEFAULT_ENCODE_FILENAME),
            resolution_mode: ResolutionMode::Fixed,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            server_address: DEFAULT_SERVER_ADDRESS.to_string(),
            server_port: DEFAULT_SERVER_PORT,
            server_create_max_attempts: 32,
            camera_state: CameraState::default(),
            camera_config: CameraConfig::default(),
            sync_camera: false,
        }
    }
}

impl RenderSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let settings = serde_json::from_str(&text)?;
        info!("Loaded render settings from {}", path.display());
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            address: self.server_address.clone(),
            port: self.server_port,
            max_attempts: self.server_create_max_attempts,
        }
    }

    /// Folds the projection flags into `config`. The far plane is reset when the depth
    /// convention changes.
    pub fn apply_projection(&self, config: &mut CameraConfig) {
        let depth_changed =
            config.is_reverse_z != self.is_reverse_z || config.is_orthographic != self.is_orthographic;
        config.is_projection_rh = self.is_projection_rh;
        config.is_orthographic = self.is_orthographic;
        config.is_reverse_z = self.is_reverse_z;
        if depth_changed {
            config.far_plane = config.default_far_plane();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn settings_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings/render.json");

        let mut settings = RenderSettings::default();
        settings.is_y_up = true;
        settings.server_port = 9000;
        settings.resolution_mode = ResolutionMode::FitClient;
        settings.camera_state.position = Vec3::new(1.0, 2.0, 3.0);
        settings.save(&path).unwrap();

        let loaded = RenderSettings::load(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let settings: RenderSettings = serde_json::from_str(r#"{"vsync": false}"#).unwrap();
        assert!(!settings.vsync);
        assert_eq!((settings.width, settings.height), (DEFAULT_WIDTH, DEFAULT_HEIGHT));
        assert_eq!(settings.encode_filename, PathBuf::from("capture_stream"));
        assert!(settings.camera_config.far_plane.is_infinite());
    }

    #[test]
    fn reverse_z_toggle_resets_far_plane() {
        let mut config = CameraConfig::default();
        let mut settings = RenderSettings::default();
        settings.is_reverse_z = false;
        settings.apply_projection(&mut config);
        assert!(!config.is_reverse_z);
        assert_eq!(config.far_plane, 10000.0);

        settings.is_reverse_z = true;
        settings.apply_projection(&mut config);
        assert!(config.far_plane.is_infinite());
    }
}
