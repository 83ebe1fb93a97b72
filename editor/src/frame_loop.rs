use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use backend::{RESOLVED_PORT_PENDING, RESOLVED_PORT_UNRESOLVED};
use params::ShaderParams;
use tracing::{info, warn};
use viewer::{Swapchain, Viewport};

use crate::config::EditorConfig;
use crate::editor_scene::EditorScene;
use crate::state::EditorState;

/// One viewport plus the editor scene it shows. Lives on the render thread.
pub struct EditorLoop {
    state: Arc<EditorState>,
    viewport: Viewport,
    scene: EditorScene,
}

impl EditorLoop {
    pub(crate) fn new(state: Arc<EditorState>, config: &EditorConfig, swapchain: Option<Box<dyn Swapchain>>) -> Self {
        state.requests.set_settings(config.compiler_settings());
        state.requests.request_update();
        state.worker.clear_stop();
        if config.streaming {
            state.resolved_port.store(RESOLVED_PORT_PENDING, Ordering::Release);
        }
        if !config.headless && swapchain.is_none() {
            warn!("No window available, running headless");
        }
        if config.headless && !config.streaming && !config.stream_to_file {
            warn!("Headless without streaming: frames are rendered but never shown");
        }
        info!("Starting editor with UI profile '{}'", config.ui_profile_name);

        let mut viewport = Viewport::new(config.render_settings(), state.resolved_port.clone());
        if let Some(swapchain) = swapchain {
            viewport = viewport.with_swapchain(swapchain);
        }
        let scene = EditorScene::new(state.clone(), ShaderParams::new(config.params_config()));
        state.running.store(true, Ordering::Release);
        Self { state, viewport, scene }
    }

    /// Runs one frame. Returns false once the loop should exit.
    pub fn step(&mut self) -> bool {
        if self.state.worker.should_stop() {
            return false;
        }
        self.scene.process_pending();
        if let Some(camera) = self.state.take_camera_sync() {
            self.viewport.set_camera(camera);
        }

        let state = self.state.clone();
        let active = move || state.worker.external_active_count();
        let open = self.viewport.update(&mut self.scene, &active);

        if !self.viewport.settings().enable_encoder {
            // a failed bind disables the encoder; waiters must not hang on it
            let _ = self.state.resolved_port.compare_exchange(
                RESOLVED_PORT_PENDING,
                RESOLVED_PORT_UNRESOLVED,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
        open && !self.state.worker.should_stop()
    }

    /// Steps until the window closes or a stop is requested.
    pub fn run(&mut self) {
        while self.step() {}
        info!("Editor loop finished after {} frames", self.viewport.frame_id());
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn viewport_mut(&mut self) -> &mut Viewport {
        &mut self.viewport
    }

    pub fn scene(&self) -> &EditorScene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut EditorScene {
        &mut self.scene
    }

    pub fn failed_shader(&self) -> Option<&str> {
        self.scene.failed_shader()
    }

    pub fn request_capture(&mut self, path: impl Into<PathBuf>) {
        self.viewport.request_capture(path);
    }
}

impl Drop for EditorLoop {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::Release);
        self.scene.release();
        self.state.resolved_port.store(RESOLVED_PORT_UNRESOLVED, Ordering::Release);
    }
}
