use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use backend::{RawNv12Encoder, StreamOutput, VideoEncoder};
use compute::{Texture, TextureFormat};
use scene::{Camera, CameraState};
use tracing::{error, info, warn};
use web_cmn::ServerEvent;

use crate::camera::CameraController;
use crate::error::{Result, ViewerError};
use crate::input::InputState;
use crate::settings::{RenderSettings, ResolutionMode};

const FRAME_PACING: Duration = Duration::from_millis(16);
const FRAME_DELTA: f32 = 1.0 / 60.0;

/// Presentation target for a local window. Window glue lives outside this crate.
pub trait Swapchain {
    fn resize(&mut self, width: u32, height: u32);
    fn present(&mut self, frame: &Texture, vsync: bool) -> Result<()>;
    /// Window input gathered since the last call.
    fn poll_events(&mut self) -> Vec<ServerEvent>;
    fn should_close(&self) -> bool;
}

/// Immediate-mode GUI layer composited over the rendered scene.
pub trait GuiInstance {
    fn update(&mut self, input: &InputState, width: u32, height: u32);
    /// Draws over `front` into `back`.
    fn render(&mut self, front: &Texture, back: &mut Texture) -> Result<()>;
}

/// Scene rendering driven by the viewport once per frame.
pub trait FrameRenderer {
    fn render(&mut self, background: &mut Texture, camera: &Camera);

    /// Waits for in-flight device work before surfaces are rebuilt.
    fn wait_idle(&mut self) {}
}

pub type EncoderFactory = Box<dyn Fn(u32, u32) -> Box<dyn VideoEncoder> + Send>;

/// Swapchain that keeps the last presented frame in memory.
#[derive(Debug, Default)]
pub struct OffscreenSwapchain {
    width: u32,
    height: u32,
    last_frame: Option<Vec<u8>>,
    presented: u64,
    pending_events: Vec<ServerEvent>,
    close_requested: bool,
}

impl OffscreenSwapchain {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    pub fn last_frame(&self) -> Option<&[u8]> {
        self.last_frame.as_deref()
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn push_event(&mut self, event: ServerEvent) {
        self.pending_events.push(event);
    }

    pub fn request_close(&mut self) {
        self.close_requested = true;
    }
}

impl Swapchain for OffscreenSwapchain {
    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    fn present(&mut self, frame: &Texture, _vsync: bool) -> Result<()> {
        self.last_frame = Some(frame.as_bytes().to_vec());
        self.presented += 1;
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<ServerEvent> {
        std::mem::take(&mut self.pending_events)
    }

    fn should_close(&self) -> bool {
        self.close_requested
    }
}

/// Writes an RGBA8 texture as PNG.
pub fn save_png(texture: &Texture, path: &Path) -> Result<()> {
    if texture.format() != TextureFormat::Rgba8Unorm {
        return Err(ViewerError::CaptureFormat);
    }
    let image = image::RgbaImage::from_raw(texture.width(), texture.height(), texture.as_bytes().to_vec())
        .ok_or(ViewerError::CaptureFormat)?;
    image.save(path)?;
    Ok(())
}

/// Per-frame host: input, camera, scene render, GUI composition, presentation and streaming.
pub struct Viewport {
    settings: RenderSettings,
    width: u32,
    height: u32,
    camera: Camera,
    controller: CameraController,
    input: InputState,
    swapchain: Option<Box<dyn Swapchain>>,
    gui: Vec<Box<dyn GuiInstance>>,
    encoder: Option<Box<dyn VideoEncoder>>,
    encoder_factory: EncoderFactory,
    output: StreamOutput,
    resolved_port: Arc<AtomicI32>,
    frame_id: u64,
    capture_path: Option<PathBuf>,
}

impl Viewport {
    /// `resolved_port` receives the bound server port once streaming starts.
    pub fn new(settings: RenderSettings, resolved_port: Arc<AtomicI32>) -> Self {
        let mut camera = Camera::new(settings.camera_state, settings.camera_config);
        settings.apply_projection(&mut camera.config);
        Self {
            width: settings.width.max(1),
            height: settings.height.max(1),
            settings,
            camera,
            controller: CameraController::new(),
            input: InputState::new(),
            swapchain: None,
            gui: Vec::new(),
            encoder: None,
            encoder_factory: Box::new(|width: u32, height: u32| -> Box<dyn VideoEncoder> {
                Box::new(RawNv12Encoder::new(width, height))
            }),
            output: StreamOutput::new(),
            resolved_port,
            frame_id: 0,
            capture_path: None,
        }
    }

    pub fn with_swapchain(mut self, swapchain: Box<dyn Swapchain>) -> Self {
        self.swapchain = Some(swapchain);
        self
    }

    pub fn with_encoder_factory(mut self, factory: EncoderFactory) -> Self {
        self.encoder_factory = factory;
        self
    }

    pub fn add_gui(&mut self, gui: Box<dyn GuiInstance>) {
        self.gui.push(gui);
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut RenderSettings {
        &mut self.settings
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn is_encoding(&self) -> bool {
        self.encoder.is_some()
    }

    pub fn output(&self) -> &StreamOutput {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut StreamOutput {
        &mut self.output
    }

    /// Replaces the live camera pose, as pushed from a GUI or the embedding API.
    pub fn sync_camera(&mut self, state: CameraState) {
        self.camera.state = state;
        self.settings.camera_state = state;
    }

    /// Replaces pose and projection. The projection flags of the settings follow the new config.
    pub fn set_camera(&mut self, camera: Camera) {
        self.settings.is_projection_rh = camera.config.is_projection_rh;
        self.settings.is_orthographic = camera.config.is_orthographic;
        self.settings.is_reverse_z = camera.config.is_reverse_z;
        self.settings.camera_config = camera.config;
        self.camera.config = camera.config;
        self.sync_camera(camera.state);
    }

    /// Saves the next composited frame to `path`.
    pub fn request_capture(&mut self, path: impl Into<PathBuf>) {
        self.capture_path = Some(path.into());
    }

    /// Runs one frame. Returns false once the window asked to close.
    pub fn update(&mut self, renderer: &mut dyn FrameRenderer, external_active_count: &dyn Fn() -> i32) -> bool {
        self.apply_resize(renderer);
        self.update_camera();

        for gui in &mut self.gui {
            gui.update(&self.input, self.width, self.height);
        }

        self.ensure_encoder();

        let frame = match self.compose(renderer) {
            Ok(frame) => frame,
            Err(err) => {
                error!("Frame composition failed: {err}");
                Texture::new(TextureFormat::Rgba8Unorm, self.width, self.height)
            }
        };

        if let Some(path) = self.capture_path.take() {
            match save_png(&frame, &path) {
                Ok(()) => info!("Saved frame capture to {}", path.display()),
                Err(err) => error!("Failed to save frame capture to {}: {err}", path.display()),
            }
        }

        if let Some(swapchain) = &mut self.swapchain {
            if let Err(err) = swapchain.present(&frame, self.settings.vsync) {
                warn!("Present failed: {err}");
            }
        }
        self.present_encoder(&frame);
        self.frame_id += 1;

        if self.swapchain.is_none() && self.encoder.is_none() {
            std::thread::sleep(FRAME_PACING);
        }

        self.poll_events(external_active_count);

        match &self.swapchain {
            Some(swapchain) if swapchain.should_close() => {
                info!("Viewport window closed.");
                false
            }
            _ => true,
        }
    }

    fn apply_resize(&mut self, renderer: &mut dyn FrameRenderer) {
        if self.settings.resolution_mode == ResolutionMode::FitClient {
            if let Some((width, height)) = self.input.take_resize() {
                self.settings.width = width;
                self.settings.height = height;
            }
        } else {
            self.input.take_resize();
        }

        let requested = (self.settings.width.max(1), self.settings.height.max(1));
        if requested == (self.width, self.height) {
            return;
        }
        renderer.wait_idle();
        self.encoder = None;
        (self.width, self.height) = requested;
        if let Some(swapchain) = &mut self.swapchain {
            swapchain.resize(self.width, self.height);
        }
        info!("Viewport resized to {}x{}", self.width, self.height);
    }

    fn update_camera(&mut self) {
        if self.settings.sync_camera {
            self.settings.sync_camera = false;
            self.camera.state = self.settings.camera_state;
        }
        self.settings.apply_projection(&mut self.camera.config);
        if self.controller.update(&mut self.camera.state, &mut self.input, FRAME_DELTA) {
            self.settings.camera_state = self.camera.state;
        }
    }

    fn ensure_encoder(&mut self) {
        if !self.settings.enable_encoder {
            self.encoder = None;
            return;
        }
        if self.encoder.is_some() {
            return;
        }

        if self.output.server().is_none() {
            match self.output.start_server(&self.settings.server_config()) {
                Ok(port) => self.resolved_port.store(port as i32, Ordering::Release),
                Err(err) => {
                    error!("Failed to create server: {err}");
                    self.settings.enable_encoder = false;
                    return;
                }
            }
        }
        self.encoder = Some((self.encoder_factory)(self.width, self.height));
        info!("Encoder created at {}x{}", self.width, self.height);
    }

    fn compose(&mut self, renderer: &mut dyn FrameRenderer) -> Result<Texture> {
        let mut front = Texture::new(TextureFormat::Rgba8Unorm, self.width, self.height);
        renderer.render(&mut front, &self.camera);
        for gui in &mut self.gui {
            let mut back = Texture::new(TextureFormat::Rgba8Unorm, self.width, self.height);
            gui.render(&front, &mut back)?;
            front = back;
        }
        Ok(front)
    }

    fn present_encoder(&mut self, frame: &Texture) {
        let stream_to_file = self.settings.stream_to_file && self.encoder.is_some();
        if let Err(err) = self.output.set_stream_to_file(stream_to_file, &self.settings.encode_filename) {
            error!("Failed to toggle stream file: {err}");
            self.settings.stream_to_file = false;
        }

        let Some(encoder) = &mut self.encoder else {
            return;
        };
        let encoded = encoder
            .front_surface()
            .copy_from_rgba(frame)
            .and_then(|()| encoder.present(self.frame_id));
        if let Err(err) = encoded {
            error!("Encoding failed, streaming stopped: {err}");
            self.encoder = None;
            self.output.stop_server();
            self.settings.enable_encoder = false;
            return;
        }
        if let Err(err) = self.output.push(encoder.map_data(), encoder.width(), encoder.height()) {
            warn!("Stream output error: {err}");
        }
    }

    fn poll_events(&mut self, external_active_count: &dyn Fn() -> i32) {
        if let Some(swapchain) = &mut self.swapchain {
            for event in swapchain.poll_events() {
                self.input.apply(&event, self.width, self.height);
            }
        }

        let Some(server) = self.output.server() else {
            return;
        };
        while let Some(event) = server.pop_event() {
            if event == ServerEvent::Inactive {
                // a local window keeps the loop alive on its own
                if self.swapchain.is_none() {
                    server.wait_until_active(external_active_count);
                }
                break;
            }
            self.input.apply(&event, self.width, self.height);
        }
    }
}

impl Drop for Viewport {
    fn drop(&mut self) {
        self.encoder = None;
        self.output.stop_server();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::RESOLVED_PORT_UNRESOLVED;
    use std::sync::atomic::AtomicUsize;

    struct SolidRenderer {
        color: [u8; 4],
        frames: usize,
        idle_waits: usize,
    }

    impl FrameRenderer for SolidRenderer {
        fn render(&mut self, background: &mut Texture, _camera: &Camera) {
            background.fill(&self.color);
            self.frames += 1;
        }

        fn wait_idle(&mut self) {
            self.idle_waits += 1;
        }
    }

    struct InvertGui;

    impl GuiInstance for InvertGui {
        fn update(&mut self, _input: &InputState, _width: u32, _height: u32) {}

        fn render(&mut self, front: &Texture, back: &mut Texture) -> Result<()> {
            for (dst, src) in back.as_bytes_mut().iter_mut().zip(front.as_bytes()) {
                *dst = 255 - src;
            }
            Ok(())
        }
    }

    fn small_settings() -> RenderSettings {
        RenderSettings {
            width: 8,
            height: 4,
            ..Default::default()
        }
    }

    fn renderer() -> SolidRenderer {
        SolidRenderer {
            color: [10, 20, 30, 255],
            frames: 0,
            idle_waits: 0,
        }
    }

    #[test]
    fn gui_layers_compose_over_scene() {
        let port = Arc::new(AtomicI32::new(RESOLVED_PORT_UNRESOLVED));
        let mut viewport = Viewport::new(small_settings(), port);
        viewport.add_gui(Box::new(InvertGui));

        let mut renderer = renderer();
        let dir = tempfile::tempdir().unwrap();
        let capture = dir.path().join("frame.png");
        viewport.request_capture(&capture);
        assert!(viewport.update(&mut renderer, &|| 0));

        let image = image::open(&capture).unwrap().to_rgba8();
        assert_eq!(image.dimensions(), (8, 4));
        assert_eq!(image.get_pixel(0, 0).0, [245, 235, 225, 0]);
        assert_eq!(renderer.frames, 1);
        assert_eq!(viewport.frame_id(), 1);
    }

    #[test]
    fn resize_rebuilds_surfaces() {
        let port = Arc::new(AtomicI32::new(RESOLVED_PORT_UNRESOLVED));
        let mut viewport =
            Viewport::new(small_settings(), port).with_swapchain(Box::new(OffscreenSwapchain::new(8, 4)));
        let mut renderer = renderer();
        viewport.update(&mut renderer, &|| 0);
        assert_eq!(renderer.idle_waits, 0);

        viewport.settings_mut().width = 16;
        viewport.update(&mut renderer, &|| 0);
        assert_eq!(renderer.idle_waits, 1);
        assert_eq!(viewport.size(), (16, 4));
    }

    #[test]
    fn fit_client_follows_remote_resize() {
        let port = Arc::new(AtomicI32::new(RESOLVED_PORT_UNRESOLVED));
        let mut swapchain = OffscreenSwapchain::new(8, 4);
        swapchain.push_event(ServerEvent::Resize { width: 32, height: 16 });
        let mut settings = small_settings();
        settings.resolution_mode = ResolutionMode::FitClient;
        let mut viewport = Viewport::new(settings, port).with_swapchain(Box::new(swapchain));

        let mut renderer = renderer();
        viewport.update(&mut renderer, &|| 0);
        viewport.update(&mut renderer, &|| 0);
        assert_eq!(viewport.size(), (32, 16));
    }

    #[test]
    fn encoder_starts_server_and_publishes_port() {
        let port = Arc::new(AtomicI32::new(RESOLVED_PORT_UNRESOLVED));
        let mut settings = small_settings();
        settings.enable_encoder = true;
        settings.server_port = 0;
        settings.server_create_max_attempts = 1;
        let mut viewport = Viewport::new(settings, port.clone())
            .with_swapchain(Box::new(OffscreenSwapchain::new(8, 4)));

        let mut renderer = renderer();
        assert!(viewport.update(&mut renderer, &|| 0));
        assert!(viewport.is_encoding());
        let bound = port.load(Ordering::Acquire);
        assert!(bound > 0);
        assert_eq!(viewport.output().server().map(|s| s.port() as i32), Some(bound));
    }

    #[test]
    fn stream_to_file_writes_encoded_frames() {
        let dir = tempfile::tempdir().unwrap();
        let port = Arc::new(AtomicI32::new(RESOLVED_PORT_UNRESOLVED));
        let mut settings = small_settings();
        settings.enable_encoder = true;
        settings.stream_to_file = true;
        settings.server_port = 0;
        settings.server_create_max_attempts = 1;
        settings.encode_filename = dir.path().join("capture_stream");
        let mut viewport =
            Viewport::new(settings, port).with_swapchain(Box::new(OffscreenSwapchain::new(8, 4)));

        let mut renderer = renderer();
        viewport.update(&mut renderer, &|| 0);
        viewport.update(&mut renderer, &|| 0);
        viewport.settings_mut().stream_to_file = false;
        viewport.update(&mut renderer, &|| 0);

        let written = std::fs::read(dir.path().join("capture_stream.h264")).unwrap();
        let frames = written.windows(4).filter(|w| *w == [0, 0, 0, 1]).count();
        assert_eq!(frames, 2);
    }

    /// Raw encoder that tracks how many instances are alive and how many frames it encoded.
    struct CountedEncoder {
        inner: RawNv12Encoder,
        live: Arc<AtomicUsize>,
        encoded: Arc<AtomicUsize>,
    }

    impl VideoEncoder for CountedEncoder {
        fn width(&self) -> u32 {
            self.inner.width()
        }
        fn height(&self) -> u32 {
            self.inner.height()
        }
        fn front_surface(&mut self) -> &mut backend::Nv12Surface {
            self.inner.front_surface()
        }
        fn present(&mut self, frame_id: u64) -> backend::Result<()> {
            self.encoded.fetch_add(1, Ordering::AcqRel);
            self.inner.present(frame_id)
        }
        fn map_data(&self) -> &[u8] {
            self.inner.map_data()
        }
    }

    impl Drop for CountedEncoder {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::AcqRel);
        }
    }

    #[test]
    fn encoder_toggle_releases_surfaces_and_keeps_cadence() {
        let live = Arc::new(AtomicUsize::new(0));
        let encoded = Arc::new(AtomicUsize::new(0));
        let factory: EncoderFactory = {
            let (live, encoded) = (live.clone(), encoded.clone());
            Box::new(move |width: u32, height: u32| -> Box<dyn VideoEncoder> {
                live.fetch_add(1, Ordering::AcqRel);
                Box::new(CountedEncoder {
                    inner: RawNv12Encoder::new(width, height),
                    live: live.clone(),
                    encoded: encoded.clone(),
                })
            })
        };
        let port = Arc::new(AtomicI32::new(RESOLVED_PORT_UNRESOLVED));
        let mut settings = small_settings();
        settings.server_port = 0;
        settings.server_create_max_attempts = 1;
        let mut viewport = Viewport::new(settings, port)
            .with_swapchain(Box::new(OffscreenSwapchain::new(8, 4)))
            .with_encoder_factory(factory);
        let mut renderer = renderer();

        for _ in 0..3 {
            assert!(viewport.update(&mut renderer, &|| 0));
        }
        assert!(!viewport.is_encoding());
        assert_eq!(live.load(Ordering::Acquire), 0);

        viewport.settings_mut().enable_encoder = true;
        for _ in 0..4 {
            assert!(viewport.update(&mut renderer, &|| 0));
            assert_eq!(live.load(Ordering::Acquire), 1);
        }
        assert!(viewport.is_encoding());

        viewport.settings_mut().enable_encoder = false;
        for _ in 0..3 {
            assert!(viewport.update(&mut renderer, &|| 0));
        }
        assert!(!viewport.is_encoding());
        assert_eq!(live.load(Ordering::Acquire), 0);

        // one rendered frame per update, encoded only while enabled
        assert_eq!(renderer.frames, 10);
        assert_eq!(viewport.frame_id(), 10);
        assert!(encoded.load(Ordering::Acquire).abs_diff(4) <= 1);
    }

    #[test]
    fn window_close_ends_loop() {
        struct Closing;
        impl Swapchain for Closing {
            fn resize(&mut self, _width: u32, _height: u32) {}
            fn present(&mut self, _frame: &Texture, _vsync: bool) -> Result<()> {
                Ok(())
            }
            fn poll_events(&mut self) -> Vec<ServerEvent> {
                Vec::new()
            }
            fn should_close(&self) -> bool {
                true
            }
        }

        let port = Arc::new(AtomicI32::new(RESOLVED_PORT_UNRESOLVED));
        let mut viewport = Viewport::new(small_settings(), port).with_swapchain(Box::new(Closing));
        assert!(!viewport.update(&mut renderer(), &|| 0));
    }
}
