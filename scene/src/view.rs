use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use compute::{ComputeArray, GaussianData};
use token::{Token, TokenTable};
use tracing::debug;

use crate::{Camera, CameraConfig, CameraState, CameraView, Result, SceneError};

pub const DEFAULT_SCENE_NAME: &str = "<default>";
pub const VIEWPORT_CAMERA_NAME: &str = "Viewport Camera";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    NanoVdb,
    Gaussian,
    Camera,
}

/// Insertion-ordered name -> non-owning handle map.
struct ViewMap<T> {
    entries: Vec<(Token, Weak<T>)>,
}

impl<T> Default for ViewMap<T> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<T> ViewMap<T> {
    fn insert(&mut self, name: Token, value: &Arc<T>) {
        let weak = Arc::downgrade(value);
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = weak,
            None => self.entries.push((name, weak)),
        }
    }

    fn get(&self, name: &Token) -> Option<Arc<T>> {
        self.entries.iter().find(|(n, _)| n == name).and_then(|(_, w)| w.upgrade())
    }

    fn contains(&self, name: &Token) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    fn remove(&mut self, name: &Token) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| n != name);
        before != self.entries.len()
    }

    fn names(&self) -> Vec<Token> {
        self.entries.iter().map(|(n, _)| n.clone()).collect()
    }

    fn first(&self) -> Option<Token> {
        self.entries.first().map(|(n, _)| n.clone())
    }
}

struct SceneViewData {
    scene: Token,
    cameras: ViewMap<CameraView>,
    gaussians: ViewMap<GaussianData>,
    nanovdbs: ViewMap<ComputeArray>,
    default_camera: Arc<CameraView>,
    current_view: Option<Token>,
    last_added_view: Option<Token>,
    epoch: Arc<AtomicU64>,
    unnamed_counter: usize,
}

impl SceneViewData {
    fn new(scene: Token, viewport_camera: &Token, is_y_up: bool) -> Self {
        let default_camera = Arc::new(CameraView::single(Camera::new(
            CameraState::default_for(is_y_up),
            CameraConfig::default(),
        )));
        let mut cameras = ViewMap::default();
        cameras.insert(viewport_camera.clone(), &default_camera);
        Self {
            scene,
            cameras,
            gaussians: ViewMap::default(),
            nanovdbs: ViewMap::default(),
            default_camera,
            current_view: None,
            last_added_view: None,
            epoch: Arc::new(AtomicU64::new(0)),
            unnamed_counter: 0,
        }
    }

    fn set_view(&mut self, view: Option<Token>) {
        self.current_view = view;
        self.epoch.fetch_add(1, Ordering::Release);
    }

    fn kind_of(&self, name: &Token) -> Option<ViewKind> {
        if self.nanovdbs.contains(name) {
            Some(ViewKind::NanoVdb)
        } else if self.gaussians.contains(name) {
            Some(ViewKind::Gaussian)
        } else if self.cameras.contains(name) {
            Some(ViewKind::Camera)
        } else {
            None
        }
    }

    fn fallback_view(&self) -> Option<Token> {
        self.nanovdbs.first().or_else(|| self.gaussians.first())
    }
}

struct State {
    scenes: BTreeMap<u64, SceneViewData>,
    current_scene: Option<Token>,
    is_y_up: bool,
}

/// Per-scene indices of what can be shown, plus which view each scene is showing.
///
/// Holds no ownership; entries whose data was dropped upgrade to `None`.
pub struct SceneView {
    tokens: Arc<TokenTable>,
    default_scene: Token,
    viewport_camera: Token,
    state: Mutex<State>,
}

impl SceneView {
    pub fn new(tokens: Arc<TokenTable>) -> Self {
        let default_scene = tokens.get_or_create(DEFAULT_SCENE_NAME);
        let viewport_camera = tokens.get_or_create(VIEWPORT_CAMERA_NAME);
        Self {
            tokens,
            default_scene,
            viewport_camera,
            state: Mutex::new(State {
                scenes: BTreeMap::new(),
                current_scene: None,
                is_y_up: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn scene_or_default<'a>(&'a self, scene: Option<&'a Token>) -> &'a Token {
        scene.unwrap_or(&self.default_scene)
    }

    fn with_scene_mut<R>(&self, scene: Option<&Token>, f: impl FnOnce(&mut SceneViewData) -> R) -> R {
        let scene = self.scene_or_default(scene).clone();
        let mut state = self.lock();
        let is_y_up = state.is_y_up;
        let data = state
            .scenes
            .entry(scene.id())
            .or_insert_with(|| SceneViewData::new(scene.clone(), &self.viewport_camera, is_y_up));
        f(data)
    }

    fn with_scene<R>(&self, scene: Option<&Token>, f: impl FnOnce(&SceneViewData) -> R) -> Option<R> {
        let scene = self.scene_or_default(scene);
        self.lock().scenes.get(&scene.id()).map(f)
    }

    pub fn tokens(&self) -> &Arc<TokenTable> {
        &self.tokens
    }

    pub fn default_scene(&self) -> &Token {
        &self.default_scene
    }

    pub fn viewport_camera_token(&self) -> &Token {
        &self.viewport_camera
    }

    /// Up axis used for default cameras of scenes created from now on.
    pub fn set_y_up(&self, is_y_up: bool) {
        self.lock().is_y_up = is_y_up;
    }

    /// Creates the scene's view data on first use.
    pub fn get_or_create_scene(&self, scene: &Token) {
        self.with_scene_mut(Some(scene), |_| ());
    }

    pub fn has_scene(&self, scene: &Token) -> bool {
        self.lock().scenes.contains_key(&scene.id())
    }

    pub fn has_scenes(&self) -> bool {
        !self.lock().scenes.is_empty()
    }

    pub fn scenes(&self) -> Vec<Token> {
        self.lock().scenes.values().map(|d| d.scene.clone()).collect()
    }

    pub fn current_scene(&self) -> Token {
        self.lock().current_scene.clone().unwrap_or_else(|| self.default_scene.clone())
    }

    /// Switches scenes. A scene with nothing selected picks its most recently added view.
    pub fn set_current_scene(&self, scene: &Token) {
        self.get_or_create_scene(scene);
        let mut state = self.lock();
        state.current_scene = Some(scene.clone());
        if let Some(data) = state.scenes.get_mut(&scene.id()) {
            if data.current_view.is_none() {
                if let Some(last) = data.last_added_view.clone() {
                    data.set_view(Some(last));
                }
            }
        }
    }

    pub fn add_nanovdb(&self, scene: Option<&Token>, name: &Token, array: &Arc<ComputeArray>) {
        self.with_scene_mut(scene, |d| {
            d.nanovdbs.insert(name.clone(), array);
            d.last_added_view = Some(name.clone());
        });
    }

    pub fn add_gaussian(&self, scene: Option<&Token>, name: &Token, data: &Arc<GaussianData>) {
        self.with_scene_mut(scene, |d| {
            d.gaussians.insert(name.clone(), data);
            d.last_added_view = Some(name.clone());
        });
    }

    pub fn add_camera(&self, scene: Option<&Token>, name: &Token, camera: &Arc<CameraView>) {
        self.with_scene_mut(scene, |d| d.cameras.insert(name.clone(), camera));
    }

    /// Indexes `array` and selects it. Without a name the file stem is used, else `nanovdb_<n>`.
    pub fn add_nanovdb_view(&self, scene: Option<&Token>, name: Option<&Token>, array: &Arc<ComputeArray>) -> Token {
        self.with_scene_mut(scene, |d| {
            let name = match name {
                Some(name) => name.clone(),
                None => {
                    let stem = array
                        .filepath()
                        .and_then(|p| p.file_stem())
                        .map(|s| s.to_string_lossy().into_owned())
                        .filter(|s| !s.is_empty());
                    let label = stem.unwrap_or_else(|| {
                        let label = format!("nanovdb_{}", d.unnamed_counter);
                        d.unnamed_counter += 1;
                        label
                    });
                    self.tokens.get_or_create(&label)
                }
            };
            d.nanovdbs.insert(name.clone(), array);
            d.last_added_view = Some(name.clone());
            d.set_view(Some(name.clone()));
            debug!("Showing nanovdb view '{}' in scene '{}'", name, d.scene);
            name
        })
    }

    /// Indexes `data` and selects it.
    pub fn add_gaussian_view(&self, scene: Option<&Token>, name: &Token, data: &Arc<GaussianData>) {
        self.with_scene_mut(scene, |d| {
            d.gaussians.insert(name.clone(), data);
            d.last_added_view = Some(name.clone());
            d.set_view(Some(name.clone()));
            debug!("Showing gaussian view '{}' in scene '{}'", name, d.scene);
        });
    }

    pub fn nanovdb(&self, scene: Option<&Token>, name: &Token) -> Option<Arc<ComputeArray>> {
        self.with_scene(scene, |d| d.nanovdbs.get(name)).flatten()
    }

    pub fn gaussian(&self, scene: Option<&Token>, name: &Token) -> Option<Arc<GaussianData>> {
        self.with_scene(scene, |d| d.gaussians.get(name)).flatten()
    }

    pub fn camera(&self, scene: Option<&Token>, name: &Token) -> Option<Arc<CameraView>> {
        self.with_scene(scene, |d| d.cameras.get(name)).flatten()
    }

    pub fn nanovdb_names(&self, scene: Option<&Token>) -> Vec<Token> {
        self.with_scene(scene, |d| d.nanovdbs.names()).unwrap_or_default()
    }

    pub fn gaussian_names(&self, scene: Option<&Token>) -> Vec<Token> {
        self.with_scene(scene, |d| d.gaussians.names()).unwrap_or_default()
    }

    /// Camera names; the viewport camera comes first.
    pub fn camera_names(&self, scene: Option<&Token>) -> Vec<Token> {
        self.with_scene(scene, |d| d.cameras.names()).unwrap_or_default()
    }

    pub fn view_kind(&self, scene: Option<&Token>, name: &Token) -> Option<ViewKind> {
        self.with_scene(scene, |d| d.kind_of(name)).flatten()
    }

    pub fn default_camera(&self, scene: Option<&Token>) -> Arc<CameraView> {
        self.with_scene_mut(scene, |d| d.default_camera.clone())
    }

    pub fn set_current_view(&self, scene: Option<&Token>, view: Option<&Token>) {
        self.with_scene_mut(scene, |d| d.set_view(view.cloned()));
    }

    pub fn current_view(&self, scene: Option<&Token>) -> Option<Token> {
        self.with_scene(scene, |d| d.current_view.clone()).flatten()
    }

    pub fn current_view_epoch(&self, scene: Option<&Token>) -> u64 {
        self.with_scene(scene, |d| d.epoch.load(Ordering::Acquire)).unwrap_or(0)
    }

    /// Shared epoch counter so the viewport can poll for view changes without locking.
    pub fn epoch_handle(&self, scene: Option<&Token>) -> Arc<AtomicU64> {
        self.with_scene_mut(scene, |d| d.epoch.clone())
    }

    /// Drops `name` from every map of the scene. When it was the current view, the first
    /// nanovdb view is selected instead, else the first gaussian view, else nothing.
    pub fn remove_and_fix_current(&self, scene: Option<&Token>, name: &Token) -> bool {
        let mut state = self.lock();
        let scene = self.scene_or_default(scene);
        let Some(data) = state.scenes.get_mut(&scene.id()) else {
            return false;
        };
        let mut removed = data.nanovdbs.remove(name);
        removed |= data.gaussians.remove(name);
        if *name != self.viewport_camera {
            removed |= data.cameras.remove(name);
        }
        if data.last_added_view.as_ref() == Some(name) {
            data.last_added_view = None;
        }
        if removed && data.current_view.as_ref() == Some(name) {
            let fallback = data.fallback_view();
            debug!("View '{}' removed, falling back to {:?}", name, fallback.as_ref().map(Token::as_str));
            data.set_view(fallback);
        }
        removed
    }

    /// Forgets the scene entirely. If it was current, the first remaining scene becomes current.
    pub fn remove_scene(&self, scene: &Token) -> Result<()> {
        let mut state = self.lock();
        if state.scenes.remove(&scene.id()).is_none() {
            return Err(SceneError::SceneNotFound(scene.to_string()));
        }
        if state.current_scene.as_ref() == Some(scene) || state.current_scene.is_none() {
            state.current_scene = state.scenes.values().next().map(|d| d.scene.clone());
        }
        debug!("Removed scene '{}'", scene);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compute::GaussianDataDesc;

    fn view() -> SceneView {
        SceneView::new(Arc::new(TokenTable::new()))
    }

    fn gaussians(count: usize) -> Arc<GaussianData> {
        let desc = GaussianDataDesc {
            means: Some(ComputeArray::from_slice(&vec![0.0f32; count * 3])),
            ..Default::default()
        };
        Arc::new(GaussianData::from_desc(desc).unwrap())
    }

    #[test]
    fn viewport_camera_is_first() {
        let view = view();
        let scene = view.tokens().get_or_create("S");
        view.get_or_create_scene(&scene);
        let cam = view.tokens().get_or_create("cam");
        let camera = Arc::new(CameraView::default());
        view.add_camera(Some(&scene), &cam, &camera);
        let names = view.camera_names(Some(&scene));
        assert_eq!(names[0].as_str(), VIEWPORT_CAMERA_NAME);
        assert_eq!(names[1], cam);

        let default = view.default_camera(Some(&scene));
        let viewport = view.camera(Some(&scene), view.viewport_camera_token()).unwrap();
        assert!(Arc::ptr_eq(&default, &viewport));
    }

    #[test]
    fn unnamed_nanovdb_views() {
        let view = view();
        let from_file = Arc::new(ComputeArray::new(1, 8).with_filepath("data/smoke.nvdb"));
        let anonymous = Arc::new(ComputeArray::new(1, 8));
        assert_eq!(view.add_nanovdb_view(None, None, &from_file).as_str(), "smoke");
        assert_eq!(view.add_nanovdb_view(None, None, &anonymous).as_str(), "nanovdb_0");
        assert_eq!(view.current_view(None).unwrap().as_str(), "nanovdb_0");
        assert_eq!(view.current_view_epoch(None), 2);
    }

    #[test]
    fn epoch_bumps_on_every_selection() {
        let view = view();
        let scene = view.tokens().get_or_create("S");
        let epoch = view.epoch_handle(Some(&scene));
        let name = view.tokens().get_or_create("G");
        view.set_current_view(Some(&scene), Some(&name));
        view.set_current_view(Some(&scene), Some(&name));
        assert_eq!(epoch.load(Ordering::Acquire), 2);
        assert_eq!(view.current_view_epoch(Some(&scene)), 2);
    }

    #[test]
    fn epoch_publishes_selection_across_threads() {
        let view = view();
        let scene = view.tokens().get_or_create("S");
        let epoch = view.epoch_handle(Some(&scene));
        let names: Vec<Token> = (0..50).map(|i| view.tokens().get_or_create(&format!("v{i}"))).collect();

        std::thread::scope(|s| {
            s.spawn(|| {
                for name in &names {
                    view.set_current_view(Some(&scene), Some(name));
                }
            });
            let mut seen = 0;
            while seen < names.len() as u64 {
                let now = epoch.load(Ordering::Acquire);
                if now > seen {
                    // the view stored before the bump is at least as new as the epoch says
                    let current = view.current_view(Some(&scene)).unwrap();
                    let index = names.iter().position(|n| *n == current).unwrap() as u64;
                    assert!(index + 1 >= now);
                    seen = now;
                }
                std::thread::yield_now();
            }
        });
        assert_eq!(view.current_view_epoch(Some(&scene)), names.len() as u64);
    }

    #[test]
    fn views_do_not_own_data() {
        let view = view();
        let name = view.tokens().get_or_create("G");
        let data = gaussians(2);
        view.add_gaussian_view(None, &name, &data);
        assert!(view.gaussian(None, &name).is_some());
        drop(data);
        assert!(view.gaussian(None, &name).is_none());
        assert_eq!(view.gaussian_names(None), vec![name]);
    }

    #[test]
    fn removing_current_prefers_nanovdb() {
        let view = view();
        let scene = view.tokens().get_or_create("S");
        let vol = view.tokens().get_or_create("vol");
        let g1 = view.tokens().get_or_create("g1");
        let g2 = view.tokens().get_or_create("g2");
        let array = Arc::new(ComputeArray::new(1, 8));
        let (d1, d2) = (gaussians(1), gaussians(1));

        view.add_gaussian_view(Some(&scene), &g1, &d1);
        view.add_nanovdb(Some(&scene), &vol, &array);
        view.add_gaussian_view(Some(&scene), &g2, &d2);
        assert_eq!(view.current_view(Some(&scene)), Some(g2.clone()));

        assert!(view.remove_and_fix_current(Some(&scene), &g2));
        assert_eq!(view.current_view(Some(&scene)), Some(vol.clone()));
        assert!(view.remove_and_fix_current(Some(&scene), &vol));
        assert_eq!(view.current_view(Some(&scene)), Some(g1.clone()));
        assert!(view.remove_and_fix_current(Some(&scene), &g1));
        assert_eq!(view.current_view(Some(&scene)), None);
        assert!(!view.remove_and_fix_current(Some(&scene), &g1));

        // The viewport camera cannot be removed.
        assert!(!view.remove_and_fix_current(Some(&scene), &view.viewport_camera_token().clone()));
    }

    #[test]
    fn removing_scene_rebinds_current() {
        let view = view();
        let a = view.tokens().get_or_create("A");
        let b = view.tokens().get_or_create("B");
        view.get_or_create_scene(&a);
        view.set_current_scene(&b);
        assert_eq!(view.current_scene(), b);
        view.remove_scene(&b).unwrap();
        assert_eq!(view.current_scene(), a);
        assert!(matches!(view.remove_scene(&b), Err(SceneError::SceneNotFound(_))));
        assert_eq!(view.scenes(), vec![a]);
    }

    #[test]
    fn switching_scene_selects_last_added() {
        let view = view();
        let scene = view.tokens().get_or_create("S");
        let name = view.tokens().get_or_create("G");
        let data = gaussians(1);
        view.add_gaussian(Some(&scene), &name, &data);
        assert_eq!(view.current_view(Some(&scene)), None);
        view.set_current_scene(&scene);
        assert_eq!(view.current_view(Some(&scene)), Some(name));
    }
}
