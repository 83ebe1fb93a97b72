use glam::{Mat4, Vec3};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// JSON has no infinity; an infinite far plane is written as null.
mod infinite_f32 {
    use super::*;

    pub fn serialize<S: Serializer>(value: &f32, s: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            s.serialize_f32(*value)
        } else {
            s.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f32, D::Error> {
        Ok(Option::<f32>::deserialize(d)?.unwrap_or(f32::INFINITY))
    }
}

/// Orbit-style camera pose. The eye sits `eye_distance_from_position` behind `position`
/// along `eye_direction`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraState {
    pub position: Vec3,
    pub eye_direction: Vec3,
    pub eye_up: Vec3,
    pub eye_distance_from_position: f32,
    pub orthographic_scale: f32,
}

impl Default for CameraState {
    fn default() -> Self {
        Self::default_for(false)
    }
}

impl CameraState {
    pub fn default_for(is_y_up: bool) -> Self {
        let (eye_direction, eye_up) = if is_y_up {
            (Vec3::new(0.0, -0.7, 0.7).normalize(), Vec3::Y)
        } else {
            (Vec3::new(0.0, 0.7, 0.7).normalize(), Vec3::Z)
        };
        Self {
            position: Vec3::ZERO,
            eye_direction,
            eye_up,
            eye_distance_from_position: 10.0,
            orthographic_scale: 1.0,
        }
    }

    /// Camera at `eye` looking at `target`.
    pub fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Self {
        let offset = target - eye;
        Self {
            position: target,
            eye_direction: offset.normalize_or(Vec3::Z),
            eye_up: up,
            eye_distance_from_position: offset.length(),
            orthographic_scale: 1.0,
        }
    }

    pub fn eye_position(&self) -> Vec3 {
        self.position - self.eye_direction.normalize_or(Vec3::Z) * self.eye_distance_from_position
    }

    pub fn view_matrix(&self, is_projection_rh: bool) -> Mat4 {
        let dir = self.eye_direction.normalize_or(Vec3::Z);
        if is_projection_rh {
            Mat4::look_to_rh(self.eye_position(), dir, self.eye_up)
        } else {
            Mat4::look_to_lh(self.eye_position(), dir, self.eye_up)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub is_projection_rh: bool,
    pub is_orthographic: bool,
    pub is_reverse_z: bool,
    pub near_plane: f32,
    #[serde(with = "infinite_f32")]
    pub far_plane: f32,
    pub fov_angle_y: f32,
    pub orthographic_y: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            is_projection_rh: true,
            is_orthographic: false,
            is_reverse_z: true,
            near_plane: 0.1,
            far_plane: f32::INFINITY,
            fov_angle_y: std::f32::consts::FRAC_PI_4,
            orthographic_y: 1.0,
        }
    }
}

impl CameraConfig {
    /// Far plane implied by the depth convention: infinite for reverse-Z perspective.
    pub fn default_far_plane(&self) -> f32 {
        if self.is_reverse_z && !self.is_orthographic {
            f32::INFINITY
        } else {
            10000.0
        }
    }

    pub fn projection_matrix(&self, aspect: f32, orthographic_scale: f32) -> Mat4 {
        let near = self.near_plane;
        let far = self.far_plane;
        if self.is_orthographic {
            let half_h = 0.5 * self.orthographic_y * orthographic_scale;
            let half_w = half_h * aspect;
            let far = if far.is_finite() { far } else { 10000.0 };
            let (z_near, z_far) = if self.is_reverse_z { (far, near) } else { (near, far) };
            return if self.is_projection_rh {
                Mat4::orthographic_rh(-half_w, half_w, -half_h, half_h, z_near, z_far)
            } else {
                Mat4::orthographic_lh(-half_w, half_w, -half_h, half_h, z_near, z_far)
            };
        }

        match (self.is_reverse_z, far.is_finite(), self.is_projection_rh) {
            (true, false, true) => Mat4::perspective_infinite_reverse_rh(self.fov_angle_y, aspect, near),
            (true, false, false) => Mat4::perspective_infinite_reverse_lh(self.fov_angle_y, aspect, near),
            (true, true, true) => Mat4::perspective_rh(self.fov_angle_y, aspect, far, near),
            (true, true, false) => Mat4::perspective_lh(self.fov_angle_y, aspect, far, near),
            (false, false, true) => Mat4::perspective_infinite_rh(self.fov_angle_y, aspect, near),
            (false, false, false) => Mat4::perspective_infinite_lh(self.fov_angle_y, aspect, near),
            (false, true, true) => Mat4::perspective_rh(self.fov_angle_y, aspect, near, far),
            (false, true, false) => Mat4::perspective_lh(self.fov_angle_y, aspect, near, far),
        }
    }
}

/// The camera driving a viewport: one pose plus its projection settings.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Camera {
    pub state: CameraState,
    pub config: CameraConfig,
}

impl Camera {
    pub fn new(state: CameraState, config: CameraConfig) -> Self {
        Self { state, config }
    }

    pub fn view_matrix(&self) -> Mat4 {
        self.state.view_matrix(self.config.is_projection_rh)
    }

    pub fn projection_matrix(&self, width: u32, height: u32) -> Mat4 {
        let aspect = width.max(1) as f32 / height.max(1) as f32;
        self.config.projection_matrix(aspect, self.state.orthographic_scale)
    }
}

/// A set of cameras stored as a scene object, shown as frusta in the viewport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraView {
    pub states: Vec<CameraState>,
    pub configs: Vec<CameraConfig>,
    pub frustum_scale: f32,
    pub frustum_color: [f32; 3],
    pub is_visible: bool,
}

impl Default for CameraView {
    fn default() -> Self {
        Self {
            states: Vec::new(),
            configs: Vec::new(),
            frustum_scale: 1.0,
            frustum_color: [1.0, 1.0, 0.0],
            is_visible: true,
        }
    }
}

impl CameraView {
    pub fn single(camera: Camera) -> Self {
        Self {
            states: vec![camera.state],
            configs: vec![camera.config],
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.states.len().min(self.configs.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn camera(&self, index: usize) -> Option<Camera> {
        Some(Camera::new(*self.states.get(index)?, *self.configs.get(index)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn look_at_places_eye() {
        let state = CameraState::look_at(Vec3::new(0.0, 0.0, -2.0), Vec3::ZERO, Vec3::Y);
        assert!(state.eye_position().abs_diff_eq(Vec3::new(0.0, 0.0, -2.0), 1e-6));
        let view = state.view_matrix(true);
        let origin = view * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!((origin.z + 2.0).abs() < 1e-5);
    }

    #[test]
    fn reverse_z_maps_near_to_one() {
        let config = CameraConfig::default();
        let proj = config.projection_matrix(1.0, 1.0);
        let p = proj * Vec4::new(0.0, 0.0, -config.near_plane, 1.0);
        assert!((p.z / p.w - 1.0).abs() < 1e-5);
    }

    #[test]
    fn settings_roundtrip_through_json() {
        let camera = Camera::default();
        let text = serde_json::to_string(&camera.state).unwrap();
        let back: CameraState = serde_json::from_str(&text).unwrap();
        assert_eq!(back, camera.state);
        let config = CameraConfig::default();
        let text = serde_json::to_string(&config).unwrap();
        let back: CameraConfig = serde_json::from_str(&text).unwrap();
        assert!(back.far_plane.is_infinite());
        let partial: CameraConfig = serde_json::from_str("{\"is_orthographic\": true}").unwrap();
        assert!(partial.is_orthographic && partial.is_projection_rh);
    }
}
