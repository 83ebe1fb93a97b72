use glam::{Quat, Vec2, Vec3};
use scene::CameraState;
use web_cmn::Key;

use crate::input::{InputState, MOUSE_LEFT, MOUSE_MIDDLE};

// Keeps the eye direction away from the up axis so the basis never degenerates.
const MIN_UP_ANGLE: f32 = 0.05;

/// Orbit camera driven by mouse drags, the wheel and WASD/QE keys.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraController {
    /// World units per second, scaled by the orbit distance.
    pub move_speed: f32,
    /// Radians per pixel of drag.
    pub rotate_speed: f32,
    /// Fractional distance change per wheel notch.
    pub zoom_speed: f32,
}

impl Default for CameraController {
    fn default() -> Self {
        Self {
            move_speed: 0.5,
            rotate_speed: 0.005,
            zoom_speed: 0.1,
        }
    }
}

impl CameraController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one frame of buffered input. Returns true when the camera moved.
    pub fn update(&self, state: &mut CameraState, input: &mut InputState, dt: f32) -> bool {
        let drag = input.take_mouse_delta();
        let wheel = input.take_wheel();
        let mut moved = false;

        if input.is_button_down(MOUSE_LEFT) && drag != Vec2::ZERO {
            self.rotate(state, drag * self.rotate_speed);
            moved = true;
        }
        if input.is_button_down(MOUSE_MIDDLE) && drag != Vec2::ZERO {
            self.pan(state, drag);
            moved = true;
        }
        if wheel.y != 0.0 {
            let factor = (1.0 - wheel.y * self.zoom_speed).clamp(0.1, 10.0);
            state.eye_distance_from_position = (state.eye_distance_from_position * factor).clamp(1e-3, 1e6);
            state.orthographic_scale = (state.orthographic_scale * factor).clamp(1e-4, 1e6);
            moved = true;
        }

        let movement = Self::key_movement(input);
        if movement != Vec3::ZERO {
            let (forward, right, up) = basis(state);
            let speed = self.move_speed * state.eye_distance_from_position.max(1.0) * dt;
            state.position += (forward * movement.z + right * movement.x + up * movement.y) * speed;
            moved = true;
        }
        moved
    }

    fn key_movement(input: &InputState) -> Vec3 {
        let axis = |pos: Key, neg: Key| match (input.is_key_down(pos), input.is_key_down(neg)) {
            (true, false) => 1.0,
            (false, true) => -1.0,
            _ => 0.0,
        };
        Vec3::new(axis(Key::D, Key::A), axis(Key::E, Key::Q), axis(Key::W, Key::S))
    }

    fn rotate(&self, state: &mut CameraState, angles: Vec2) {
        let up = state.eye_up.normalize_or(Vec3::Z);
        let (_, right, _) = basis(state);

        let yawed = Quat::from_axis_angle(up, -angles.x) * state.eye_direction;
        let pitched = Quat::from_axis_angle(right, -angles.y) * yawed;

        let angle = pitched.angle_between(up);
        state.eye_direction = if (MIN_UP_ANGLE..std::f32::consts::PI - MIN_UP_ANGLE).contains(&angle) {
            pitched.normalize()
        } else {
            yawed.normalize()
        };
    }

    fn pan(&self, state: &mut CameraState, drag: Vec2) {
        let (_, right, up) = basis(state);
        let scale = state.eye_distance_from_position * self.rotate_speed * 0.5;
        state.position += (-right * drag.x + up * drag.y) * scale;
    }
}

fn basis(state: &CameraState) -> (Vec3, Vec3, Vec3) {
    let forward = state.eye_direction.normalize_or(Vec3::Z);
    let right = forward.cross(state.eye_up).normalize_or(Vec3::X);
    let up = right.cross(forward);
    (forward, right, up)
}

#[cfg(test)]
mod tests {
    use super::*;
    use web_cmn::{KeyEvent, ServerEvent};

    fn press(input: &mut InputState, key: Key) {
        input.apply(
            &ServerEvent::KeyDown(KeyEvent {
                key,
                code: key,
                ..Default::default()
            }),
            1,
            1,
        );
    }

    #[test]
    fn w_moves_toward_eye_direction() {
        let controller = CameraController::new();
        let mut state = CameraState::default();
        let mut input = InputState::new();
        press(&mut input, Key::W);

        let before = state.position;
        assert!(controller.update(&mut state, &mut input, 1.0 / 60.0));
        let step = state.position - before;
        assert!(step.dot(state.eye_direction) > 0.0);
        assert!(step.cross(state.eye_direction).length() < 1e-4);
    }

    #[test]
    fn wheel_zooms_in() {
        let controller = CameraController::new();
        let mut state = CameraState::default();
        let mut input = InputState::new();
        input.apply(&ServerEvent::MouseScroll { delta_x: 0.0, delta_y: 1.0 }, 1, 1);

        let distance = state.eye_distance_from_position;
        controller.update(&mut state, &mut input, 1.0 / 60.0);
        assert!(state.eye_distance_from_position < distance);
    }

    #[test]
    fn drag_orbits_without_flipping() {
        let controller = CameraController::new();
        let mut state = CameraState::default();
        let mut input = InputState::new();
        input.apply(&ServerEvent::MouseDown { button: 0 }, 1000, 1000);
        input.apply(&ServerEvent::MouseMove { x: 0.0, y: 0.0 }, 1000, 1000);
        input.take_mouse_delta();

        let eye_before = state.eye_position();
        input.apply(&ServerEvent::MouseMove { x: 0.2, y: 0.0 }, 1000, 1000);
        assert!(controller.update(&mut state, &mut input, 1.0 / 60.0));
        assert!((state.eye_position() - eye_before).length() > 0.1);
        assert!((state.eye_direction.length() - 1.0).abs() < 1e-4);

        // a huge vertical drag stops short of the pole
        input.apply(&ServerEvent::MouseMove { x: 0.2, y: 5.0 }, 1000, 1000);
        controller.update(&mut state, &mut input, 1.0 / 60.0);
        assert!(state.eye_direction.angle_between(state.eye_up) >= MIN_UP_ANGLE * 0.5);
    }

    #[test]
    fn idle_input_keeps_camera() {
        let controller = CameraController::new();
        let mut state = CameraState::default();
        let mut input = InputState::new();
        assert!(!controller.update(&mut state, &mut input, 1.0 / 60.0));
        assert_eq!(state, CameraState::default());
    }
}
