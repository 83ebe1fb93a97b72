use std::collections::HashSet;

use glam::Vec2;
use web_cmn::{Key, KeyEvent, ServerEvent};

pub const MOUSE_LEFT: usize = 0;
pub const MOUSE_RIGHT: usize = 1;
pub const MOUSE_MIDDLE: usize = 2;

/// Mouse and keyboard state accumulated between frames.
#[derive(Debug, Default)]
pub struct InputState {
    pub mouse: Vec2,
    pub buttons: [bool; 3],
    keys: HashSet<Key>,
    wheel: Vec2,
    mouse_delta: Vec2,
    typed: Vec<char>,
    pub modifiers: KeyEvent,
    resize: Option<(u32, u32)>,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one event. Mouse positions arrive normalized to `[0, 1]` and are scaled
    /// to the viewport size.
    pub fn apply(&mut self, event: &ServerEvent, width: u32, height: u32) {
        match *event {
            ServerEvent::MouseMove { x, y } => {
                let pos = Vec2::new(x * width as f32, y * height as f32);
                self.mouse_delta += pos - self.mouse;
                self.mouse = pos;
            }
            ServerEvent::MouseDown { button } => self.set_button(button, true),
            ServerEvent::MouseUp { button } => self.set_button(button, false),
            ServerEvent::MouseScroll { delta_x, delta_y } => self.wheel += Vec2::new(delta_x, delta_y),
            ServerEvent::KeyDown(key) => {
                self.keys.insert(key.key);
                self.modifiers = key;
                if key.unicode != 0 && !key.alt && !key.ctrl && !key.meta {
                    if let Some(c) = char::from_u32(key.unicode) {
                        self.typed.push(c);
                    }
                }
            }
            ServerEvent::KeyUp(key) => {
                self.keys.remove(&key.key);
                self.modifiers = key;
            }
            ServerEvent::Resize { width, height } => self.resize = Some((width, height)),
            ServerEvent::Inactive => {}
        }
    }

    fn set_button(&mut self, button: u32, pressed: bool) {
        if let Some(state) = self.buttons.get_mut(button as usize) {
            *state = pressed;
        }
    }

    pub fn is_key_down(&self, key: Key) -> bool {
        self.keys.contains(&key)
    }

    pub fn is_button_down(&self, button: usize) -> bool {
        self.buttons.get(button).copied().unwrap_or(false)
    }

    pub fn take_mouse_delta(&mut self) -> Vec2 {
        std::mem::take(&mut self.mouse_delta)
    }

    pub fn take_wheel(&mut self) -> Vec2 {
        std::mem::take(&mut self.wheel)
    }

    pub fn take_typed(&mut self) -> Vec<char> {
        std::mem::take(&mut self.typed)
    }

    pub fn take_resize(&mut self) -> Option<(u32, u32)> {
        self.resize.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(key: Key, unicode: u32) -> KeyEvent {
        KeyEvent {
            key,
            unicode,
            code: key,
            ..Default::default()
        }
    }

    #[test]
    fn mouse_is_scaled_and_accumulated() {
        let mut input = InputState::new();
        input.apply(&ServerEvent::MouseMove { x: 0.5, y: 0.5 }, 200, 100);
        input.take_mouse_delta();
        input.apply(&ServerEvent::MouseMove { x: 0.75, y: 0.5 }, 200, 100);
        input.apply(&ServerEvent::MouseDown { button: 2 }, 200, 100);

        assert_eq!(input.mouse, Vec2::new(150.0, 50.0));
        assert_eq!(input.take_mouse_delta(), Vec2::new(50.0, 0.0));
        assert_eq!(input.take_mouse_delta(), Vec2::ZERO);
        assert!(input.is_button_down(MOUSE_MIDDLE));
        input.apply(&ServerEvent::MouseDown { button: 9 }, 200, 100);
    }

    #[test]
    fn keys_track_down_state_and_text() {
        let mut input = InputState::new();
        input.apply(&ServerEvent::KeyDown(key(Key::W, 'w' as u32)), 1, 1);
        assert!(input.is_key_down(Key::W));
        let mut ctrl = key(Key::C, 'c' as u32);
        ctrl.ctrl = true;
        input.apply(&ServerEvent::KeyDown(ctrl), 1, 1);
        input.apply(&ServerEvent::KeyUp(key(Key::W, 'w' as u32)), 1, 1);

        assert!(!input.is_key_down(Key::W));
        assert_eq!(input.take_typed(), vec!['w']);
    }

    #[test]
    fn wheel_and_resize_are_taken_once() {
        let mut input = InputState::new();
        input.apply(&ServerEvent::MouseScroll { delta_x: 0.0, delta_y: -1.0 }, 1, 1);
        input.apply(&ServerEvent::MouseScroll { delta_x: 0.0, delta_y: -1.0 }, 1, 1);
        input.apply(&ServerEvent::Resize { width: 640, height: 480 }, 1, 1);
        assert_eq!(input.take_wheel(), Vec2::new(0.0, -2.0));
        assert_eq!(input.take_wheel(), Vec2::ZERO);
        assert_eq!(input.take_resize(), Some((640, 480)));
        assert_eq!(input.take_resize(), None);
    }
}
