use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Key, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyEvent {
    pub key: Key,
    /// Character typed by the key, 0 when it produces none.
    pub unicode: u32,
    pub code: Key,
    pub alt: bool,
    pub ctrl: bool,
    pub shift: bool,
    pub meta: bool,
}

/// Input events forwarded by remote clients to the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ServerEvent {
    MouseMove { x: f32, y: f32 },
    MouseDown { button: u32 },
    MouseUp { button: u32 },
    MouseScroll { delta_x: f32, delta_y: f32 },
    KeyDown(KeyEvent),
    KeyUp(KeyEvent),
    Resize { width: u32, height: u32 },
    /// No events are queued and no client is connected.
    Inactive,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DomKey {
    key: String,
    code: String,
    #[serde(default)]
    alt_key: bool,
    #[serde(default)]
    ctrl_key: bool,
    #[serde(default)]
    shift_key: bool,
    #[serde(default)]
    meta_key: bool,
}

impl From<DomKey> for KeyEvent {
    fn from(dom: DomKey) -> Self {
        let (key, unicode) = Key::from_dom_key(&dom.key);
        Self {
            key,
            unicode,
            code: Key::from_dom_code(&dom.code),
            alt: dom.alt_key,
            ctrl: dom.ctrl_key,
            shift: dom.shift_key,
            meta: dom.meta_key,
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "eventType", rename_all = "lowercase")]
enum ClientEvent {
    MouseMove {
        x: f32,
        y: f32,
    },
    MouseDown {
        button: u32,
    },
    MouseUp {
        button: u32,
    },
    MouseWheel {
        #[serde(rename = "deltaX")]
        delta_x: f32,
        #[serde(rename = "deltaY")]
        delta_y: f32,
    },
    KeyDown(DomKey),
    KeyUp(DomKey),
    Resize {
        width: u32,
        height: u32,
    },
    FrameId,
    #[serde(other)]
    Unknown,
}

const WHEEL_DELTA: f32 = 120.0;

// DOM numbers buttons left, middle, right; the viewport expects left, right, middle.
fn dom_button(button: u32) -> u32 {
    match button {
        1 => 2,
        2 => 1,
        other => other,
    }
}

/// Parses one websocket text message.
///
/// Returns `Ok(None)` for messages that carry no input, such as frame acknowledgements.
pub fn parse_client_message(text: &str) -> Result<Option<ServerEvent>> {
    let value: Value = serde_json::from_str(text)?;
    if value.get("type").and_then(Value::as_str) != Some("event") {
        return Ok(None);
    }

    let event = match serde_json::from_value::<ClientEvent>(value)? {
        ClientEvent::MouseMove { x, y } => ServerEvent::MouseMove { x, y },
        ClientEvent::MouseDown { button } => ServerEvent::MouseDown {
            button: dom_button(button),
        },
        ClientEvent::MouseUp { button } => ServerEvent::MouseUp {
            button: dom_button(button),
        },
        ClientEvent::MouseWheel { delta_x, delta_y } => ServerEvent::MouseScroll {
            delta_x: delta_x / WHEEL_DELTA,
            delta_y: -delta_y / WHEEL_DELTA,
        },
        ClientEvent::KeyDown(dom) => ServerEvent::KeyDown(dom.into()),
        ClientEvent::KeyUp(dom) => ServerEvent::KeyUp(dom.into()),
        ClientEvent::Resize { width, height } => ServerEvent::Resize { width, height },
        ClientEvent::FrameId | ClientEvent::Unknown => return Ok(None),
    };
    Ok(Some(event))
}
