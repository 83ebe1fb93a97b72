use serde::{Deserialize, Serialize};

/// Keyboard keys understood by the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Key {
    #[default]
    None,
    Tab,
    LeftArrow,
    RightArrow,
    UpArrow,
    DownArrow,
    PageUp,
    PageDown,
    Home,
    End,
    Insert,
    Delete,
    Backspace,
    Space,
    Enter,
    Escape,
    Apostrophe,
    Comma,
    Minus,
    Period,
    Slash,
    Semicolon,
    Equal,
    LeftBracket,
    Backslash,
    RightBracket,
    GraveAccent,
    CapsLock,
    ScrollLock,
    NumLock,
    PrintScreen,
    Pause,
    KeypadMultiply,
    KeypadAdd,
    LeftShift,
    LeftCtrl,
    LeftAlt,
    LeftSuper,
    Menu,
    Num0,
    Num1,
    Num2,
    Num3,
    Num4,
    Num5,
    Num6,
    Num7,
    Num8,
    Num9,
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
    L,
    M,
    N,
    O,
    P,
    Q,
    R,
    S,
    T,
    U,
    V,
    W,
    X,
    Y,
    Z,
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,
}

struct KeyMapping {
    key: Key,
    lower: &'static str,
    upper: &'static str,
    lower_unicode: u32,
    upper_unicode: u32,
}

const fn map(key: Key, lower: &'static str, upper: &'static str, lower_unicode: u32, upper_unicode: u32) -> KeyMapping {
    KeyMapping {
        key,
        lower,
        upper,
        lower_unicode,
        upper_unicode,
    }
}

const fn named(key: Key, name: &'static str) -> KeyMapping {
    map(key, name, name, 0, 0)
}

// DOM `KeyboardEvent.key` values; the first match wins.
const MAPPINGS: &[KeyMapping] = &[
    named(Key::Tab, "Tab"),
    named(Key::LeftArrow, "ArrowLeft"),
    named(Key::RightArrow, "ArrowRight"),
    named(Key::UpArrow, "ArrowUp"),
    named(Key::DownArrow, "ArrowDown"),
    named(Key::PageUp, "PageUp"),
    named(Key::PageDown, "PageDown"),
    named(Key::Home, "Home"),
    named(Key::End, "End"),
    named(Key::Insert, "Insert"),
    named(Key::Delete, "Delete"),
    named(Key::Backspace, "Backspace"),
    map(Key::Space, " ", " ", 0x20, 0x20),
    named(Key::Enter, "Enter"),
    named(Key::Escape, "Escape"),
    map(Key::Apostrophe, "'", "\"", 0x27, 0x22),
    map(Key::Comma, ",", "<", 0x2C, 0x3C),
    map(Key::Minus, "-", "_", 0x2D, 0x5F),
    map(Key::Period, ".", ">", 0x2E, 0x3E),
    map(Key::Slash, "/", "?", 0x2F, 0x3F),
    map(Key::Semicolon, ";", ":", 0x3B, 0x3A),
    map(Key::Equal, "=", "+", 0x3D, 0x2B),
    map(Key::LeftBracket, "[", "{", 0x5B, 0x7B),
    map(Key::Backslash, "\\", "|", 0x5C, 0x7C),
    map(Key::RightBracket, "]", "}", 0x5D, 0x7D),
    map(Key::GraveAccent, "`", "~", 0x60, 0x7E),
    named(Key::CapsLock, "CapsLock"),
    named(Key::ScrollLock, "ScrollLock"),
    named(Key::NumLock, "NumLock"),
    named(Key::PrintScreen, "PrintScreen"),
    named(Key::Pause, "Pause"),
    named(Key::LeftShift, "Shift"),
    named(Key::LeftCtrl, "Control"),
    named(Key::LeftAlt, "Alt"),
    named(Key::LeftSuper, "Meta"),
    named(Key::Menu, "ContextMenu"),
    map(Key::Num0, "0", ")", 0x30, 0x29),
    map(Key::Num1, "1", "!", 0x31, 0x21),
    map(Key::Num2, "2", "@", 0x32, 0x40),
    map(Key::Num3, "3", "#", 0x33, 0x23),
    map(Key::Num4, "4", "$", 0x34, 0x24),
    map(Key::Num5, "5", "%", 0x35, 0x25),
    map(Key::Num6, "6", "^", 0x36, 0x5E),
    map(Key::Num7, "7", "&", 0x37, 0x26),
    map(Key::Num8, "8", "*", 0x38, 0x2A),
    map(Key::Num9, "9", "(", 0x39, 0x28),
    map(Key::A, "a", "A", 0x61, 0x41),
    map(Key::B, "b", "B", 0x62, 0x42),
    map(Key::C, "c", "C", 0x63, 0x43),
    map(Key::D, "d", "D", 0x64, 0x44),
    map(Key::E, "e", "E", 0x65, 0x45),
    map(Key::F, "f", "F", 0x66, 0x46),
    map(Key::G, "g", "G", 0x67, 0x47),
    map(Key::H, "h", "H", 0x68, 0x48),
    map(Key::I, "i", "I", 0x69, 0x49),
    map(Key::J, "j", "J", 0x6A, 0x4A),
    map(Key::K, "k", "K", 0x6B, 0x4B),
    map(Key::L, "l", "L", 0x6C, 0x4C),
    map(Key::M, "m", "M", 0x6D, 0x4D),
    map(Key::N, "n", "N", 0x6E, 0x4E),
    map(Key::O, "o", "O", 0x6F, 0x4F),
    map(Key::P, "p", "P", 0x70, 0x50),
    map(Key::Q, "q", "Q", 0x71, 0x51),
    map(Key::R, "r", "R", 0x72, 0x52),
    map(Key::S, "s", "S", 0x73, 0x53),
    map(Key::T, "t", "T", 0x74, 0x54),
    map(Key::U, "u", "U", 0x75, 0x55),
    map(Key::V, "v", "V", 0x76, 0x56),
    map(Key::W, "w", "W", 0x77, 0x57),
    map(Key::X, "x", "X", 0x78, 0x58),
    map(Key::Y, "y", "Y", 0x79, 0x59),
    map(Key::Z, "z", "Z", 0x7A, 0x5A),
    named(Key::F1, "F1"),
    named(Key::F2, "F2"),
    named(Key::F3, "F3"),
    named(Key::F4, "F4"),
    named(Key::F5, "F5"),
    named(Key::F6, "F6"),
    named(Key::F7, "F7"),
    named(Key::F8, "F8"),
    named(Key::F9, "F9"),
    named(Key::F10, "F10"),
    named(Key::F11, "F11"),
    named(Key::F12, "F12"),
    map(Key::KeypadMultiply, "*", "Multiply", 0x2A, 0x2A),
    map(Key::KeypadAdd, "+", "Add", 0x2B, 0x2B),
];

impl Key {
    /// Resolves a DOM `key` value to a key and the character it types, 0 for none.
    pub fn from_dom_key(key: &str) -> (Self, u32) {
        MAPPINGS
            .iter()
            .find(|m| m.lower == key || m.upper == key)
            .map(|m| {
                let unicode = if m.upper == key { m.upper_unicode } else { m.lower_unicode };
                (m.key, unicode)
            })
            .unwrap_or((Key::None, 0))
    }

    /// Resolves a DOM `code` value (layout independent), e.g. `KeyW` or `Digit1`.
    pub fn from_dom_code(code: &str) -> Self {
        let lookup = code
            .strip_prefix("Key")
            .or_else(|| code.strip_prefix("Digit"))
            .filter(|rest| rest.len() == 1)
            .unwrap_or(code);
        match lookup {
            "Space" => Key::Space,
            "ShiftLeft" | "ShiftRight" => Key::LeftShift,
            "ControlLeft" | "ControlRight" => Key::LeftCtrl,
            "AltLeft" | "AltRight" => Key::LeftAlt,
            "MetaLeft" | "MetaRight" => Key::LeftSuper,
            other => Self::from_dom_key(other).0,
        }
    }
}
