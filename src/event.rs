//! Kernel input event vocabulary: event types, axis codes and key codes.

use std::{collections::HashMap, fmt, str::FromStr, sync::LazyLock};

use evdev::{AbsoluteAxisCode, EventType, KeyCode};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ConfigError;

pub const EV_SYN: u16 = EventType::SYNCHRONIZATION.0;
pub const EV_KEY: u16 = EventType::KEY.0;
pub const EV_ABS: u16 = EventType::ABSOLUTE.0;

pub const ABS_X: u16 = AbsoluteAxisCode::ABS_X.0;
pub const ABS_Y: u16 = AbsoluteAxisCode::ABS_Y.0;
pub const ABS_PRESSURE: u16 = AbsoluteAxisCode::ABS_PRESSURE.0;

/// Highest key code the kernel defines (KEY_MAX).
const KEY_MAX: u16 = 0x2ff;

/// One `(type, code, value)` triple as read from or written to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub kind: u16,
    pub code: u16,
    pub value: i32,
}

impl InputEvent {
    pub const fn new(kind: u16, code: u16, value: i32) -> Self {
        Self { kind, code, value }
    }

    pub const fn key(code: Keycode, value: i32) -> Self {
        Self::new(EV_KEY, code.0, value)
    }

    pub const fn abs(code: u16, value: i32) -> Self {
        Self::new(EV_ABS, code, value)
    }

    #[cfg(test)]
    pub const fn syn_report() -> Self {
        Self::new(EV_SYN, 0, 0)
    }

    pub fn is_sync(&self) -> bool {
        self.kind == EV_SYN
    }
}

impl From<evdev::InputEvent> for InputEvent {
    fn from(ev: evdev::InputEvent) -> Self {
        Self::new(ev.event_type().0, ev.code(), ev.value())
    }
}

/// A key or button code. Serializes as its kernel name (`KEY_A`, `BTN_STYLUS`),
/// or as a decimal number for codes without one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Keycode(pub u16);

impl Keycode {
    pub fn name(self) -> String {
        if let Some((name, _)) = PREFERRED_NAMES.iter().find(|(_, c)| *c == self.0) {
            return (*name).to_string();
        }
        let debug = format!("{:?}", KeyCode(self.0));
        if is_key_name(&debug) {
            return debug;
        }
        match ALIASES.iter().find(|(_, c)| *c == self.0) {
            Some((name, _)) => (*name).to_string(),
            None => self.0.to_string(),
        }
    }
}

impl From<KeyCode> for Keycode {
    fn from(k: KeyCode) -> Self {
        Self(k.0)
    }
}

fn is_key_name(s: &str) -> bool {
    s.starts_with("KEY_") || s.starts_with("BTN_")
}

/// Names tablet configs use for buttons evdev prints under another alias.
const PREFERRED_NAMES: &[(&str, u16)] = &[
    ("BTN_SOUTH", 0x130),
    ("BTN_EAST", 0x131),
    ("BTN_NORTH", 0x133),
    ("BTN_WEST", 0x134),
    ("BTN_STYLUS3", 0x149),
    ("BTN_WHEEL", 0x150),
];

/// Second names from `input-event-codes.h` for codes that have several.
const ALIASES: &[(&str, u16)] = &[
    ("KEY_HANGUEL", 0x7a),
    ("KEY_HANGEUL", 0x7a),
    ("KEY_MIN_INTERESTING", 0x71),
    ("KEY_MUTE", 0x71),
    ("KEY_SCREENLOCK", 0x98),
    ("KEY_COFFEE", 0x98),
    ("KEY_DIRECTION", 0x99),
    ("KEY_ROTATE_DISPLAY", 0x99),
    ("KEY_BRIGHTNESS_ZERO", 0xf4),
    ("KEY_BRIGHTNESS_AUTO", 0xf4),
    ("KEY_WIMAX", 0xf6),
    ("KEY_WWAN", 0xf6),
    ("BTN_MISC", 0x100),
    ("BTN_0", 0x100),
    ("BTN_MOUSE", 0x110),
    ("BTN_LEFT", 0x110),
    ("BTN_JOYSTICK", 0x120),
    ("BTN_TRIGGER", 0x120),
    ("BTN_GAMEPAD", 0x130),
    ("BTN_A", 0x130),
    ("BTN_B", 0x131),
    ("BTN_X", 0x133),
    ("BTN_Y", 0x134),
    ("BTN_DIGI", 0x140),
    ("BTN_TOOL_PEN", 0x140),
    ("BTN_GEAR_DOWN", 0x150),
    ("BTN_TRIGGER_HAPPY", 0x2c0),
    ("BTN_TRIGGER_HAPPY1", 0x2c0),
];

static NAMES: LazyLock<HashMap<String, Keycode>> = LazyLock::new(|| {
    let mut names: HashMap<String, Keycode> = (0..=KEY_MAX)
        .map(Keycode)
        .filter_map(|k| {
            let name = format!("{:?}", KeyCode(k.0));
            is_key_name(&name).then_some((name, k))
        })
        .collect();
    for (name, code) in PREFERRED_NAMES.iter().chain(ALIASES) {
        names.insert((*name).to_string(), Keycode(*code));
    }
    names
});

impl FromStr for Keycode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(k) = NAMES.get(s) {
            return Ok(*k);
        }
        match s.parse::<u16>() {
            Ok(code) if code <= KEY_MAX => Ok(Keycode(code)),
            _ => Err(ConfigError::UnknownKeycode(s.to_string())),
        }
    }
}

impl fmt::Display for Keycode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl fmt::Debug for Keycode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

impl Serialize for Keycode {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.name())
    }
}

impl<'de> Deserialize<'de> for Keycode {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let s = String::deserialize(de)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

pub const BTN_LEFT: Keycode = Keycode(KeyCode::BTN_LEFT.0);
pub const BTN_RIGHT: Keycode = Keycode(KeyCode::BTN_RIGHT.0);
pub const BTN_TOOL_PEN: Keycode = Keycode(KeyCode::BTN_TOOL_PEN.0);
pub const BTN_TOUCH: Keycode = Keycode(KeyCode::BTN_TOUCH.0);
pub const BTN_STYLUS: Keycode = Keycode(KeyCode::BTN_STYLUS.0);
pub const BTN_STYLUS2: Keycode = Keycode(KeyCode::BTN_STYLUS2.0);
pub const BTN_STYLUS3: Keycode = Keycode(0x149);
pub const BTN_WHEEL: Keycode = Keycode(0x150);

/// Buttons that only behave when emitted from the pointer-class device.
/// Display servers ignore stylus buttons coming from a keyboard.
pub const PEN_ROUTED: [Keycode; 7] = [
    BTN_TOOL_PEN,
    BTN_TOUCH,
    BTN_STYLUS,
    BTN_STYLUS2,
    BTN_STYLUS3,
    BTN_LEFT,
    BTN_RIGHT,
];

pub fn is_pen_routed(k: Keycode) -> bool {
    PEN_ROUTED.contains(&k)
}

/// Every button a VEIKK tablet is known to report. Mappings for anything
/// else are ignored.
pub const VALID_BUTTONS: [Keycode; 19] = [
    // keypad
    Keycode(KeyCode::BTN_0.0),
    Keycode(KeyCode::BTN_1.0),
    Keycode(KeyCode::BTN_2.0),
    Keycode(KeyCode::BTN_3.0),
    Keycode(KeyCode::BTN_4.0),
    Keycode(KeyCode::BTN_5.0),
    Keycode(KeyCode::BTN_6.0),
    Keycode(KeyCode::BTN_7.0),
    Keycode(KeyCode::BTN_8.0),
    Keycode(KeyCode::BTN_9.0),
    Keycode(0x133), // BTN_NORTH
    Keycode(0x130), // BTN_SOUTH
    Keycode(0x134), // BTN_WEST
    Keycode(0x131), // BTN_EAST
    Keycode(KeyCode::BTN_TOOL_DOUBLETAP.0),
    BTN_WHEEL,
    // stylus
    BTN_TOUCH,
    BTN_STYLUS,
    BTN_STYLUS2,
];

pub fn is_valid_button(k: Keycode) -> bool {
    VALID_BUTTONS.contains(&k)
}
