//! Virtual uinput devices the engine emits on.
//!
//! Each physical tablet gets two: a pen device (absolute axes plus the stylus
//! and pointer buttons) and a keyboard device (every other key). Closing a
//! device is dropping it.

use log::info;
use uinput::event::{Code, Keyboard, absolute, controller};

use crate::error::DeviceError;
use crate::event::{InputEvent, Keycode, is_pen_routed};

/// Axis maximum advertised for X/Y: the canonical square.
pub const PEN_AXIS_MAX: i32 = 65536;
pub const PEN_PRESSURE_MAX: i32 = 8192;

pub trait OutputDevice: Send {
    /// Writes one event. Framing (SYN_REPORT) is the caller's job.
    fn write(&mut self, event: InputEvent) -> Result<(), DeviceError>;
}

/// The pen/keyboard pair commands write to.
pub struct Outputs {
    pub pen: Box<dyn OutputDevice>,
    pub keyboard: Box<dyn OutputDevice>,
}

impl Outputs {
    pub fn create(device_name: &str) -> Result<Self, DeviceError> {
        Ok(Self {
            pen: Box::new(UinputOutput::pen(device_name)?),
            keyboard: Box::new(UinputOutput::keyboard(device_name)?),
        })
    }

    /// Routes a key event to whichever device handles that keycode.
    pub fn write_key(&mut self, code: Keycode, value: i32) -> Result<(), DeviceError> {
        let event = InputEvent::key(code, value);
        if is_pen_routed(code) {
            self.pen.write(event)
        } else {
            self.keyboard.write(event)
        }
    }
}

pub struct UinputOutput {
    dev: uinput::device::Device,
}

impl UinputOutput {
    pub fn pen(device_name: &str) -> Result<Self, DeviceError> {
        use controller::{Digi, Mouse};

        let dev = uinput::default()?
            .name(format!("{device_name} Pen"))?
            .event(Digi::Pen)?
            .event(Digi::Touch)?
            .event(Digi::Stylus)?
            .event(Digi::Stylus2)?
            .event(Mouse::Left)?
            .event(Mouse::Right)?
            .event(absolute::Position::X)?
            .min(0)
            .max(PEN_AXIS_MAX)
            .event(absolute::Position::Y)?
            .min(0)
            .max(PEN_AXIS_MAX)
            .event(absolute::Digi::Pressure)?
            .min(0)
            .max(PEN_PRESSURE_MAX)
            .create()?;

        info!("uinput: created '{device_name} Pen'");
        Ok(Self { dev })
    }

    pub fn keyboard(device_name: &str) -> Result<Self, DeviceError> {
        use controller::{DPad, Digi, GamePad, JoyStick, Misc, Mouse, TriggerHappy, Wheel};

        let mut builder = uinput::default()?
            .name(format!("{device_name} Keyboard"))?
            .event(Keyboard::All)?;

        for b in Misc::iter_variants() {
            builder = builder.event(b)?;
        }
        for b in Mouse::iter_variants().filter(|b| !pen_routed_code(b.code())) {
            builder = builder.event(b)?;
        }
        for b in JoyStick::iter_variants() {
            builder = builder.event(b)?;
        }
        for b in GamePad::iter_variants() {
            builder = builder.event(b)?;
        }
        for b in Digi::iter_variants().filter(|b| !pen_routed_code(b.code())) {
            builder = builder.event(b)?;
        }
        for b in Wheel::iter_variants() {
            builder = builder.event(b)?;
        }
        for b in DPad::iter_variants() {
            builder = builder.event(b)?;
        }
        for b in TriggerHappy::iter_variants() {
            builder = builder.event(b)?;
        }
        let dev = builder.create()?;

        info!("uinput: created '{device_name} Keyboard'");
        Ok(Self { dev })
    }
}

fn pen_routed_code(code: i32) -> bool {
    u16::try_from(code).is_ok_and(|c| is_pen_routed(Keycode(c)))
}

impl OutputDevice for UinputOutput {
    fn write(&mut self, event: InputEvent) -> Result<(), DeviceError> {
        self.dev
            .write(i32::from(event.kind), i32::from(event.code), event.value)?;
        Ok(())
    }
}
