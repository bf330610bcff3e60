//! Tablet discovery and the raw event stream (evdev 0.13.2 compatible)

use std::{
    io,
    os::fd::{AsRawFd, RawFd},
    path::{Path, PathBuf},
};

use evdev::{AbsoluteAxisCode, Device, EventType};

use crate::error::DeviceError;
use crate::event::InputEvent;

/// VEIKK devices all report a name starting with this.
pub const NAME_PREFIX: &str = "VEIKK ";

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: PathBuf,
    pub name: String,
}

/// A physical device the session reads from.
pub trait InputSource: Send {
    fn name(&self) -> &str;
    fn raw_fd(&self) -> RawFd;
    /// Takes the device away from the rest of the input stack.
    fn grab(&mut self) -> Result<(), DeviceError>;
    /// Everything available right now; empty if nothing is pending.
    fn fetch(&mut self) -> Result<Vec<InputEvent>, DeviceError>;
}

pub struct EvdevSource {
    device: Device,
    name: String,
}

impl EvdevSource {
    pub fn open(path: &Path) -> Result<Self, DeviceError> {
        let device = Device::open(path)?;
        device.set_nonblocking(true)?;
        let name = device.name().unwrap_or("unknown").to_string();
        Ok(Self { device, name })
    }
}

impl InputSource for EvdevSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn raw_fd(&self) -> RawFd {
        self.device.as_raw_fd()
    }

    fn grab(&mut self) -> Result<(), DeviceError> {
        self.device.grab()?;
        Ok(())
    }

    fn fetch(&mut self) -> Result<Vec<InputEvent>, DeviceError> {
        match self.device.fetch_events() {
            Ok(events) => Ok(events.map(InputEvent::from).collect()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// `/dev/input/eventN` nodes are the only ones evdev can open.
pub fn is_event_node(path: &Path) -> bool {
    path.file_name()
        .and_then(|s| s.to_str())
        .map(|s| s.starts_with("event"))
        .unwrap_or(false)
}

pub fn matches_name(name: &str) -> bool {
    name.starts_with(NAME_PREFIX)
}

/// Name match plus the absolute X/Y/pressure axes the engine relies on.
pub fn is_tablet(dev: &Device) -> bool {
    let named = dev.name().map(matches_name).unwrap_or(false);
    let has_abs = dev.supported_events().contains(EventType::ABSOLUTE);
    let axes = dev.supported_absolute_axes();
    let has_pen_axes = axes.is_some_and(|a| {
        a.contains(AbsoluteAxisCode::ABS_X)
            && a.contains(AbsoluteAxisCode::ABS_Y)
            && a.contains(AbsoluteAxisCode::ABS_PRESSURE)
    });
    named && has_abs && has_pen_axes
}

pub fn discover_tablets() -> Vec<DeviceInfo> {
    let mut out = vec![];
    if let Ok(rd) = std::fs::read_dir("/dev/input") {
        for e in rd.flatten() {
            let p = e.path();
            if !is_event_node(&p) {
                continue;
            }
            if let Ok(dev) = Device::open(&p) {
                if is_tablet(&dev) {
                    out.push(DeviceInfo {
                        path: p,
                        name: dev.name().unwrap_or("unknown").to_string(),
                    });
                }
            }
        }
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    out
}
