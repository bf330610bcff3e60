//! Fakes standing in for evdev and uinput devices.

use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    os::{
        fd::{AsRawFd, RawFd},
        unix::net::UnixStream,
    },
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use crate::config::SharedConfig;
use crate::daemon::DeviceBackend;
use crate::error::DeviceError;
use crate::event::InputEvent;
use crate::event_loop::EventLoop;
use crate::input::{DeviceInfo, InputSource};
use crate::output::{OutputDevice, Outputs};
use crate::session::DeviceSession;

/// Shared view of everything written to one fake output.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<InputEvent>>>,
    drops: Arc<AtomicUsize>,
}

impl Recorder {
    pub fn output(&self) -> Box<dyn OutputDevice> {
        Box::new(RecordingOutput { rec: self.clone() })
    }

    pub fn events(&self) -> Vec<InputEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    /// How many outputs sharing this recorder were closed.
    pub fn drops(&self) -> usize {
        self.drops.load(Ordering::SeqCst)
    }
}

struct RecordingOutput {
    rec: Recorder,
}

impl OutputDevice for RecordingOutput {
    fn write(&mut self, event: InputEvent) -> Result<(), DeviceError> {
        self.rec.events.lock().unwrap().push(event);
        Ok(())
    }
}

impl Drop for RecordingOutput {
    fn drop(&mut self) {
        self.rec.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Outputs plus the pen and keyboard recorders behind them.
pub fn recording_outputs() -> (Outputs, Recorder, Recorder) {
    let (pen, keyboard) = (Recorder::default(), Recorder::default());
    let outputs = Outputs {
        pen: pen.output(),
        keyboard: keyboard.output(),
    };
    (outputs, pen, keyboard)
}

#[derive(Default)]
struct Script {
    batches: VecDeque<Vec<InputEvent>>,
    failed: bool,
}

/// Input source fed by a [`SourceHandle`]. The socket pair gives it a real
/// fd that becomes readable whenever the handle pushes something.
pub struct ScriptedSource {
    name: String,
    reader: UnixStream,
    script: Arc<Mutex<Script>>,
    grabbed: Arc<AtomicBool>,
}

#[derive(Clone)]
pub struct SourceHandle {
    writer: Arc<UnixStream>,
    script: Arc<Mutex<Script>>,
    grabbed: Arc<AtomicBool>,
}

impl ScriptedSource {
    pub fn new(name: &str) -> (Self, SourceHandle) {
        let (reader, writer) = UnixStream::pair().unwrap();
        reader.set_nonblocking(true).unwrap();
        let script = Arc::new(Mutex::new(Script::default()));
        let grabbed = Arc::new(AtomicBool::new(false));
        let source = Self {
            name: name.to_string(),
            reader,
            script: script.clone(),
            grabbed: grabbed.clone(),
        };
        let handle = SourceHandle {
            writer: Arc::new(writer),
            script,
            grabbed,
        };
        (source, handle)
    }
}

impl SourceHandle {
    pub fn push(&self, events: Vec<InputEvent>) {
        self.script.lock().unwrap().batches.push_back(events);
        (&*self.writer).write_all(&[1]).unwrap();
    }

    /// Makes the next fetch fail as an unplugged device would.
    pub fn unplug(&self) {
        self.script.lock().unwrap().failed = true;
        (&*self.writer).write_all(&[0]).unwrap();
    }

    pub fn is_grabbed(&self) -> bool {
        self.grabbed.load(Ordering::SeqCst)
    }
}

impl InputSource for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn raw_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    fn grab(&mut self) -> Result<(), DeviceError> {
        self.grabbed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn fetch(&mut self) -> Result<Vec<InputEvent>, DeviceError> {
        let mut buf = [0u8; 64];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        let mut script = self.script.lock().unwrap();
        if script.failed {
            return Err(io::Error::from_raw_os_error(19).into()); // ENODEV
        }
        Ok(script.batches.drain(..).flatten().collect())
    }
}

/// A machine with no tablets plugged in.
pub struct NoDevices;

impl DeviceBackend for NoDevices {
    fn discover(&self) -> Vec<DeviceInfo> {
        Vec::new()
    }

    fn probe(&self, _path: &Path) -> Result<bool, DeviceError> {
        Ok(false)
    }

    fn open(
        &self,
        _path: &Path,
        _config: SharedConfig,
        _event_loop: &Arc<EventLoop>,
    ) -> Result<Arc<DeviceSession>, DeviceError> {
        Err(io::Error::from(io::ErrorKind::NotFound).into())
    }
}
