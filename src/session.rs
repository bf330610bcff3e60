//! One grabbed tablet: its virtual outputs, its pretransform and its
//! `Active -> Destroyed` lifecycle.

use std::{
    os::fd::RawFd,
    path::Path,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use log::{debug, info, warn};

use crate::config::SharedConfig;
use crate::error::DeviceError;
use crate::event::{ABS_X, ABS_Y, EV_ABS, InputEvent};
use crate::event_loop::EventLoop;
use crate::input::{EvdevSource, InputSource};
use crate::models::{self, Model};
use crate::output::Outputs;
use crate::transform::AffineTransform1D;

/// Maps a model's raw X/Y extents onto the canonical square.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pretransform {
    pub x: AffineTransform1D,
    pub y: AffineTransform1D,
}

impl Pretransform {
    pub fn for_model(model: &Model) -> Self {
        let (x, y) = model.pretransform();
        Self { x, y }
    }

    /// Pressure and buttons pass through untouched.
    pub fn apply(&self, event: InputEvent) -> InputEvent {
        if event.kind != EV_ABS {
            return event;
        }
        let map = match event.code {
            ABS_X => &self.x,
            ABS_Y => &self.y,
            _ => return event,
        };
        InputEvent {
            value: map.transform(f64::from(event.value)) as i32,
            ..event
        }
    }
}

struct SessionState {
    source: Box<dyn InputSource>,
    /// `None` once closed.
    outputs: Option<Outputs>,
}

pub struct DeviceSession {
    name: String,
    fd: RawFd,
    pretransform: Pretransform,
    config: SharedConfig,
    event_loop: Arc<EventLoop>,
    state: Mutex<SessionState>,
    destroyed: AtomicBool,
}

impl DeviceSession {
    /// Opens the evdev node at `path`, creates its virtual devices, grabs it
    /// and registers it with `event_loop`.
    pub fn open(
        path: &Path,
        config: SharedConfig,
        event_loop: &Arc<EventLoop>,
    ) -> Result<Arc<Self>, DeviceError> {
        let source = EvdevSource::open(path)?;
        let model = models::resolve(source.name());
        let pretransform = Pretransform::for_model(model);
        let outputs = Outputs::create(source.name())?;
        Self::start(Box::new(source), outputs, pretransform, config, event_loop)
    }

    /// Grabs `source` and registers the session. Outputs must already exist.
    pub fn start(
        mut source: Box<dyn InputSource>,
        outputs: Outputs,
        pretransform: Pretransform,
        config: SharedConfig,
        event_loop: &Arc<EventLoop>,
    ) -> Result<Arc<Self>, DeviceError> {
        source.grab()?;
        let session = Arc::new(Self {
            name: source.name().to_string(),
            fd: source.raw_fd(),
            pretransform,
            config,
            event_loop: event_loop.clone(),
            state: Mutex::new(SessionState {
                source,
                outputs: Some(outputs),
            }),
            destroyed: AtomicBool::new(false),
        });
        event_loop.register(session.clone())?;
        info!("session: connected '{}'", session.name);
        Ok(session)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drains everything the device has ready. A failed read means the
    /// device is gone and ends the session.
    pub fn handle_events(&self) {
        let mut state = self.state();
        let events = match state.source.fetch() {
            Ok(events) => events,
            Err(e) => {
                drop(state);
                debug!("session '{}': read failed: {e}", self.name);
                self.cleanup();
                return;
            }
        };
        let Some(outputs) = state.outputs.as_mut() else {
            return;
        };

        for event in events {
            if event.is_sync() {
                for out in [&mut outputs.pen, &mut outputs.keyboard] {
                    if let Err(e) = out.write(event) {
                        warn!("session '{}': sync write failed: {e}", self.name);
                    }
                }
                continue;
            }
            let event = self.pretransform.apply(event);
            if let Err(e) = self.config.dispatch(&event, outputs) {
                warn!("session '{}': dispatch of {event:?} failed: {e}", self.name);
            }
        }
    }

    /// Unregisters and closes the outputs. Returns whether this call did the
    /// transition; later calls are no-ops returning `false`.
    pub fn cleanup(&self) -> bool {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            debug!("session '{}': already destroyed", self.name);
            return false;
        }
        if !self.event_loop.unregister(self.fd) {
            debug!("session '{}': was not registered", self.name);
        }
        let outputs = self.state().outputs.take();
        drop(outputs);
        info!("session: disconnected '{}'", self.name);
        true
    }
}
