//! Owns the device registry, the shared configuration and every thread the
//! daemon runs.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{Result, anyhow};
use evdev::Device;
use log::{debug, error, info, warn};
use serde::Serialize;
use signal_hook::consts::signal::{SIGINT, SIGTERM};

use crate::config::{Configuration, SharedConfig};
use crate::error::DeviceError;
use crate::event_loop::EventLoop;
use crate::hotplug::{HotplugAction, HotplugEvent, HotplugMonitor, INPUT_DIR};
use crate::input::{self, DeviceInfo};
use crate::ipc::server::IpcServer;
use crate::session::DeviceSession;

/// Permissions on a fresh node settle shortly after it appears.
const ARRIVAL_ATTEMPTS: u32 = 10;
const ARRIVAL_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Where the daemon finds and opens tablets.
pub trait DeviceBackend: Send + Sync {
    fn discover(&self) -> Vec<DeviceInfo>;
    /// Whether `path` is a tablet this daemon handles.
    fn probe(&self, path: &Path) -> Result<bool, DeviceError>;
    fn open(
        &self,
        path: &Path,
        config: SharedConfig,
        event_loop: &Arc<EventLoop>,
    ) -> Result<Arc<DeviceSession>, DeviceError>;
}

pub struct EvdevBackend;

impl DeviceBackend for EvdevBackend {
    fn discover(&self) -> Vec<DeviceInfo> {
        input::discover_tablets()
    }

    fn probe(&self, path: &Path) -> Result<bool, DeviceError> {
        let dev = Device::open(path)?;
        Ok(input::is_tablet(&dev))
    }

    fn open(
        &self,
        path: &Path,
        config: SharedConfig,
        event_loop: &Arc<EventLoop>,
    ) -> Result<Arc<DeviceSession>, DeviceError> {
        DeviceSession::open(path, config, event_loop)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub path: PathBuf,
    pub name: String,
    pub destroyed: bool,
    /// Still polled by the event loop.
    pub registered: bool,
}

pub struct Daemon {
    config: SharedConfig,
    config_path: PathBuf,
    event_loop: Arc<EventLoop>,
    devices: Mutex<HashMap<PathBuf, Arc<DeviceSession>>>,
    backend: Box<dyn DeviceBackend>,
    shutdown: Arc<AtomicBool>,
}

impl Daemon {
    pub fn new(
        config: Configuration,
        config_path: PathBuf,
        backend: Box<dyn DeviceBackend>,
    ) -> Result<Self> {
        Ok(Self {
            config: SharedConfig::new(config),
            config_path,
            event_loop: Arc::new(EventLoop::new()?),
            devices: Mutex::new(HashMap::new()),
            backend,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn event_loop(&self) -> &Arc<EventLoop> {
        &self.event_loop
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn devices(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<DeviceSession>>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_initial_devices(&self) {
        let found = self.backend.discover();
        if found.is_empty() {
            info!("daemon: no tablets connected yet");
        }
        for info in found {
            if let Err(e) = self.add_device(&info.path) {
                warn!("daemon: failed to set up {} ({}): {e}", info.name, info.path.display());
            }
        }
    }

    /// Starts a session for `path` unless a live one already exists.
    /// Sessions that died on a read failure are swept first.
    pub fn add_device(&self, path: &Path) -> Result<bool, DeviceError> {
        let mut devices = self.devices();
        devices.retain(|p, s| {
            let keep = !s.is_destroyed();
            if !keep {
                debug!("daemon: sweeping dead session for {}", p.display());
            }
            keep
        });
        if devices.contains_key(path) {
            debug!("daemon: {} already has a session", path.display());
            return Ok(false);
        }
        let session = self
            .backend
            .open(path, self.config.clone(), &self.event_loop)?;
        info!("daemon: added '{}' at {}", session.name(), path.display());
        devices.insert(path.to_path_buf(), session);
        Ok(true)
    }

    /// Drops the session only if this call destroyed it.
    pub fn remove_device(&self, path: &Path) -> bool {
        let mut devices = self.devices();
        let Some(session) = devices.get(path).cloned() else {
            debug!("daemon: removal of untracked {}", path.display());
            return false;
        };
        if !session.cleanup() {
            return false;
        }
        devices.remove(path);
        info!("daemon: removed {}", path.display());
        true
    }

    pub fn on_hotplug(&self, event: HotplugEvent) {
        match event.action {
            HotplugAction::Arrival => self.on_arrival(&event.path),
            HotplugAction::Removal => {
                self.remove_device(&event.path);
            }
        }
    }

    fn on_arrival(&self, path: &Path) {
        let mut attempt = 1;
        let is_tablet = loop {
            match self.backend.probe(path) {
                Ok(t) => break t,
                Err(e) if attempt < ARRIVAL_ATTEMPTS => {
                    debug!("hotplug: probing {} (attempt {attempt}): {e}", path.display());
                    attempt += 1;
                    thread::sleep(ARRIVAL_RETRY_DELAY);
                }
                Err(e) => {
                    debug!("hotplug: giving up on {}: {e}", path.display());
                    return;
                }
            }
        };
        if !is_tablet {
            return;
        }
        if let Err(e) = self.add_device(path) {
            warn!("hotplug: failed to set up {}: {e}", path.display());
        }
    }

    pub fn device_list(&self) -> Vec<DeviceStatus> {
        let mut list: Vec<DeviceStatus> = self
            .devices()
            .iter()
            .map(|(path, s)| DeviceStatus {
                path: path.clone(),
                name: s.name().to_string(),
                destroyed: s.is_destroyed(),
                registered: self.event_loop.is_registered(s.raw_fd()),
            })
            .collect();
        list.sort_by(|a, b| a.path.cmp(&b.path));
        list
    }

    pub fn cleanup_all(&self) {
        let sessions: Vec<_> = self.devices().drain().map(|(_, s)| s).collect();
        for s in sessions {
            s.cleanup();
        }
    }
}

/// The running engine: event loop thread plus hotplug listener.
pub struct Engine {
    daemon: Arc<Daemon>,
    event_thread: Option<JoinHandle<Result<(), DeviceError>>>,
    hotplug: HotplugMonitor,
}

impl Engine {
    pub fn start(daemon: Arc<Daemon>, input_dir: &Path) -> Result<Self> {
        let hotplug = {
            let d = daemon.clone();
            HotplugMonitor::start(input_dir, move |e| d.on_hotplug(e), daemon.shutdown_flag())?
        };
        let event_thread = {
            let event_loop = daemon.event_loop().clone();
            let shutdown = daemon.shutdown_flag();
            thread::spawn(move || event_loop.run(&shutdown))
        };
        daemon.add_initial_devices();
        Ok(Self {
            daemon,
            event_thread: Some(event_thread),
            hotplug,
        })
    }

    pub fn shutdown(mut self) {
        self.daemon.request_shutdown();
        self.hotplug.stop();
        if let Some(t) = self.event_thread.take() {
            match t.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("event loop failed: {e}"),
                Err(_) => error!("event loop panicked"),
            }
        }
        self.daemon.cleanup_all();
        if !self.daemon.event_loop().is_empty() {
            warn!("event loop still holds {} sessions", self.daemon.event_loop().len());
        }
    }
}

#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub config_path: PathBuf,
    pub socket_path: PathBuf,
}

/// Runs until SIGINT, SIGTERM or an IPC `shutdown`.
pub fn run(opts: DaemonOptions) -> Result<()> {
    let config = Configuration::load_or_install_default(&opts.config_path)?;
    info!("daemon: configuration from {}", opts.config_path.display());

    let daemon = Arc::new(Daemon::new(config, opts.config_path, Box::new(EvdevBackend))?);
    for sig in [SIGINT, SIGTERM] {
        signal_hook::flag::register(sig, daemon.shutdown_flag())
            .map_err(|e| anyhow!("failed to install handler for signal {sig}: {e}"))?;
    }

    let engine = Engine::start(daemon.clone(), Path::new(INPUT_DIR))?;
    let ipc = match IpcServer::start(&opts.socket_path, daemon.clone()) {
        Ok(s) => s,
        Err(e) => {
            engine.shutdown();
            return Err(e);
        }
    };

    while !daemon.is_shutting_down() {
        thread::sleep(Duration::from_millis(100));
    }
    info!("daemon: shutting down");

    engine.shutdown();
    ipc.stop();
    info!("daemon: bye");
    Ok(())
}
