//! Arrival/removal notifications for `/dev/input/eventN` nodes.

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::input::is_event_node;

pub const INPUT_DIR: &str = "/dev/input";

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugAction {
    Arrival,
    Removal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotplugEvent {
    pub action: HotplugAction,
    pub path: PathBuf,
}

/// Event nodes created or removed by one filesystem notification.
pub fn classify(event: &notify::Event) -> Vec<HotplugEvent> {
    let action = match event.kind {
        EventKind::Create(_) => HotplugAction::Arrival,
        EventKind::Remove(_) => HotplugAction::Removal,
        _ => return Vec::new(),
    };
    event
        .paths
        .iter()
        .filter(|p| is_event_node(p))
        .map(|p| HotplugEvent {
            action,
            path: p.clone(),
        })
        .collect()
}

/// Watches a directory and feeds classified events to a handler on its own
/// thread.
pub struct HotplugMonitor {
    watcher: Option<RecommendedWatcher>,
    thread: Option<JoinHandle<()>>,
}

impl HotplugMonitor {
    pub fn start<F>(dir: &Path, mut handler: F, shutdown: Arc<AtomicBool>) -> Result<Self>
    where
        F: FnMut(HotplugEvent) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<notify::Result<notify::Event>>();
        let mut watcher = notify::recommended_watcher(tx).context("hotplug: creating watcher")?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("hotplug: watching {}", dir.display()))?;
        info!("hotplug: watching {}", dir.display());

        let thread = thread::spawn(move || {
            loop {
                match rx.recv_timeout(POLL_INTERVAL) {
                    Ok(Ok(event)) => classify(&event).into_iter().for_each(&mut handler),
                    Ok(Err(e)) => warn!("hotplug: watch error: {e}"),
                    Err(RecvTimeoutError::Timeout) => {
                        if shutdown.load(Ordering::SeqCst) {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!("hotplug: listener stopped");
        });

        Ok(Self {
            watcher: Some(watcher),
            thread: Some(thread),
        })
    }

    /// Drops the watcher, which disconnects the channel, then joins.
    pub fn stop(&mut self) {
        self.watcher.take();
        if let Some(t) = self.thread.take() {
            if t.join().is_err() {
                warn!("hotplug: listener panicked");
            }
        }
    }
}

impl Drop for HotplugMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
