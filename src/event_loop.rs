//! Single epoll loop fanning readiness out to device sessions.

use std::{
    collections::HashMap,
    os::fd::{BorrowedFd, RawFd},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use log::{debug, trace};
use nix::{
    errno::Errno,
    sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags},
};

use crate::error::DeviceError;
use crate::session::DeviceSession;

/// How long a wait may block before the shutdown flag is checked again.
const WAIT_TIMEOUT_MS: u16 = 100;
const MAX_EVENTS: usize = 16;

pub struct EventLoop {
    epoll: Epoll,
    sessions: Mutex<HashMap<RawFd, Arc<DeviceSession>>>,
}

impl EventLoop {
    pub fn new() -> Result<Self, DeviceError> {
        Ok(Self {
            epoll: Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)?,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<RawFd, Arc<DeviceSession>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Safe to call from any thread, including while [`run`](Self::run) waits.
    pub fn register(&self, session: Arc<DeviceSession>) -> Result<(), DeviceError> {
        let fd = session.raw_fd();
        let mut sessions = self.sessions();
        sessions.insert(fd, session);
        // SAFETY: the fd belongs to the session's source, which the map now
        // keeps alive until `unregister` removes it from epoll.
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        if let Err(e) = self
            .epoll
            .add(borrowed, EpollEvent::new(EpollFlags::EPOLLIN, fd as u64))
        {
            sessions.remove(&fd);
            return Err(e.into());
        }
        Ok(())
    }

    /// Returns `false` if `fd` was not registered.
    pub fn unregister(&self, fd: RawFd) -> bool {
        let Some(session) = self.sessions().remove(&fd) else {
            return false;
        };
        // SAFETY: `session` still owns the fd.
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        match self.epoll.delete(borrowed) {
            Ok(()) | Err(Errno::ENOENT) | Err(Errno::EBADF) => {}
            Err(e) => debug!("epoll: removing fd {fd} from '{}': {e}", session.name()),
        }
        true
    }

    pub fn is_registered(&self, fd: RawFd) -> bool {
        self.sessions().contains_key(&fd)
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }

    /// Dispatches readiness until `shutdown` is set.
    pub fn run(&self, shutdown: &AtomicBool) -> Result<(), DeviceError> {
        let mut events = [EpollEvent::empty(); MAX_EVENTS];
        while !shutdown.load(Ordering::SeqCst) {
            let n = match self.epoll.wait(&mut events, WAIT_TIMEOUT_MS) {
                Ok(n) => n,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            };
            for ev in &events[..n] {
                let fd = ev.data() as RawFd;
                // lock released before the session runs; it may unregister itself
                let session = self.sessions().get(&fd).cloned();
                match session {
                    Some(s) => s.handle_events(),
                    None => trace!("epoll: stale readiness for fd {fd}"),
                }
            }
        }
        debug!("event loop: stopped");
        Ok(())
    }
}
