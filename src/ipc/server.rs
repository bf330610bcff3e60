use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::{
    fs,
    io::{self, BufRead, BufReader, Write},
    os::unix::{
        fs::PermissionsExt,
        net::{UnixListener, UnixStream},
    },
    path::{Path, PathBuf},
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use super::handlers::{error_response, handle_request};
use crate::daemon::Daemon;

const ACCEPT_IDLE: Duration = Duration::from_millis(10);

/// Accept loop on its own thread; every client gets a thread of its own.
pub struct IpcServer {
    path: PathBuf,
    thread: Option<JoinHandle<()>>,
}

impl IpcServer {
    pub fn start(path: &Path, daemon: Arc<Daemon>) -> Result<Self> {
        if path.exists() {
            let _ = fs::remove_file(path);
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating socket dir {}", dir.display()))?;
        }
        let listener = UnixListener::bind(path)
            .with_context(|| format!("binding {}", path.display()))?;
        // program mappings can run as any user; keep the socket to the owner
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        listener.set_nonblocking(true)?;
        info!("ipc: listening on {}", path.display());

        let thread = thread::spawn(move || {
            while !daemon.is_shutting_down() {
                match listener.accept() {
                    Ok((stream, _)) => {
                        let d = daemon.clone();
                        thread::spawn(move || {
                            if let Err(e) = handle_client(stream, &d) {
                                error!("ipc client error: {e}");
                            }
                        });
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_IDLE),
                    Err(e) => {
                        warn!("ipc: accept failed: {e}");
                        thread::sleep(ACCEPT_IDLE);
                    }
                }
            }
            debug!("ipc: accept loop stopped");
        });

        Ok(Self {
            path: path.to_path_buf(),
            thread: Some(thread),
        })
    }

    /// Joins the accept loop (it exits once shutdown is requested) and
    /// removes the socket.
    pub fn stop(mut self) {
        if let Some(t) = self.thread.take() {
            if t.join().is_err() {
                error!("ipc: accept loop panicked");
            }
        }
        let _ = fs::remove_file(&self.path);
    }
}

fn handle_client(stream: UnixStream, daemon: &Daemon) -> Result<()> {
    stream.set_nonblocking(false)?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim().is_empty() {
        return Ok(());
    }
    let resp = match serde_json::from_str::<serde_json::Value>(&line) {
        Ok(req) => handle_request(daemon, &req),
        Err(e) => error_response(format!("malformed request: {e}")),
    };
    let mut stream = stream;
    writeln!(stream, "{resp}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::Configuration;
    use crate::ipc::client_request;
    use crate::testing::NoDevices;

    #[test]
    fn serves_requests_and_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("run").join("veikkd.sock");
        let daemon = Arc::new(
            Daemon::new(
                Configuration::default(),
                dir.path().join("veikkd.toml"),
                Box::new(NoDevices),
            )
            .unwrap(),
        );
        let server = IpcServer::start(&sock, daemon.clone()).unwrap();
        let mode = fs::metadata(&sock).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let r = client_request(&sock, json!({"op": "devices"})).unwrap();
        assert_eq!(r["ok"], true);
        assert_eq!(r["data"]["devices"], json!([]));

        let r = client_request(&sock, json!({"op": "bogus"})).unwrap();
        assert_eq!(r["ok"], false);

        let r = client_request(&sock, json!({"op": "shutdown"})).unwrap();
        assert_eq!(r["ok"], true);
        assert!(daemon.is_shutting_down());

        server.stop();
        assert!(!sock.exists());
    }

    #[test]
    fn malformed_json_gets_an_error_line() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("veikkd.sock");
        let daemon = Arc::new(
            Daemon::new(Configuration::default(), dir.path().join("c.toml"), Box::new(NoDevices))
                .unwrap(),
        );
        let server = IpcServer::start(&sock, daemon.clone()).unwrap();

        let mut stream = UnixStream::connect(&sock).unwrap();
        stream.write_all(b"{not json\n").unwrap();
        let mut resp = String::new();
        BufReader::new(stream).read_line(&mut resp).unwrap();
        let v: serde_json::Value = serde_json::from_str(&resp).unwrap();
        assert_eq!(v["ok"], false);

        daemon.request_shutdown();
        server.stop();
    }
}
