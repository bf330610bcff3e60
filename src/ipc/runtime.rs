use directories::{BaseDirs, UserDirs};
use nix::unistd::geteuid;
use std::{fs, path::PathBuf};

const SOCKET_NAME: &str = "veikkd.sock";

/// `$XDG_RUNTIME_DIR`, or `~/.local/run` where there is none.
pub fn runtime_dir() -> PathBuf {
    if let Some(dir) = BaseDirs::new().and_then(|b| b.runtime_dir().map(|d| d.to_path_buf())) {
        return dir;
    }
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .unwrap_or_else(std::env::temp_dir);
    let dir = home.join(".local").join("run");
    let _ = fs::create_dir_all(&dir);
    dir
}

/// `/run/veikkd.sock` for a root daemon. Unprivileged callers use it too
/// when it exists, so they reach a system daemon before a per-user one.
pub fn socket_path() -> PathBuf {
    let system = PathBuf::from("/run").join(SOCKET_NAME);
    if geteuid().is_root() || system.exists() {
        system
    } else {
        runtime_dir().join(SOCKET_NAME)
    }
}
