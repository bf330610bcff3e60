use std::{io, path::PathBuf};

use crate::event::Keycode;

/// Failures talking to physical or virtual input devices.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("uinput: {0}")]
    Uinput(#[from] uinput::Error),
    #[error("epoll: {0}")]
    Sys(#[from] nix::errno::Errno),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("button {0} cannot be mapped to a pen transform")]
    PenCommandOnButton(Keycode),
    #[error("unknown key name '{0}'")]
    UnknownKeycode(String),
    #[error("unknown user '{0}'")]
    UnknownUser(String),
    #[error("failed to look up user '{name}': {source}")]
    UserLookup {
        name: String,
        source: nix::errno::Errno,
    },
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}
