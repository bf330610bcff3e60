use std::{
    collections::BTreeMap,
    os::unix::process::CommandExt,
    path::PathBuf,
    process::{self, Stdio},
    thread,
};

use anyhow::{Context, Result};
use log::{debug, error, info};
use nix::unistd::User;
use serde::{Deserialize, Serialize};

use super::CommandTriggerMap;
use crate::error::ConfigError;
use crate::event::InputEvent;

/// Terminal used for `run_in_terminal`; xterm is the one most likely installed.
const TERMINAL: &str = "xterm";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnOptions {
    /// Start the child in its own process group.
    pub new_session: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl SpawnOptions {
    fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// Runs a shell command line when the button fires.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgramCommand {
    pub command: String,
    #[serde(default)]
    pub run_in_terminal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_user: Option<String>,
    #[serde(default)]
    pub triggers: CommandTriggerMap,
    #[serde(default, skip_serializing_if = "SpawnOptions::is_default")]
    pub options: SpawnOptions,
}

impl ProgramCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn should_fire(&self, event: &InputEvent) -> bool {
        !event.is_sync() && self.triggers.fires(event.value)
    }

    /// The process to spawn, with the privilege drop and user environment
    /// applied when `run_as_user` is set.
    pub fn build(&self) -> Result<process::Command, ConfigError> {
        let mut cmd = if self.run_in_terminal {
            let mut c = process::Command::new(TERMINAL);
            c.args(["-e", "sh", "-c", &self.command]);
            c
        } else {
            let mut c = process::Command::new("sh");
            c.args(["-c", &self.command]);
            c
        };

        if let Some(name) = &self.run_as_user {
            let user = User::from_name(name)
                .map_err(|source| ConfigError::UserLookup {
                    name: name.clone(),
                    source,
                })?
                .ok_or_else(|| ConfigError::UnknownUser(name.clone()))?;

            cmd.env("HOME", &user.dir)
                .env("USER", &user.name)
                .env("LOGNAME", &user.name)
                .env("PWD", &user.dir)
                .env("DISPLAY", ":0")
                .env("XAUTHORITY", user.dir.join(".Xauthority"))
                .current_dir(&user.dir)
                .gid(user.gid.as_raw())
                .uid(user.uid.as_raw());
        }

        if let Some(dir) = &self.options.working_dir {
            cmd.current_dir(dir);
        }
        cmd.envs(&self.options.env);
        if self.options.new_session {
            cmd.process_group(0);
        }
        cmd.stdin(Stdio::null());
        Ok(cmd)
    }

    /// Starts the process and hands the child to a reaper thread.
    pub fn spawn(&self) -> Result<u32> {
        let mut child = self
            .build()?
            .spawn()
            .with_context(|| format!("failed to spawn '{}'", self.command))?;
        let pid = child.id();
        thread::spawn(move || match child.wait() {
            Ok(status) => debug!("program {pid} exited: {status}"),
            Err(e) => debug!("program {pid}: wait failed: {e}"),
        });
        Ok(pid)
    }

    /// Never fails: a broken mapping must not take the event path down with it.
    pub fn execute(&self, event: &InputEvent) {
        if !self.should_fire(event) {
            return;
        }
        match self.spawn() {
            Ok(pid) => info!("program: started '{}' (pid={pid})", self.command),
            Err(e) => error!("program: {e:#}"),
        }
    }
}
