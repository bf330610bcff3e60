use anyhow::{Result, anyhow};
use serde_json::{Value, json};
use std::{fs, path::Path, path::PathBuf};

use crate::command::{Command, PenTransformCommand};
use crate::config::Configuration;
use crate::daemon::Daemon;
use crate::event::Keycode;
use crate::input;

pub fn ok_response(data: Value) -> Value {
    json!({"ok": true, "data": data})
}

pub fn error_response(msg: impl Into<String>) -> Value {
    json!({"ok": false, "error": msg.into()})
}

/// Errors never leave this function; they become `{"ok": false}` responses.
pub fn handle_request(daemon: &Daemon, req: &Value) -> Value {
    let op = req.get("op").and_then(|v| v.as_str()).unwrap_or("");
    match dispatch(daemon, op, req) {
        Ok(data) => ok_response(data),
        Err(e) => error_response(format!("{e:#}")),
    }
}

fn dispatch(daemon: &Daemon, op: &str, req: &Value) -> Result<Value> {
    match op {
        "status" => Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "config_path": daemon.config_path(),
            "devices": daemon.device_list().len(),
            "polled": daemon.event_loop().len(),
            "shutting_down": daemon.is_shutting_down(),
        })),
        "devices" => Ok(json!({"devices": daemon.device_list()})),
        "map_button" => {
            let keycode = keycode_arg(req)?;
            let command: Command = toml::from_str(str_arg(req, "command")?)?;
            let kind = command.type_name();
            let applied = daemon.config().map_button(keycode, command)?;
            Ok(json!({"keycode": keycode.name(), "type": kind, "applied": applied}))
        }
        "unmap_button" => {
            let keycode = keycode_arg(req)?;
            let applied = daemon.config().unmap_button(keycode);
            Ok(json!({"keycode": keycode.name(), "applied": applied}))
        }
        "map_pen" => {
            let command: PenTransformCommand = toml::from_str(str_arg(req, "command")?)?;
            daemon.config().map_pen(command);
            Ok(json!("pen transform updated"))
        }
        "get_config" => Ok(json!({"config": daemon.config().read().to_toml()?})),
        "load_config" => {
            let path = path_arg(daemon, req);
            let cfg = Configuration::load(&path)?;
            daemon.config().replace(cfg);
            Ok(json!({"loaded": path}))
        }
        "save_config" => {
            let path = path_arg(daemon, req);
            daemon.config().snapshot().save(&path)?;
            Ok(json!({"saved": path}))
        }
        "doctor" => Ok(doctor_report(daemon)),
        "shutdown" => {
            daemon.request_shutdown();
            Ok(json!("shutting down"))
        }
        _ => Err(anyhow!("unknown op: {op}")),
    }
}

fn str_arg<'a>(req: &'a Value, name: &str) -> Result<&'a str> {
    req.get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("missing string field '{name}'"))
}

fn keycode_arg(req: &Value) -> Result<Keycode> {
    Ok(str_arg(req, "keycode")?.parse()?)
}

fn path_arg(daemon: &Daemon, req: &Value) -> PathBuf {
    req.get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .unwrap_or_else(|| daemon.config_path().to_path_buf())
}

fn doctor_report(daemon: &Daemon) -> Value {
    let tablets: Vec<String> = input::discover_tablets()
        .into_iter()
        .map(|d| format!("{} ({})", d.name, d.path.display()))
        .collect();
    json!({
        "user": whoami::username(),
        "uinput_present": Path::new("/dev/uinput").exists(),
        "input_group_member": check_in_input_group(),
        "config_path": daemon.config_path(),
        "tablets": tablets,
        "sessions": daemon.device_list(),
        "hints": {
            "run_as_root": "the daemon needs read access to /dev/input and write access to /dev/uinput",
            "add_user_to_input_group": "sudo usermod -aG input $USER && newgrp input"
        }
    })
}

fn check_in_input_group() -> bool {
    let Ok(s) = fs::read_to_string("/etc/group") else {
        return false;
    };
    let user = whoami::username();
    s.lines()
        .filter(|line| line.starts_with("input:"))
        .any(|line| {
            line.split(':')
                .nth(3)
                .unwrap_or("")
                .split(',')
                .any(|u| u == user)
        })
}
