//! Configuration channel: one JSON request per line on a Unix socket, one
//! `{"ok": .., "data" | "error": ..}` line back.

pub mod handlers;
pub mod runtime;
pub mod server;

use std::{
    io::{BufRead, BufReader, Write},
    os::unix::net::UnixStream,
    path::Path,
};

use anyhow::{Result, anyhow};

pub fn client_request(socket: &Path, req: serde_json::Value) -> Result<serde_json::Value> {
    if !socket.exists() {
        return Err(anyhow!(
            "veikkd is not running (socket missing at {})",
            socket.display()
        ));
    }
    let mut stream = UnixStream::connect(socket)?;
    let line = serde_json::to_string(&req)? + "\n";
    stream.write_all(line.as_bytes())?;
    let mut reader = BufReader::new(stream);
    let mut resp = String::new();
    reader.read_line(&mut resp)?;
    if resp.trim().is_empty() {
        return Err(anyhow!("daemon closed the connection without answering"));
    }
    Ok(serde_json::from_str(&resp)?)
}
