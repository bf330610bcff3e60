use anyhow::{Result, anyhow, bail};
use pico_args::Arguments;
use std::{env, path::PathBuf, process};

use crate::command::{
    Command, CommandTrigger, CommandTriggerMap, KeyComboCommand, PenTransformCommand,
    ProgramCommand,
};
use crate::config;
use crate::daemon::{self, DaemonOptions};
use crate::event::Keycode;
use crate::ipc::{self, runtime};
use crate::transform::{
    AffineTransform1D, CANONICAL_DIM, Orientation, canonical_to_screen,
    rotation_scale_offset_matrix,
};

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    let socket: PathBuf = pargs
        .opt_value_from_str("--socket")?
        .unwrap_or_else(runtime::socket_path);
    let config_path: Option<PathBuf> = pargs.opt_value_from_str("--config")?;

    // Hidden daemon mode (spawned by `start`)
    if pargs.contains("--daemon") {
        return daemon::run(daemon_options(config_path, socket));
    }

    if env::args().len() == 1 || pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    let subcmd: Option<String> = pargs.free_from_str().ok();
    let client = Client { socket };

    match subcmd.as_deref() {
        Some("help") => {
            let topic: Option<String> = pargs.free_from_str().ok();
            match topic {
                Some(t) => print_subcmd_help(&t),
                None => print_help(),
            }
            Ok(())
        }

        Some("version") => {
            println!("veikkd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }

        Some("daemon") => daemon::run(daemon_options(config_path, client.socket)),

        Some("start") => {
            let exe = env::current_exe()?;
            let mut cmd = process::Command::new(exe);
            cmd.arg("--daemon").arg("--socket").arg(&client.socket);
            if let Some(p) = &config_path {
                cmd.arg("--config").arg(p);
            }
            let child = cmd.spawn()?;
            println!("veikkd: started daemon (pid={})", child.id());
            Ok(())
        }

        Some("stop") => client.print("shutdown", serde_json::json!({})),
        Some("status") => client.print("status", serde_json::json!({})),
        Some("devices") => client.print("devices", serde_json::json!({})),
        Some("doctor") => client.print("doctor", serde_json::json!({})),

        Some("get-config") => {
            let data = client.request("get_config", serde_json::json!({}))?;
            print!("{}", data["config"].as_str().unwrap_or_default());
            Ok(())
        }

        Some("load") => {
            let path: Option<PathBuf> = pargs.opt_free_from_str()?;
            client.print("load_config", serde_json::json!({ "path": path }))
        }

        Some("save") => {
            let path: Option<PathBuf> = pargs.opt_free_from_str()?;
            client.print("save_config", serde_json::json!({ "path": path }))
        }

        Some("map-button") => {
            let command = parse_button_command(&mut pargs)?;
            let button: Keycode = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: veikkd map-button <BUTTON> (--keys ..|--program ..|--noop)"))?;
            let text = toml::to_string(&command)?;
            client.print(
                "map_button",
                serde_json::json!({"keycode": button.name(), "command": text}),
            )
        }

        Some("unmap-button") => {
            let button: Keycode = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: veikkd unmap-button <BUTTON>"))?;
            client.print("unmap_button", serde_json::json!({"keycode": button.name()}))
        }

        Some("map-pen") => {
            let (pen, screen) = parse_pen_command(&mut pargs)?;
            println!("{}", describe_mapping(&pen, screen));
            let text = toml::to_string(&pen)?;
            client.print("map_pen", serde_json::json!({"command": text}))
        }

        Some(other) => {
            eprintln!("unknown subcommand: {other}\n");
            print_help();
            Ok(())
        }

        None => {
            print_help();
            Ok(())
        }
    }
}

fn daemon_options(config_path: Option<PathBuf>, socket_path: PathBuf) -> DaemonOptions {
    DaemonOptions {
        config_path: config_path.unwrap_or_else(config::default_config_path),
        socket_path,
    }
}

struct Client {
    socket: PathBuf,
}

impl Client {
    /// Sends `op` with `args` merged in; returns `data` or the daemon's error.
    fn request(&self, op: &str, mut args: serde_json::Value) -> Result<serde_json::Value> {
        args["op"] = serde_json::Value::from(op);
        let mut r = ipc::client_request(&self.socket, args)?;
        if r["ok"].as_bool() != Some(true) {
            bail!("{}", r["error"].as_str().unwrap_or("request failed"));
        }
        Ok(r["data"].take())
    }

    fn print(&self, op: &str, args: serde_json::Value) -> Result<()> {
        let data = self.request(op, args)?;
        println!("{}", serde_json::to_string_pretty(&data).unwrap_or_default());
        Ok(())
    }
}

fn parse_button_command(pargs: &mut Arguments) -> Result<Command> {
    if pargs.contains("--noop") {
        return Ok(Command::Noop);
    }
    if let Some(keys) = pargs.opt_value_from_str::<_, String>("--keys")? {
        let keys = parse_list(&keys, |k| k.parse::<Keycode>().map_err(Into::into))?;
        if keys.is_empty() {
            bail!("--keys needs at least one key");
        }
        return Ok(Command::KeyCombo(KeyComboCommand::new(keys)));
    }
    if let Some(line) = pargs.opt_value_from_str::<_, String>("--program")? {
        let mut program = ProgramCommand::new(line);
        program.run_in_terminal = pargs.contains("--terminal");
        program.run_as_user = pargs.opt_value_from_str("--user")?;
        if let Some(t) = pargs.opt_value_from_str::<_, String>("--triggers")? {
            program.triggers = CommandTriggerMap::new(&parse_list(&t, parse_trigger)?);
        }
        program.options.working_dir = pargs.opt_value_from_str("--workdir")?;
        program.options.new_session = pargs.contains("--new-session");
        return Ok(Command::Program(program));
    }
    bail!("map-button needs one of --keys, --program or --noop")
}

/// The pen command and the screen size it was built for.
fn parse_pen_command(pargs: &mut Arguments) -> Result<(PenTransformCommand, (f64, f64))> {
    let screen: String = pargs
        .opt_value_from_str("--screen")?
        .ok_or_else(|| anyhow!("usage: veikkd map-pen --screen WxH [--area X,Y,W,H] [--orientation O]"))?;
    let (sw, sh) = parse_screen(&screen)?;
    let (rx, ry, rw, rh) = match pargs.opt_value_from_str::<_, String>("--area")? {
        Some(a) => parse_area(&a)?,
        None => (0.0, 0.0, sw, sh),
    };
    let orientation: Orientation = pargs
        .opt_value_from_str("--orientation")?
        .unwrap_or(Orientation::Normal);
    let pressure = match pargs.opt_value_from_str::<_, String>("--pressure")? {
        Some(p) => match parse_list(&p, parse_f64)?.as_slice() {
            [scale, offset] => AffineTransform1D::new(*scale, *offset),
            _ => bail!("--pressure takes SCALE,OFFSET"),
        },
        None => AffineTransform1D::IDENTITY,
    };
    let pen = PenTransformCommand::new(
        rotation_scale_offset_matrix(orientation, sw, sh, rx, ry, rw, rh),
        pressure,
    );
    Ok((pen, (sw, sh)))
}

/// Where the tablet's corners land on screen, in pixels.
fn describe_mapping(pen: &PenTransformCommand, (sw, sh): (f64, f64)) -> String {
    let k = CANONICAL_DIM;
    let corners = [
        ("top-left", 0.0, 0.0),
        ("top-right", k, 0.0),
        ("bottom-right", k, k),
        ("bottom-left", 0.0, k),
    ];
    let mut out = String::from("tablet corners on screen:");
    for (label, x, y) in corners {
        let (cx, cy) = pen.coord_transform.transform(x, y);
        out.push_str(&format!(
            "\n  {label:<12} -> ({:.0}, {:.0})",
            canonical_to_screen(cx, sw),
            canonical_to_screen(cy, sh)
        ));
    }
    out
}

fn parse_list<T>(s: &str, f: impl Fn(&str) -> Result<T>) -> Result<Vec<T>> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(f)
        .collect()
}

fn parse_f64(s: &str) -> Result<f64> {
    s.parse().map_err(|_| anyhow!("not a number: {s}"))
}

fn parse_trigger(s: &str) -> Result<CommandTrigger> {
    match s.to_ascii_uppercase().as_str() {
        "KEYUP" => Ok(CommandTrigger::KeyUp),
        "KEYDOWN" => Ok(CommandTrigger::KeyDown),
        "KEYPRESS" => Ok(CommandTrigger::KeyPress),
        _ => Err(anyhow!("unknown trigger '{s}' (KEYUP, KEYDOWN, KEYPRESS)")),
    }
}

/// `1920x1080`; zero dimensions are rejected here, the transform math
/// does not check.
fn parse_screen(s: &str) -> Result<(f64, f64)> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("screen size must look like 1920x1080"))?;
    let (w, h) = (parse_f64(w.trim())?, parse_f64(h.trim())?);
    if w <= 0.0 || h <= 0.0 {
        bail!("screen dimensions must be positive, got {s}");
    }
    Ok((w, h))
}

fn parse_area(s: &str) -> Result<(f64, f64, f64, f64)> {
    match parse_list(s, parse_f64)?.as_slice() {
        [x, y, w, h] if *w > 0.0 && *h > 0.0 => Ok((*x, *y, *w, *h)),
        _ => bail!("area must be X,Y,W,H with positive width and height"),
    }
}

fn print_help() {
    println!(
        r#"veikkd - VEIKK tablet input daemon

USAGE:
  veikkd help [command]                    Show general or command-specific help
  veikkd daemon                            Run the daemon in the foreground
  veikkd start                             Start the daemon in the background
  veikkd stop                              Stop the daemon
  veikkd status                            Show daemon state
  veikkd devices                           List connected tablets
  veikkd doctor                            Diagnose permissions/devices
  veikkd map-button <BUTTON> --keys K1,K2  Map a button to a key combination
  veikkd map-button <BUTTON> --program CMD Map a button to a shell command
  veikkd unmap-button <BUTTON>             Make a button do nothing
  veikkd map-pen --screen WxH              Map the pen onto (part of) the screen
  veikkd get-config                        Print the running configuration
  veikkd load [PATH]                       Load configuration into the daemon
  veikkd save [PATH]                       Save the running configuration
  veikkd version                           Show version

OPTIONS:
  --socket PATH   IPC socket (default /run/veikkd.sock for root)
  --config PATH   Daemon configuration (default /etc/veikkd.toml for root)

Set RUST_LOG=debug for more daemon output.
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "daemon" => println!("usage: veikkd daemon [--config PATH] [--socket PATH]\nRuns in the foreground until SIGINT/SIGTERM."),
        "start" => println!("usage: veikkd start [--config PATH] [--socket PATH]\nStarts the background daemon."),
        "stop" => println!("usage: veikkd stop\nStops the running daemon."),
        "status" => println!("usage: veikkd status\nShows version, configuration path and device count."),
        "devices" => println!("usage: veikkd devices\nLists tablets the daemon has grabbed."),
        "doctor" => println!("usage: veikkd doctor\nChecks /dev/uinput, group membership and detected tablets."),
        "map-button" => println!(
            "usage:\n  veikkd map-button <BUTTON> --keys KEY_LEFTCTRL,KEY_Z\n  veikkd map-button <BUTTON> --program CMD [--terminal] [--user NAME] [--triggers KEYDOWN,KEYUP] [--workdir DIR] [--new-session]\n  veikkd map-button <BUTTON> --noop\nButtons: BTN_0..BTN_9, BTN_NORTH, BTN_SOUTH, BTN_WEST, BTN_EAST, BTN_TOOL_DOUBLETAP, BTN_WHEEL, BTN_TOUCH, BTN_STYLUS, BTN_STYLUS2"
        ),
        "unmap-button" => println!("usage: veikkd unmap-button <BUTTON>"),
        "map-pen" => println!(
            "usage: veikkd map-pen --screen WxH [--area X,Y,W,H] [--orientation normal|cw90|flipped|ccw90] [--pressure SCALE,OFFSET]"
        ),
        "get-config" => println!("usage: veikkd get-config\nPrints the running configuration as TOML."),
        "load" => println!("usage: veikkd load [PATH]\nReplaces the running configuration; defaults to the daemon's config file."),
        "save" => println!("usage: veikkd save [PATH]\nWrites the running configuration; defaults to the daemon's config file."),
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use super::*;

    fn args(v: &[&str]) -> Arguments {
        Arguments::from_vec(v.iter().map(OsString::from).collect())
    }

    #[test]
    fn screen_and_area_validation() {
        assert_eq!(parse_screen("1920x1080").unwrap(), (1920.0, 1080.0));
        assert!(parse_screen("0x1080").is_err());
        assert!(parse_screen("1920").is_err());
        assert_eq!(parse_area("10, 20, 300, 400").unwrap(), (10.0, 20.0, 300.0, 400.0));
        assert!(parse_area("10,20,0,400").is_err());
        assert!(parse_area("1,2,3").is_err());
    }

    #[test]
    fn key_combo_from_flags() {
        let mut a = args(&["--keys", "KEY_LEFTCTRL,KEY_Z", "BTN_0"]);
        match parse_button_command(&mut a).unwrap() {
            Command::KeyCombo(c) => assert_eq!(c.keys.len(), 2),
            other => panic!("{other:?}"),
        }
        let mut a = args(&["--keys", "KEY_WHAT"]);
        assert!(parse_button_command(&mut a).is_err());
    }

    #[test]
    fn program_from_flags_round_trips_as_toml() {
        let mut a = args(&[
            "--program", "krita", "--user", "alice", "--triggers", "keyup,KEYDOWN", "--terminal",
        ]);
        let cmd = parse_button_command(&mut a).unwrap();
        let text = toml::to_string(&cmd).unwrap();
        let back: Command = toml::from_str(&text).unwrap();
        match back {
            Command::Program(p) => {
                assert_eq!(p.command, "krita");
                assert!(p.run_in_terminal);
                assert_eq!(p.run_as_user.as_deref(), Some("alice"));
                assert!(p.triggers.fires(0) && p.triggers.fires(1) && !p.triggers.fires(2));
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn button_command_is_required() {
        assert!(parse_button_command(&mut args(&["BTN_0"])).is_err());
        assert!(matches!(
            parse_button_command(&mut args(&["--noop"])).unwrap(),
            Command::Noop
        ));
    }

    #[test]
    fn map_pen_builds_rotated_full_screen_transform() {
        let mut a = args(&["--screen", "1920x1080", "--orientation", "cw90"]);
        let (pen, screen) = parse_pen_command(&mut a).unwrap();
        assert_eq!(screen, (1920.0, 1080.0));
        let k = CANONICAL_DIM;
        let (x, y) = pen.coord_transform.transform(k / 2.0, k / 2.0);
        assert!((canonical_to_screen(x, 1920.0) - 960.0).abs() < 1e-6);
        assert!((canonical_to_screen(y, 1080.0) - 540.0).abs() < 1e-6);
        assert_eq!(pen.pressure_transform, AffineTransform1D::IDENTITY);

        let mut a = args(&["--screen", "1920x1080", "--pressure", "0.5,10"]);
        let (pen, _) = parse_pen_command(&mut a).unwrap();
        assert_eq!(pen.pressure_transform, AffineTransform1D::new(0.5, 10.0));

        assert!(parse_pen_command(&mut args(&["--screen", "0x0"])).is_err());
        assert!(parse_pen_command(&mut args(&[])).is_err());
    }

    #[test]
    fn mapping_summary_names_rotated_corners() {
        let mut a = args(&["--screen", "1920x1080", "--orientation", "cw90"]);
        let (pen, screen) = parse_pen_command(&mut a).unwrap();
        let text = describe_mapping(&pen, screen);
        assert!(text.contains("top-left     -> (1920, 0)"), "{text}");
        assert!(text.contains("bottom-left  -> (0, 0)"), "{text}");
    }
}
