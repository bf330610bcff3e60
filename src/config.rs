//! Button and pen mappings, their TOML form, and the shared handle sessions
//! dispatch through.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use directories::ProjectDirs;
use log::{info, warn};
use nix::unistd::geteuid;
use serde::{Deserialize, Serialize};

use crate::command::{Command, PenTransformCommand};
use crate::error::{ConfigError, DeviceError};
use crate::event::{BTN_TOOL_PEN, EV_ABS, EV_KEY, InputEvent, Keycode, is_valid_button};
use crate::output::Outputs;

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// On-disk shape of a [`Configuration`].
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub buttons: BTreeMap<Keycode, Command>,
    #[serde(default)]
    pub pen: PenTransformCommand,
}

/// Whitelisted buttons mapped to commands, plus the one pen command.
/// No button ever maps to a pen transform.
#[derive(Debug, Clone, Default)]
pub struct Configuration {
    buttons: HashMap<Keycode, Command>,
    pen: PenTransformCommand,
}

impl Configuration {
    pub fn from_file(file: ConfigFile) -> Result<Self, ConfigError> {
        let mut cfg = Self {
            buttons: HashMap::new(),
            pen: file.pen,
        };
        for (keycode, command) in file.buttons {
            if !cfg.map_button(keycode, command)? {
                warn!("config: ignoring mapping for {keycode}: not a tablet button");
            }
        }
        Ok(cfg)
    }

    pub fn to_file(&self) -> ConfigFile {
        ConfigFile {
            buttons: self
                .buttons
                .iter()
                .map(|(k, c)| (*k, c.clone()))
                .collect(),
            pen: self.pen.clone(),
        }
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Self::from_file(toml::from_str(text)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&self.to_file())?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = self.to_toml()?;
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(write_err)?;
        }
        fs::write(path, text).map_err(write_err)
    }

    /// Installs the built-in default at `path` if nothing is there yet.
    pub fn load_or_install_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let write_err = |source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            };
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir).map_err(write_err)?;
            }
            fs::write(path, DEFAULT_CONFIG).map_err(write_err)?;
            info!("installed default configuration at {}", path.display());
        }
        Self::load(path)
    }

    /// Returns whether the mapping was applied. Buttons outside the tablet's
    /// set are ignored; a pen transform in a button slot is an error.
    pub fn map_button(&mut self, keycode: Keycode, command: Command) -> Result<bool, ConfigError> {
        if matches!(command, Command::PenTransform(_)) {
            return Err(ConfigError::PenCommandOnButton(keycode));
        }
        if !is_valid_button(keycode) {
            return Ok(false);
        }
        self.buttons.insert(keycode, command);
        Ok(true)
    }

    pub fn unmap_button(&mut self, keycode: Keycode) -> bool {
        // Noop is never rejected for a whitelisted key
        self.map_button(keycode, Command::Noop).unwrap_or(false)
    }

    /// Swaps the pen transforms. The last raw position carries over so the
    /// next single-axis event does not snap its partner axis to 0.
    pub fn map_pen(&mut self, command: PenTransformCommand) {
        command.set_last_position(self.pen.last_position());
        self.pen = command;
    }

    #[cfg(test)]
    pub fn button(&self, keycode: Keycode) -> Option<&Command> {
        self.buttons.get(&keycode)
    }

    #[cfg(test)]
    pub fn pen(&self) -> &PenTransformCommand {
        &self.pen
    }

    /// Axis events go to the pen command, mapped keys to their command.
    /// Everything else is dropped.
    pub fn dispatch(&self, event: &InputEvent, outputs: &mut Outputs) -> Result<(), DeviceError> {
        match event.kind {
            EV_ABS => self.pen.execute(event, outputs),
            // proximity belongs to the pen stream, never to a mapping
            EV_KEY if event.code == BTN_TOOL_PEN.0 => outputs.pen.write(*event),
            EV_KEY => match self.buttons.get(&Keycode(event.code)) {
                Some(command) => command.execute(event, outputs),
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }
}

/// The one configuration every session reads. Each mutation is a single
/// write-locked step, so dispatch never sees half an update.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig(Arc<RwLock<Configuration>>);

impl SharedConfig {
    pub fn new(cfg: Configuration) -> Self {
        Self(Arc::new(RwLock::new(cfg)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Configuration> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Configuration> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn dispatch(&self, event: &InputEvent, outputs: &mut Outputs) -> Result<(), DeviceError> {
        self.read().dispatch(event, outputs)
    }

    pub fn map_button(&self, keycode: Keycode, command: Command) -> Result<bool, ConfigError> {
        self.write().map_button(keycode, command)
    }

    pub fn unmap_button(&self, keycode: Keycode) -> bool {
        self.write().unmap_button(keycode)
    }

    pub fn map_pen(&self, command: PenTransformCommand) {
        self.write().map_pen(command);
    }

    pub fn replace(&self, mut cfg: Configuration) {
        let mut current = self.write();
        cfg.pen.set_last_position(current.pen.last_position());
        *current = cfg;
    }

    pub fn snapshot(&self) -> Configuration {
        self.read().clone()
    }
}

/// `/etc/veikkd.toml` for root, the per-user config dir otherwise.
pub fn default_config_path() -> PathBuf {
    if geteuid().is_root() {
        return PathBuf::from("/etc/veikkd.toml");
    }
    ProjectDirs::from("", "", "veikkd")
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("veikkd.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{KeyComboCommand, ProgramCommand};
    use crate::event::{ABS_X, ABS_Y, BTN_STYLUS, BTN_STYLUS2, BTN_TOUCH, InputEvent};
    use crate::testing::recording_outputs;
    use crate::transform::{AffineTransform1D, AffineTransform2D};

    fn kc(name: &str) -> Keycode {
        name.parse().unwrap()
    }

    fn combo(keys: &[&str]) -> Command {
        Command::KeyCombo(KeyComboCommand::new(keys.iter().map(|k| kc(k)).collect()))
    }

    #[test]
    fn default_config_maps_stylus_buttons_to_themselves() {
        let cfg = Configuration::from_toml(DEFAULT_CONFIG).unwrap();
        for k in [BTN_TOUCH, BTN_STYLUS, BTN_STYLUS2] {
            match cfg.button(k) {
                Some(Command::KeyCombo(c)) => assert_eq!(c.keys, vec![k]),
                other => panic!("{k}: {other:?}"),
            }
        }
        assert_eq!(cfg.pen().coord_transform, AffineTransform2D::IDENTITY);
        assert_eq!(cfg.pen().pressure_transform, AffineTransform1D::IDENTITY);
    }

    #[test]
    fn map_button_enforces_whitelist() {
        let mut cfg = Configuration::default();
        assert!(!cfg.map_button(kc("KEY_A"), combo(&["KEY_B"])).unwrap());
        assert!(cfg.button(kc("KEY_A")).is_none());

        assert!(cfg.map_button(kc("BTN_0"), combo(&["KEY_B"])).unwrap());
        assert!(cfg.button(kc("BTN_0")).is_some());
    }

    #[test]
    fn pen_command_cannot_go_on_a_button() {
        let mut cfg = Configuration::default();
        let err = cfg
            .map_button(kc("BTN_1"), Command::PenTransform(Default::default()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::PenCommandOnButton(k) if k == kc("BTN_1")));
        assert!(cfg.button(kc("BTN_1")).is_none());
    }

    #[test]
    fn unmap_is_noop_mapping() {
        let mut cfg = Configuration::default();
        cfg.map_button(kc("BTN_2"), combo(&["KEY_C"])).unwrap();
        assert!(cfg.unmap_button(kc("BTN_2")));
        assert!(matches!(cfg.button(kc("BTN_2")), Some(Command::Noop)));
        assert!(!cfg.unmap_button(kc("KEY_C")));
    }

    #[test]
    fn dispatch_routes_by_event_type() {
        let (mut outputs, pen, keyboard) = recording_outputs();
        let mut cfg = Configuration::default();
        cfg.map_button(kc("BTN_0"), combo(&["KEY_Z"])).unwrap();

        cfg.dispatch(&InputEvent::abs(ABS_X, 10), &mut outputs).unwrap();
        assert_eq!(pen.events().len(), 2);

        cfg.dispatch(&InputEvent::key(kc("BTN_0"), 1), &mut outputs).unwrap();
        cfg.dispatch(&InputEvent::key(kc("BTN_5"), 1), &mut outputs).unwrap();
        assert_eq!(keyboard.events(), vec![InputEvent::key(kc("KEY_Z"), 1)]);

        cfg.dispatch(&InputEvent::syn_report(), &mut outputs).unwrap();
        assert_eq!(pen.events().len(), 2);
    }

    #[test]
    fn load_drops_foreign_buttons_and_rejects_pen_slots() {
        let cfg = Configuration::from_toml(
            r#"
            [buttons.KEY_A]
            type = "key_combo"
            keys = ["KEY_B"]

            [buttons.BTN_3]
            type = "program"
            command = "krita"
            "#,
        )
        .unwrap();
        assert!(cfg.button(kc("KEY_A")).is_none());
        assert!(matches!(cfg.button(kc("BTN_3")), Some(Command::Program(_))));

        let err = Configuration::from_toml(
            r#"
            [buttons.BTN_3]
            type = "pen_transform"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::PenCommandOnButton(_)));

        let err = Configuration::from_toml(
            r#"
            [buttons.BTN_NOPE]
            type = "noop"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn save_then_load_keeps_mappings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("veikkd.toml");

        let mut cfg = Configuration::default();
        cfg.map_button(kc("BTN_4"), combo(&["KEY_LEFTCTRL", "KEY_Z"])).unwrap();
        let mut program = ProgramCommand::new("gimp");
        program.run_in_terminal = true;
        program.options.env.insert("LANG".into(), "C".into());
        cfg.map_button(kc("BTN_5"), Command::Program(program)).unwrap();
        cfg.map_pen(PenTransformCommand::new(
            AffineTransform2D([0.5, 0.0, 0.25, 0.0, 0.5, 0.25, 0.0, 0.0, 1.0]),
            AffineTransform1D::new(2.0, 0.0),
        ));
        cfg.save(&path).unwrap();

        let back = Configuration::load(&path).unwrap();
        assert!(matches!(back.button(kc("BTN_4")), Some(Command::KeyCombo(c)) if c.keys.len() == 2));
        match back.button(kc("BTN_5")) {
            Some(Command::Program(p)) => {
                assert!(p.run_in_terminal);
                assert_eq!(p.options.env.get("LANG").map(String::as_str), Some("C"));
            }
            other => panic!("BTN_5: {other:?}"),
        }
        assert_eq!(back.pen(), cfg.pen());
    }

    #[test]
    fn installs_default_on_first_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("veikkd.toml");
        let cfg = Configuration::load_or_install_default(&path).unwrap();
        assert!(path.exists());
        assert!(cfg.button(BTN_STYLUS).is_some());

        fs::write(&path, "[pen]\npressure_transform = [0.5, 0.0, 0.0, 1.0]\n").unwrap();
        let cfg = Configuration::load_or_install_default(&path).unwrap();
        assert!(cfg.button(BTN_STYLUS).is_none());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = Configuration::load(Path::new("/nonexistent/veikkd.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/veikkd.toml"));
    }

    #[test]
    fn shared_config_swaps_whole_pen_command() {
        let shared = SharedConfig::default();
        let other = shared.clone();
        other.map_pen(PenTransformCommand::new(
            AffineTransform2D::IDENTITY,
            AffineTransform1D::new(0.5, 0.0),
        ));
        assert_eq!(shared.read().pen().pressure_transform.0[0], 0.5);

        shared.replace(Configuration::default());
        assert_eq!(other.snapshot().pen().pressure_transform, AffineTransform1D::IDENTITY);
    }

    #[test]
    fn pen_remap_keeps_last_position() {
        let (mut outputs, pen, _) = recording_outputs();
        let shared = SharedConfig::default();
        shared.dispatch(&InputEvent::abs(ABS_X, 30000), &mut outputs).unwrap();
        shared.dispatch(&InputEvent::abs(ABS_Y, 40000), &mut outputs).unwrap();

        shared.map_pen(PenTransformCommand::default());
        pen.clear();
        shared.dispatch(&InputEvent::abs(ABS_X, 30010), &mut outputs).unwrap();
        assert_eq!(
            pen.events(),
            vec![InputEvent::abs(ABS_X, 30010), InputEvent::abs(ABS_Y, 40000)]
        );

        shared.replace(Configuration::default());
        pen.clear();
        shared.dispatch(&InputEvent::abs(ABS_Y, 40005), &mut outputs).unwrap();
        assert_eq!(
            pen.events(),
            vec![InputEvent::abs(ABS_X, 30010), InputEvent::abs(ABS_Y, 40005)]
        );
    }

    #[test]
    fn tool_proximity_passes_through_to_pen() {
        let (mut outputs, pen, keyboard) = recording_outputs();
        let cfg = Configuration::from_toml(DEFAULT_CONFIG).unwrap();
        let tool = InputEvent::key(BTN_TOOL_PEN, 1);
        cfg.dispatch(&tool, &mut outputs).unwrap();
        cfg.dispatch(&InputEvent::key(BTN_TOUCH, 1), &mut outputs).unwrap();
        assert_eq!(pen.events(), vec![tool, InputEvent::key(BTN_TOUCH, 1)]);
        assert!(keyboard.events().is_empty());
    }
}
