//! Actions a button or the pen can be mapped to.

mod keycombo;
mod pen;
mod program;

pub use keycombo::KeyComboCommand;
pub use pen::PenTransformCommand;
pub use program::ProgramCommand;

use log::trace;
use serde::{Deserialize, Serialize};

use crate::error::DeviceError;
use crate::event::InputEvent;
use crate::output::Outputs;

/// Which key-event values fire an action. The discriminants are the event
/// values themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandTrigger {
    KeyUp = 0,
    KeyDown = 1,
    KeyPress = 2,
}

impl CommandTrigger {
    const ALL: [CommandTrigger; 3] = [Self::KeyUp, Self::KeyDown, Self::KeyPress];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<CommandTrigger>", into = "Vec<CommandTrigger>")]
pub struct CommandTriggerMap([bool; 3]);

impl CommandTriggerMap {
    pub fn new(triggers: &[CommandTrigger]) -> Self {
        let mut map = [false; 3];
        for t in triggers {
            map[*t as usize] = true;
        }
        Self(map)
    }

    /// Out-of-range values never fire.
    pub fn fires(&self, value: i32) -> bool {
        usize::try_from(value)
            .ok()
            .and_then(|i| self.0.get(i).copied())
            .unwrap_or(false)
    }
}

impl Default for CommandTriggerMap {
    fn default() -> Self {
        Self::new(&[CommandTrigger::KeyDown])
    }
}

impl From<Vec<CommandTrigger>> for CommandTriggerMap {
    fn from(v: Vec<CommandTrigger>) -> Self {
        Self::new(&v)
    }
}

impl From<CommandTriggerMap> for Vec<CommandTrigger> {
    fn from(m: CommandTriggerMap) -> Self {
        CommandTrigger::ALL
            .into_iter()
            .filter(|t| m.0[*t as usize])
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    #[default]
    Noop,
    KeyCombo(KeyComboCommand),
    Program(ProgramCommand),
    PenTransform(PenTransformCommand),
}

impl Command {
    pub fn type_name(&self) -> &'static str {
        match self {
            Command::Noop => "noop",
            Command::KeyCombo(_) => "key_combo",
            Command::Program(_) => "program",
            Command::PenTransform(_) => "pen_transform",
        }
    }

    pub fn execute(&self, event: &InputEvent, outputs: &mut Outputs) -> Result<(), DeviceError> {
        match self {
            Command::Noop => {
                trace!("event {event:?} -> noop");
                Ok(())
            }
            Command::KeyCombo(c) => c.execute(event, outputs),
            Command::Program(c) => {
                c.execute(event);
                Ok(())
            }
            Command::PenTransform(c) => c.execute(event, outputs),
        }
    }
}
