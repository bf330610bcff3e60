use serde::{Deserialize, Serialize};

use crate::error::DeviceError;
use crate::event::{InputEvent, Keycode};
use crate::output::Outputs;

/// Replays the triggering key state on every key in `keys`, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyComboCommand {
    pub keys: Vec<Keycode>,
}

impl KeyComboCommand {
    pub fn new(keys: Vec<Keycode>) -> Self {
        Self { keys }
    }

    pub fn execute(&self, event: &InputEvent, outputs: &mut Outputs) -> Result<(), DeviceError> {
        for key in &self.keys {
            outputs.write_key(*key, event.value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{BTN_STYLUS, EV_KEY};
    use crate::testing::recording_outputs;

    #[test]
    fn routes_stylus_buttons_to_pen_and_letters_to_keyboard() {
        let (mut outputs, pen, keyboard) = recording_outputs();
        let key_e: Keycode = "KEY_E".parse().unwrap();
        let cmd = KeyComboCommand::new(vec![BTN_STYLUS, key_e]);

        cmd.execute(&InputEvent::key("BTN_0".parse().unwrap(), 1), &mut outputs)
            .unwrap();

        assert_eq!(pen.events(), vec![InputEvent::new(EV_KEY, BTN_STYLUS.0, 1)]);
        assert_eq!(keyboard.events(), vec![InputEvent::new(EV_KEY, key_e.0, 1)]);
    }

    #[test]
    fn keeps_order_and_emits_no_sync() {
        let (mut outputs, _pen, keyboard) = recording_outputs();
        let keys: Vec<Keycode> = ["KEY_LEFTCTRL", "KEY_LEFTSHIFT", "KEY_Z"]
            .iter()
            .map(|k| k.parse().unwrap())
            .collect();
        let cmd = KeyComboCommand::new(keys.clone());

        cmd.execute(&InputEvent::key("BTN_1".parse().unwrap(), 0), &mut outputs)
            .unwrap();

        let got = keyboard.events();
        assert_eq!(got.len(), 3);
        assert!(got.iter().all(|e| !e.is_sync() && e.value == 0));
        let codes: Vec<u16> = got.iter().map(|e| e.code).collect();
        let want: Vec<u16> = keys.iter().map(|k| k.0).collect();
        assert_eq!(codes, want);
    }
}
