use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;
use crate::event::{ABS_PRESSURE, ABS_X, ABS_Y, EV_ABS, InputEvent};
use crate::output::Outputs;
use crate::transform::{AffineTransform1D, AffineTransform2D};

/// Maps pen position and pressure. Remembers the last raw X and Y so that a
/// single-axis update still re-emits both transformed axes: a rotation mixes
/// the two.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PenTransformCommand {
    #[serde(default)]
    pub coord_transform: AffineTransform2D,
    #[serde(default)]
    pub pressure_transform: AffineTransform1D,
    #[serde(skip)]
    last: Mutex<(i32, i32)>,
}

impl Clone for PenTransformCommand {
    fn clone(&self) -> Self {
        Self {
            coord_transform: self.coord_transform,
            pressure_transform: self.pressure_transform,
            last: Mutex::new(self.last_position()),
        }
    }
}

impl PartialEq for PenTransformCommand {
    fn eq(&self, other: &Self) -> bool {
        self.coord_transform == other.coord_transform
            && self.pressure_transform == other.pressure_transform
    }
}

impl PenTransformCommand {
    pub fn new(coord_transform: AffineTransform2D, pressure_transform: AffineTransform1D) -> Self {
        Self {
            coord_transform,
            pressure_transform,
            last: Mutex::default(),
        }
    }

    /// Last raw `(x, y)` seen.
    pub fn last_position(&self) -> (i32, i32) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_last_position(&self, pos: (i32, i32)) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = pos;
    }

    pub fn execute(&self, event: &InputEvent, outputs: &mut Outputs) -> Result<(), DeviceError> {
        if event.kind != EV_ABS {
            return Ok(());
        }
        match event.code {
            ABS_PRESSURE => {
                let p = self.pressure_transform.transform(f64::from(event.value));
                outputs.pen.write(InputEvent::abs(ABS_PRESSURE, p as i32))
            }
            ABS_X | ABS_Y => {
                let (x, y) = {
                    let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
                    if event.code == ABS_X {
                        last.0 = event.value;
                    } else {
                        last.1 = event.value;
                    }
                    *last
                };
                let (tx, ty) = self.coord_transform.transform(f64::from(x), f64::from(y));
                outputs.pen.write(InputEvent::abs(ABS_X, tx as i32))?;
                outputs.pen.write(InputEvent::abs(ABS_Y, ty as i32))
            }
            // tilt and friends
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::recording_outputs;
    use crate::transform::{CANONICAL_DIM, Orientation, rotation_matrix};

    #[test]
    fn every_axis_update_reemits_both_axes() {
        let (mut outputs, pen, keyboard) = recording_outputs();
        let cmd = PenTransformCommand::default();

        cmd.execute(&InputEvent::abs(ABS_X, 100), &mut outputs).unwrap();
        assert_eq!(pen.events(), vec![InputEvent::abs(ABS_X, 100), InputEvent::abs(ABS_Y, 0)]);

        pen.clear();
        cmd.execute(&InputEvent::abs(ABS_Y, 200), &mut outputs).unwrap();
        assert_eq!(pen.events(), vec![InputEvent::abs(ABS_X, 100), InputEvent::abs(ABS_Y, 200)]);
        assert!(keyboard.events().is_empty());
        assert_eq!(cmd.last_position(), (100, 200));
    }

    #[test]
    fn rotation_uses_the_stale_partner_coordinate() {
        let (mut outputs, pen, _) = recording_outputs();
        let cmd = PenTransformCommand::new(rotation_matrix(Orientation::Cw90), Default::default());
        let k = CANONICAL_DIM as i32;

        cmd.execute(&InputEvent::abs(ABS_X, 100), &mut outputs).unwrap();
        cmd.execute(&InputEvent::abs(ABS_Y, 200), &mut outputs).unwrap();

        assert_eq!(
            pen.events(),
            vec![
                InputEvent::abs(ABS_X, k),
                InputEvent::abs(ABS_Y, 100),
                InputEvent::abs(ABS_X, k - 200),
                InputEvent::abs(ABS_Y, 100),
            ]
        );
    }

    #[test]
    fn pressure_goes_through_the_1d_map() {
        let (mut outputs, pen, _) = recording_outputs();
        let cmd = PenTransformCommand::new(
            AffineTransform2D::IDENTITY,
            AffineTransform1D::new(0.5, 100.0),
        );
        cmd.execute(&InputEvent::abs(ABS_PRESSURE, 2001), &mut outputs).unwrap();
        assert_eq!(pen.events(), vec![InputEvent::abs(ABS_PRESSURE, 1100)]);
    }

    #[test]
    fn other_axes_are_ignored() {
        let (mut outputs, pen, _) = recording_outputs();
        let cmd = PenTransformCommand::default();
        // ABS_TILT_X
        cmd.execute(&InputEvent::abs(0x1a, 30), &mut outputs).unwrap();
        cmd.execute(&InputEvent::syn_report(), &mut outputs).unwrap();
        assert!(pen.events().is_empty());
    }

    #[test]
    fn missing_transforms_default_to_identity() {
        let cmd: PenTransformCommand = toml::from_str("").unwrap();
        assert_eq!(cmd, PenTransformCommand::default());
        assert_eq!(cmd.coord_transform, AffineTransform2D::IDENTITY);
    }
}
