//! Known VEIKK models and their raw coordinate extents.

use log::warn;

use crate::transform::{AffineTransform1D, CANONICAL_DIM};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Model {
    pub name: &'static str,
    pub x_max: i32,
    pub y_max: i32,
}

/// Assumed for tablets missing from [`MODELS`].
pub const DEFAULT_MODEL: Model = Model {
    name: "VEIKK (unknown model)",
    x_max: 50800,
    y_max: 30480,
};

pub const MODELS: &[Model] = &[
    Model { name: "VEIKK S640", x_max: 30480, y_max: 20320 },
    Model { name: "VEIKK A30", x_max: 50800, y_max: 30480 },
    Model { name: "VEIKK A50", x_max: 50800, y_max: 30480 },
    Model { name: "VEIKK A15", x_max: 50800, y_max: 30480 },
    Model { name: "VEIKK A15 Pro", x_max: 50800, y_max: 30480 },
];

const NAME_SUFFIX: &str = " Bundled";

/// The kernel name minus the driver's " Bundled" suffix.
pub fn model_name(device_name: &str) -> &str {
    device_name.strip_suffix(NAME_SUFFIX).unwrap_or(device_name)
}

pub fn lookup(device_name: &str) -> Option<&'static Model> {
    let name = model_name(device_name);
    MODELS.iter().find(|m| m.name == name)
}

/// Never fails: unknown hardware gets [`DEFAULT_MODEL`].
pub fn resolve(device_name: &str) -> &'static Model {
    lookup(device_name).unwrap_or_else(|| {
        warn!("unknown tablet model '{device_name}'; assuming {DEFAULT_MODEL:?}");
        &DEFAULT_MODEL
    })
}

impl Model {
    /// Per-axis maps from raw extents onto the canonical square.
    pub fn pretransform(&self) -> (AffineTransform1D, AffineTransform1D) {
        (
            AffineTransform1D::range(f64::from(self.x_max), CANONICAL_DIM),
            AffineTransform1D::range(f64::from(self.y_max), CANONICAL_DIM),
        )
    }
}
