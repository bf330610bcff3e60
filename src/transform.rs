//! Affine transforms for pen coordinates and pressure.
//!
//! Coordinates live in a canonical square of side [`CANONICAL_DIM`] once the
//! per-model pretransform has run. Offset coefficients are expressed as a
//! fraction of that side, so `transform` multiplies them by the constant.

use std::{fmt, str::FromStr};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

pub const CANONICAL_DIM: f64 = 65536.0;

/// 3x3 homogeneous transform, row-major (`m[row * 3 + col]`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AffineTransform2D(pub [f64; 9]);

impl Default for AffineTransform2D {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl AffineTransform2D {
    pub const IDENTITY: Self = Self([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);

    /// The last row is ignored.
    pub fn transform(&self, x: f64, y: f64) -> (f64, f64) {
        let m = &self.0;
        (
            m[0] * x + m[1] * y + m[2] * CANONICAL_DIM,
            m[3] * x + m[4] * y + m[5] * CANONICAL_DIM,
        )
    }

    /// `self · other`: applies `other` first, then `self`.
    pub fn compose(&self, other: &Self) -> Self {
        let (a, b) = (&self.0, &other.0);
        let mut out = [0.0; 9];
        for row in 0..3 {
            for col in 0..3 {
                out[row * 3 + col] = (0..3).map(|k| a[row * 3 + k] * b[k * 3 + col]).sum();
            }
        }
        Self(out)
    }
}

/// 2x2 row-major transform used as the 1D affine map `a·x + b` with
/// `a = m[0]`, `b = m[1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AffineTransform1D(pub [f64; 4]);

impl Default for AffineTransform1D {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl AffineTransform1D {
    pub const IDENTITY: Self = Self([1.0, 0.0, 0.0, 1.0]);

    pub fn new(scale: f64, offset: f64) -> Self {
        Self([scale, offset, 0.0, 1.0])
    }

    /// Maps `[0, in_max]` linearly onto `[0, out_max]`.
    pub fn range(in_max: f64, out_max: f64) -> Self {
        Self::new(out_max / in_max, 0.0)
    }

    pub fn transform(&self, x: f64) -> f64 {
        self.0[0] * x + self.0[1]
    }

    #[cfg(test)]
    pub fn compose(&self, other: &Self) -> Self {
        let (a, b) = (&self.0, &other.0);
        Self([
            a[0] * b[0] + a[1] * b[2],
            a[0] * b[1] + a[1] * b[3],
            a[2] * b[0] + a[3] * b[2],
            a[2] * b[1] + a[3] * b[3],
        ])
    }
}

/// Quarter-turn screen orientations, clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Normal,
    Cw90,
    Flipped,
    Ccw90,
}

impl FromStr for Orientation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" | "0" => Ok(Self::Normal),
            "cw90" | "90" => Ok(Self::Cw90),
            "flipped" | "180" => Ok(Self::Flipped),
            "ccw90" | "270" => Ok(Self::Ccw90),
            other => Err(anyhow!("unknown orientation: {other}")),
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Normal => "normal",
            Self::Cw90 => "cw90",
            Self::Flipped => "flipped",
            Self::Ccw90 => "ccw90",
        };
        f.write_str(s)
    }
}

pub fn rotation_matrix(orientation: Orientation) -> AffineTransform2D {
    AffineTransform2D(match orientation {
        Orientation::Normal => [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        Orientation::Cw90 => [0.0, -1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0],
        Orientation::Flipped => [-1.0, 0.0, 1.0, 0.0, -1.0, 1.0, 0.0, 0.0, 1.0],
        Orientation::Ccw90 => [0.0, 1.0, 0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 1.0],
    })
}

/// Places the canonical square onto `rect` of a `screen_w x screen_h` screen.
/// Zero screen dimensions are the caller's problem.
pub fn scale_offset_matrix(
    screen_w: f64,
    screen_h: f64,
    rect_x: f64,
    rect_y: f64,
    rect_w: f64,
    rect_h: f64,
) -> AffineTransform2D {
    AffineTransform2D([
        rect_w / screen_w,
        0.0,
        rect_x / screen_w,
        0.0,
        rect_h / screen_h,
        rect_y / screen_h,
        0.0,
        0.0,
        1.0,
    ])
}

/// Rotate first, then scale and position.
pub fn rotation_scale_offset_matrix(
    orientation: Orientation,
    screen_w: f64,
    screen_h: f64,
    rect_x: f64,
    rect_y: f64,
    rect_w: f64,
    rect_h: f64,
) -> AffineTransform2D {
    scale_offset_matrix(screen_w, screen_h, rect_x, rect_y, rect_w, rect_h)
        .compose(&rotation_matrix(orientation))
}

/// Where a canonical coordinate lands on a screen axis of `screen_len` pixels.
pub fn canonical_to_screen(c: f64, screen_len: f64) -> f64 {
    c * screen_len / CANONICAL_DIM
}
