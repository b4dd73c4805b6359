//! A module for parametric variogram models describing the spatial
//! correlation structure of the field.
//!
//! The following shapes are implemented:
//! * exponential,
//! * spherical,
//! * linear (bounded),
//! * gaussian.

use crate::errors::{KrigeError, Result};
use std::convert::TryFrom;
use std::fmt;

/// The family of parametric variogram shapes.
///
/// Each shape relates semivariance to separation distance through the same
/// three parameters (nugget, partial sill, range), so shape selection is a
/// tagged-variant dispatch rather than a type-level choice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum VariogramShape {
    /// Asymptotic approach to the sill, practical range convention
    #[default]
    Exponential,
    /// Bounded correlation, reaches the sill exactly at the range
    Spherical,
    /// Linear growth up to the range, constant beyond it
    Linear,
    /// Parabolic near the origin, very smooth fields
    Gaussian,
}

impl VariogramShape {
    /// All shapes, in the order candidate fits are attempted.
    pub const ALL: [VariogramShape; 4] = [
        VariogramShape::Exponential,
        VariogramShape::Spherical,
        VariogramShape::Linear,
        VariogramShape::Gaussian,
    ];
}

impl fmt::Display for VariogramShape {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            VariogramShape::Exponential => "Exponential",
            VariogramShape::Spherical => "Spherical",
            VariogramShape::Linear => "Linear",
            VariogramShape::Gaussian => "Gaussian",
        };
        write!(f, "{name}")
    }
}

impl TryFrom<&str> for VariogramShape {
    type Error = KrigeError;
    fn try_from(s: &str) -> Result<Self> {
        match s {
            "Exponential" => Ok(VariogramShape::Exponential),
            "Spherical" => Ok(VariogramShape::Spherical),
            "Linear" => Ok(VariogramShape::Linear),
            "Gaussian" => Ok(VariogramShape::Gaussian),
            other => Err(KrigeError::InvalidParameter(format!(
                "unknown variogram shape '{other}'"
            ))),
        }
    }
}

/// A fitted (or hand-specified) parametric variogram.
///
/// Invariants: `nugget >= 0`, `sill >= 0` (partial sill, the variance added
/// on top of the nugget), `range > 0`. The constructor enforces them; the
/// model is consumed read-only by the kriging solver afterwards.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VariogramModel {
    /// Shape tag selecting the semivariance formula
    pub shape: VariogramShape,
    /// Semivariance discontinuity at zero lag
    pub nugget: f64,
    /// Partial sill: additional semivariance reached at the range
    pub sill: f64,
    /// Distance beyond which spatial correlation is negligible.
    /// Practical range for Exponential/Gaussian, exact for Spherical/Linear.
    pub range: f64,
}

impl VariogramModel {
    /// Build a model, rejecting parameters outside the invariants.
    pub fn new(shape: VariogramShape, nugget: f64, sill: f64, range: f64) -> Result<Self> {
        if !nugget.is_finite() || nugget < 0. {
            return Err(KrigeError::InvalidParameter(format!(
                "nugget must be finite and non-negative, got {nugget}"
            )));
        }
        if !sill.is_finite() || sill < 0. {
            return Err(KrigeError::InvalidParameter(format!(
                "partial sill must be finite and non-negative, got {sill}"
            )));
        }
        if !range.is_finite() || range <= 0. {
            return Err(KrigeError::InvalidParameter(format!(
                "range must be finite and positive, got {range}"
            )));
        }
        Ok(VariogramModel {
            shape,
            nugget,
            sill,
            range,
        })
    }

    /// Total sill (nugget + partial sill), the semivariance at/after the range.
    pub fn total_sill(&self) -> f64 {
        self.nugget + self.sill
    }

    /// Semivariance at separation distance `h`.
    ///
    /// By convention `gamma(0) = 0`: the nugget is a discontinuity at the
    /// origin, not a value attained at zero lag.
    pub fn gamma(&self, h: f64) -> f64 {
        if h <= 0. {
            return 0.;
        }
        let structured = match self.shape {
            VariogramShape::Exponential => self.sill * (1. - (-3. * h / self.range).exp()),
            VariogramShape::Spherical => {
                if h >= self.range {
                    self.sill
                } else {
                    let r = h / self.range;
                    self.sill * (1.5 * r - 0.5 * r * r * r)
                }
            }
            VariogramShape::Linear => {
                if h >= self.range {
                    self.sill
                } else {
                    self.sill * h / self.range
                }
            }
            VariogramShape::Gaussian => {
                let r = h / self.range;
                self.sill * (1. - (-3. * r * r).exp())
            }
        };
        self.nugget + structured
    }
}

impl fmt::Display for VariogramModel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Variogram(shape={}, nugget={}, sill={}, range={})",
            self.shape, self.nugget, self.sill, self.range
        )
    }
}
