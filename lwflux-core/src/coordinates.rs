//! Labelled coordinate axes shared by the input grid and the output datasets.
//!
//! Output writes are addressed by coordinate label rather than by position, so
//! every axis keeps its labels in the order they were given and resolves a label
//! back to its offset. Labels must be finite and unique along an axis.

use crate::errors::{FluxError, FluxResult};
use crate::FloatValue;
use serde::{Deserialize, Serialize};

pub const LAT: &str = "lat";
pub const LON: &str = "lon";
pub const PRESSURE: &str = "pressure";
pub const F_GRID: &str = "f_grid";

/// An ordered, named sequence of coordinate labels
///
/// No sorting is applied. A latitude axis given as `[10.0, -5.0, 0.0]` keeps
/// that order and `position(-5.0)` returns 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawAxis", into = "RawAxis")]
pub struct CoordinateAxis {
    name: String,
    values: Vec<FloatValue>,
}

#[derive(Serialize, Deserialize)]
struct RawAxis {
    name: String,
    values: Vec<FloatValue>,
}

impl TryFrom<RawAxis> for CoordinateAxis {
    type Error = FluxError;

    fn try_from(raw: RawAxis) -> Result<Self, Self::Error> {
        CoordinateAxis::new(raw.name, raw.values)
    }
}

impl From<CoordinateAxis> for RawAxis {
    fn from(axis: CoordinateAxis) -> Self {
        RawAxis {
            name: axis.name,
            values: axis.values,
        }
    }
}

impl CoordinateAxis {
    /// Create a new axis, rejecting non-finite or repeated labels
    pub fn new(name: impl Into<String>, values: Vec<FloatValue>) -> FluxResult<Self> {
        let name = name.into();

        for (i, &value) in values.iter().enumerate() {
            if !value.is_finite() {
                return Err(FluxError::InvalidCoordinate {
                    axis: name,
                    reason: format!("label at position {} is not finite ({})", i, value),
                });
            }
            if values[..i].iter().any(|&other| other == value) {
                return Err(FluxError::DuplicateCoordinate { axis: name, label: value });
            }
        }

        Ok(Self { name, values })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[FloatValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Label at a given offset
    pub fn at(&self, index: usize) -> Option<FloatValue> {
        self.values.get(index).copied()
    }

    /// Resolve a label to its offset along the axis
    ///
    /// Matching is exact: labels are copied verbatim from the source grid, so
    /// the same `f64` always compares equal to itself.
    pub fn position(&self, label: FloatValue) -> FluxResult<usize> {
        self.values
            .iter()
            .position(|&v| v == label)
            .ok_or_else(|| FluxError::CoordinateNotFound {
                axis: self.name.clone(),
                label,
            })
    }

    /// Iterate over `(offset, label)` pairs in axis order
    pub fn iter(&self) -> impl Iterator<Item = (usize, FloatValue)> + '_ {
        self.values.iter().copied().enumerate()
    }
}
