//! Per-column profiles handed to the radiative-transfer solver
//!
//! The converter walks the horizontal grid latitude-outer, longitude-inner and
//! emits one [`ProfileRecord`] per column. The resulting [`ProfileBatch`] is
//! consumed by position, so its order must agree with
//! [`grid_to_batch_index`](crate::indexing::grid_to_batch_index).

use crate::atmosphere::{AtmosphereGrid, VAR_PRESSURE, VAR_TEMPERATURE};
use crate::config::DEFAULT_GASES;
use crate::errors::{FluxError, FluxResult};
use crate::indexing::{checked_batch_index, grid_to_batch_index, GridShape, IndexStride};
use crate::FloatValue;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Horizontal location a profile was extracted from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    pub lat_index: usize,
    pub lon_index: usize,
    pub lat: FloatValue,
    pub lon: FloatValue,
}

/// A single vertical column of atmospheric state
///
/// Levels keep the order of the source pressure axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    origin: GridPoint,
    pressure: Vec<FloatValue>,
    temperature: Vec<FloatValue>,
    gases: BTreeMap<String, Vec<FloatValue>>,
}

impl ProfileRecord {
    pub fn origin(&self) -> GridPoint {
        self.origin
    }

    pub fn pressure(&self) -> &[FloatValue] {
        &self.pressure
    }

    pub fn temperature(&self) -> &[FloatValue] {
        &self.temperature
    }

    /// Volume mixing ratio profiles keyed by gas name
    pub fn gases(&self) -> &BTreeMap<String, Vec<FloatValue>> {
        &self.gases
    }

    pub fn gas(&self, name: &str) -> Option<&[FloatValue]> {
        self.gases.get(name).map(|v| v.as_slice())
    }

    pub fn n_levels(&self) -> usize {
        self.pressure.len()
    }
}

/// Build a profile from one column
///
/// # Errors
///
/// [`FluxError::DimensionMismatch`] if the temperature or any gas array has a
/// different length from `pressure`.
pub fn convert_column(
    origin: GridPoint,
    pressure: Vec<FloatValue>,
    temperature: Vec<FloatValue>,
    gases: BTreeMap<String, Vec<FloatValue>>,
) -> FluxResult<ProfileRecord> {
    let n_levels = pressure.len();

    let check = |name: &str, len: usize| {
        if len != n_levels {
            Err(FluxError::DimensionMismatch {
                variable: format!(
                    "{} at lat={}, lon={}",
                    name, origin.lat, origin.lon
                ),
                expected: vec![n_levels],
                found: vec![len],
            })
        } else {
            Ok(())
        }
    };

    check(VAR_TEMPERATURE, temperature.len())?;
    for (name, values) in &gases {
        check(name, values.len())?;
    }

    Ok(ProfileRecord {
        origin,
        pressure,
        temperature,
        gases,
    })
}

/// Ordered collection of profiles covering a horizontal grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileBatch {
    shape: GridShape,
    profiles: Vec<ProfileRecord>,
}

impl ProfileBatch {
    /// Assemble a batch from profiles already in row-major order
    ///
    /// # Errors
    ///
    /// [`FluxError::DimensionMismatch`] if the number of profiles does not match
    /// the grid shape.
    pub fn new(shape: GridShape, profiles: Vec<ProfileRecord>) -> FluxResult<Self> {
        if profiles.len() != shape.len() {
            return Err(FluxError::DimensionMismatch {
                variable: "profile batch".to_string(),
                expected: vec![shape.n_lat, shape.n_lon],
                found: vec![profiles.len()],
            });
        }
        Ok(Self { shape, profiles })
    }

    pub fn shape(&self) -> GridShape {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ProfileRecord> {
        self.profiles.get(index)
    }

    /// Profile used for `(lat_index, lon_index)` under a given stride
    pub fn at(
        &self,
        lat_index: usize,
        lon_index: usize,
        stride: IndexStride,
    ) -> FluxResult<&ProfileRecord> {
        let index = checked_batch_index(lat_index, lon_index, self.shape, stride)?;
        Ok(&self.profiles[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProfileRecord> {
        self.profiles.iter()
    }
}

/// Converts an [`AtmosphereGrid`] into a [`ProfileBatch`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileConverter {
    gases: Vec<String>,
}

impl Default for ProfileConverter {
    fn default() -> Self {
        Self::new(DEFAULT_GASES.iter().map(|g| g.to_string()).collect())
    }
}

impl ProfileConverter {
    pub fn new(gases: Vec<String>) -> Self {
        Self { gases }
    }

    /// Names of the gases copied into every profile
    pub fn gases(&self) -> &[String] {
        &self.gases
    }

    /// Convert every column of the grid
    ///
    /// # Errors
    ///
    /// [`FluxError::MissingVariable`] if a requested gas is not in the grid,
    /// [`FluxError::DimensionMismatch`] if a column is inconsistent.
    pub fn convert(&self, grid: &AtmosphereGrid) -> FluxResult<ProfileBatch> {
        for gas in &self.gases {
            if !grid.has_gas(gas) {
                return Err(FluxError::MissingVariable(gas.clone()));
            }
        }

        let (n_lat, n_lon, n_levels) = grid.shape();
        let shape = GridShape::new(n_lat, n_lon);
        let mut profiles = Vec::with_capacity(shape.len());

        for (i, j) in shape.iter() {
            debug_assert_eq!(
                profiles.len(),
                grid_to_batch_index(i, j, shape, IndexStride::RowMajor)
            );

            let origin = GridPoint {
                lat_index: i,
                lon_index: j,
                lat: grid.lat().values()[i],
                lon: grid.lon().values()[j],
            };
            let pressure = grid.column(VAR_PRESSURE, i, j)?.to_vec();
            let temperature = grid.column(VAR_TEMPERATURE, i, j)?.to_vec();
            let gases = self
                .gases
                .iter()
                .map(|name| Ok((name.clone(), grid.column(name, i, j)?.to_vec())))
                .collect::<FluxResult<BTreeMap<_, _>>>()?;

            debug!("Converted profile at lat={}, lon={}", origin.lat, origin.lon);
            profiles.push(convert_column(origin, pressure, temperature, gases)?);
        }

        info!(
            "Converted {} profiles ({} x {} columns, {} levels, {} gases)",
            profiles.len(),
            n_lat,
            n_lon,
            n_levels,
            self.gases.len()
        );
        ProfileBatch::new(shape, profiles)
    }
}
