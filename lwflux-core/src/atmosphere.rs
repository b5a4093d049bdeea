//! Gridded atmospheric state on a (lat, lon, pressure) grid
//!
//! [`AtmosphereGrid`] is the immutable input to a flux run. All fields share
//! the `(n_lat, n_lon, n_pressure)` shape and the three coordinate axes.

use crate::coordinates::{CoordinateAxis, LAT, LON, PRESSURE};
use crate::errors::{FluxError, FluxResult};
use crate::FloatValue;
use ndarray::{Array3, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const VAR_PRESSURE: &str = "pressure";
pub const VAR_TEMPERATURE: &str = "temperature";
pub const VAR_GEOMETRIC_HEIGHT: &str = "geometric_height";

/// Atmospheric state on a 3-D grid
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "AtmosphereGridData", into = "AtmosphereGridData")]
pub struct AtmosphereGrid {
    lat: CoordinateAxis,
    lon: CoordinateAxis,
    pressure: CoordinateAxis,
    pressure_field: Array3<FloatValue>,
    temperature: Array3<FloatValue>,
    geometric_height: Array3<FloatValue>,
    /// Volume mixing ratio per gas, keyed by gas name
    gases: BTreeMap<String, Array3<FloatValue>>,
}

/// Serialised form of [`AtmosphereGrid`], checked on the way in
#[derive(Serialize, Deserialize)]
struct AtmosphereGridData {
    lat: CoordinateAxis,
    lon: CoordinateAxis,
    pressure: CoordinateAxis,
    pressure_field: Array3<FloatValue>,
    temperature: Array3<FloatValue>,
    geometric_height: Array3<FloatValue>,
    gases: BTreeMap<String, Array3<FloatValue>>,
}

impl TryFrom<AtmosphereGridData> for AtmosphereGrid {
    type Error = FluxError;

    fn try_from(data: AtmosphereGridData) -> Result<Self, Self::Error> {
        AtmosphereGrid::new(
            data.lat,
            data.lon,
            data.pressure,
            Some(data.pressure_field),
            data.temperature,
            data.geometric_height,
            data.gases,
        )
    }
}

impl From<AtmosphereGrid> for AtmosphereGridData {
    fn from(grid: AtmosphereGrid) -> Self {
        AtmosphereGridData {
            lat: grid.lat,
            lon: grid.lon,
            pressure: grid.pressure,
            pressure_field: grid.pressure_field,
            temperature: grid.temperature,
            geometric_height: grid.geometric_height,
            gases: grid.gases,
        }
    }
}

impl AtmosphereGrid {
    /// Build a grid from its coordinates and fields.
    ///
    /// `pressure_field` may be omitted, in which case the pressure coordinate is
    /// broadcast to every column.
    ///
    /// # Errors
    ///
    /// [`FluxError::DimensionMismatch`] if any field's shape differs from
    /// `(lat.len(), lon.len(), pressure.len())`.
    pub fn new(
        lat: CoordinateAxis,
        lon: CoordinateAxis,
        pressure: CoordinateAxis,
        pressure_field: Option<Array3<FloatValue>>,
        temperature: Array3<FloatValue>,
        geometric_height: Array3<FloatValue>,
        gases: BTreeMap<String, Array3<FloatValue>>,
    ) -> FluxResult<Self> {
        let shape = [lat.len(), lon.len(), pressure.len()];

        let pressure_field = match pressure_field {
            Some(field) => field,
            None => broadcast_levels(&pressure, shape),
        };

        check_shape(VAR_PRESSURE, &pressure_field, shape)?;
        check_shape(VAR_TEMPERATURE, &temperature, shape)?;
        check_shape(VAR_GEOMETRIC_HEIGHT, &geometric_height, shape)?;
        for (name, field) in &gases {
            check_shape(name, field, shape)?;
        }

        Ok(Self {
            lat,
            lon,
            pressure,
            pressure_field,
            temperature,
            geometric_height,
            gases,
        })
    }

    pub fn lat(&self) -> &CoordinateAxis {
        &self.lat
    }

    pub fn lon(&self) -> &CoordinateAxis {
        &self.lon
    }

    pub fn pressure(&self) -> &CoordinateAxis {
        &self.pressure
    }

    /// `(n_lat, n_lon, n_pressure)`
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.lat.len(), self.lon.len(), self.pressure.len())
    }

    /// Number of horizontal grid points
    pub fn n_columns(&self) -> usize {
        self.lat.len() * self.lon.len()
    }

    pub fn gas_names(&self) -> impl Iterator<Item = &str> {
        self.gases.keys().map(|k| k.as_str())
    }

    pub fn has_gas(&self, name: &str) -> bool {
        self.gases.contains_key(name)
    }

    /// Look up a 3-D field by variable name
    pub fn field(&self, name: &str) -> FluxResult<&Array3<FloatValue>> {
        match name {
            VAR_PRESSURE => Ok(&self.pressure_field),
            VAR_TEMPERATURE => Ok(&self.temperature),
            VAR_GEOMETRIC_HEIGHT => Ok(&self.geometric_height),
            gas => self
                .gases
                .get(gas)
                .ok_or_else(|| FluxError::MissingVariable(gas.to_string())),
        }
    }

    /// Vertical column of a field at `(lat_index, lon_index)`
    pub fn column(
        &self,
        name: &str,
        lat_index: usize,
        lon_index: usize,
    ) -> FluxResult<ArrayView1<'_, FloatValue>> {
        let field = self.field(name)?;
        let (n_lat, n_lon, _) = self.shape();
        if lat_index >= n_lat || lon_index >= n_lon {
            return Err(FluxError::ShapeMismatch {
                field: name.to_string(),
                expected: vec![n_lat, n_lon],
                found: vec![lat_index, lon_index],
            });
        }
        Ok(field
            .index_axis(Axis(0), lat_index)
            .index_axis_move(Axis(0), lon_index))
    }

    /// Temperature at the surface level of a column
    ///
    /// The surface is the first level along the pressure axis as given.
    pub fn surface_temperature(
        &self,
        lat_index: usize,
        lon_index: usize,
    ) -> FluxResult<FloatValue> {
        self.surface_value(VAR_TEMPERATURE, lat_index, lon_index)
    }

    /// Geometric height at the surface level of a column, unclamped
    pub fn surface_height(&self, lat_index: usize, lon_index: usize) -> FluxResult<FloatValue> {
        self.surface_value(VAR_GEOMETRIC_HEIGHT, lat_index, lon_index)
    }

    fn surface_value(
        &self,
        name: &str,
        lat_index: usize,
        lon_index: usize,
    ) -> FluxResult<FloatValue> {
        let column = self.column(name, lat_index, lon_index)?;
        column
            .first()
            .copied()
            .ok_or_else(|| FluxError::DimensionMismatch {
                variable: name.to_string(),
                expected: vec![1],
                found: vec![0],
            })
    }
}

fn broadcast_levels(pressure: &CoordinateAxis, shape: [usize; 3]) -> Array3<FloatValue> {
    Array3::from_shape_fn(shape, |(_, _, k)| pressure.values()[k])
}

fn check_shape(name: &str, field: &Array3<FloatValue>, shape: [usize; 3]) -> FluxResult<()> {
    if field.shape() != shape {
        return Err(FluxError::DimensionMismatch {
            variable: name.to_string(),
            expected: shape.to_vec(),
            found: field.shape().to_vec(),
        });
    }
    Ok(())
}

/// Helper for assembling an [`AtmosphereGrid`] field by field
///
/// ```rust
/// use lwflux_core::atmosphere::AtmosphereGridBuilder;
/// use ndarray::Array3;
///
/// let (lat, lon) = (vec![0.0, 10.0], vec![0.0, 10.0]);
/// let grid = AtmosphereGridBuilder::new(lat, lon, vec![1000.0, 500.0, 100.0])
///     .with_temperature(Array3::from_elem((2, 2, 3), 250.0))
///     .with_geometric_height(Array3::zeros((2, 2, 3)))
///     .with_gas("H2O", Array3::from_elem((2, 2, 3), 1e-3))
///     .build()
///     .unwrap();
/// assert_eq!(grid.shape(), (2, 2, 3));
/// ```
#[derive(Debug, Default)]
pub struct AtmosphereGridBuilder {
    lat: Vec<FloatValue>,
    lon: Vec<FloatValue>,
    pressure: Vec<FloatValue>,
    pressure_field: Option<Array3<FloatValue>>,
    temperature: Option<Array3<FloatValue>>,
    geometric_height: Option<Array3<FloatValue>>,
    gases: BTreeMap<String, Array3<FloatValue>>,
}

impl AtmosphereGridBuilder {
    pub fn new(lat: Vec<FloatValue>, lon: Vec<FloatValue>, pressure: Vec<FloatValue>) -> Self {
        Self {
            lat,
            lon,
            pressure,
            ..Default::default()
        }
    }

    pub fn with_pressure_field(mut self, field: Array3<FloatValue>) -> Self {
        self.pressure_field = Some(field);
        self
    }

    pub fn with_temperature(mut self, field: Array3<FloatValue>) -> Self {
        self.temperature = Some(field);
        self
    }

    pub fn with_geometric_height(mut self, field: Array3<FloatValue>) -> Self {
        self.geometric_height = Some(field);
        self
    }

    pub fn with_gas(mut self, name: &str, field: Array3<FloatValue>) -> Self {
        self.gases.insert(name.to_string(), field);
        self
    }

    pub fn build(self) -> FluxResult<AtmosphereGrid> {
        let temperature = self
            .temperature
            .ok_or_else(|| FluxError::MissingVariable(VAR_TEMPERATURE.to_string()))?;
        let geometric_height = self
            .geometric_height
            .ok_or_else(|| FluxError::MissingVariable(VAR_GEOMETRIC_HEIGHT.to_string()))?;

        AtmosphereGrid::new(
            CoordinateAxis::new(LAT, self.lat)?,
            CoordinateAxis::new(LON, self.lon)?,
            CoordinateAxis::new(PRESSURE, self.pressure)?,
            self.pressure_field,
            temperature,
            geometric_height,
            self.gases,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> AtmosphereGridBuilder {
        AtmosphereGridBuilder::new(vec![0.0, 10.0], vec![0.0, 10.0, 20.0], vec![1000.0, 500.0])
            .with_temperature(Array3::from_shape_fn((2, 3, 2), |(i, j, k)| {
                200.0 + (i * 100 + j * 10 + k) as f64
            }))
            .with_geometric_height(Array3::from_shape_fn((2, 3, 2), |(i, _, k)| {
                -500.0 + (i * 1000 + k * 5000) as f64
            }))
    }

    #[test]
    fn test_pressure_field_broadcast_from_coordinate() {
        let grid = builder().build().unwrap();
        let column = grid.column(VAR_PRESSURE, 1, 2).unwrap();
        assert_eq!(column.to_vec(), vec![1000.0, 500.0]);
    }

    #[test]
    fn test_column_and_surface_values() {
        let grid = builder().build().unwrap();
        assert_eq!(
            grid.column(VAR_TEMPERATURE, 1, 2).unwrap().to_vec(),
            vec![320.0, 321.0]
        );
        assert_eq!(grid.surface_temperature(1, 2).unwrap(), 320.0);
        assert_eq!(grid.surface_height(0, 0).unwrap(), -500.0);
    }

    #[test]
    fn test_mismatched_gas_shape() {
        let result = builder()
            .with_gas("CO2", Array3::zeros((2, 3, 3)))
            .build();
        match result {
            Err(FluxError::DimensionMismatch {
                variable,
                expected,
                found,
            }) => {
                assert_eq!(variable, "CO2");
                assert_eq!(expected, vec![2, 3, 2]);
                assert_eq!(found, vec![2, 3, 3]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_missing_temperature() {
        let result = AtmosphereGridBuilder::new(vec![0.0], vec![0.0], vec![1000.0])
            .with_geometric_height(Array3::zeros((1, 1, 1)))
            .build();
        assert!(matches!(result, Err(FluxError::MissingVariable(name)) if name == "temperature"));
    }

    #[test]
    fn test_deserialization_checks_field_shapes() {
        let grid = builder().with_gas("H2O", Array3::zeros((2, 3, 2))).build().unwrap();
        let mut value = serde_json::to_value(&grid).unwrap();
        let restored: AtmosphereGrid = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(restored.shape(), (2, 3, 2));
        assert!(restored.has_gas("H2O"));

        value["gases"]["H2O"]["dim"] = serde_json::json!([1, 1, 1]);
        value["gases"]["H2O"]["data"] = serde_json::json!([0.0]);
        let err = serde_json::from_value::<AtmosphereGrid>(value).unwrap_err();
        assert!(err.to_string().contains("H2O"), "{}", err);
    }

    #[test]
    fn test_unknown_field() {
        let grid = builder().build().unwrap();
        assert!(matches!(
            grid.field("CH4"),
            Err(FluxError::MissingVariable(name)) if name == "CH4"
        ));
    }
}
