//! Reading atmospheres and writing flux datasets
//!
//! The format is picked from the file extension:
//!
//! - `.json`: an [`AtmosphereFile`] document
//! - `.nc`: NetCDF, with the `netcdf` feature enabled

#[cfg(feature = "netcdf")]
pub mod netcdf;

use crate::atmosphere::{
    AtmosphereGrid, AtmosphereGridBuilder, VAR_GEOMETRIC_HEIGHT, VAR_PRESSURE, VAR_TEMPERATURE,
};
use crate::errors::{FluxError, FluxResult};
use crate::FloatValue;
use log::info;
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// JSON representation of an atmosphere
///
/// Every variable is stored flat in `(lat, lon, pressure)` row-major order.
/// `pressure` in `variables` is optional; without it the pressure coordinate
/// is used for every column. Any variable other than pressure, temperature and
/// geometric height is treated as a gas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtmosphereFile {
    pub lat: Vec<FloatValue>,
    pub lon: Vec<FloatValue>,
    pub pressure: Vec<FloatValue>,
    pub variables: BTreeMap<String, Vec<FloatValue>>,
}

impl AtmosphereFile {
    pub fn from_grid(grid: &AtmosphereGrid) -> FluxResult<Self> {
        let mut variables = BTreeMap::new();
        let names = [VAR_PRESSURE, VAR_TEMPERATURE, VAR_GEOMETRIC_HEIGHT]
            .into_iter()
            .chain(grid.gas_names());
        for name in names {
            // Standard layout iteration is row-major regardless of memory order
            let values = grid.field(name)?.iter().copied().collect();
            variables.insert(name.to_string(), values);
        }

        Ok(Self {
            lat: grid.lat().values().to_vec(),
            lon: grid.lon().values().to_vec(),
            pressure: grid.pressure().values().to_vec(),
            variables,
        })
    }

    pub fn into_grid(self) -> FluxResult<AtmosphereGrid> {
        let shape = (self.lat.len(), self.lon.len(), self.pressure.len());
        let mut builder = AtmosphereGridBuilder::new(self.lat, self.lon, self.pressure);

        for (name, values) in self.variables {
            let field = reshape(&name, values, shape)?;
            builder = match name.as_str() {
                VAR_PRESSURE => builder.with_pressure_field(field),
                VAR_TEMPERATURE => builder.with_temperature(field),
                VAR_GEOMETRIC_HEIGHT => builder.with_geometric_height(field),
                gas => builder.with_gas(gas, field),
            };
        }
        builder.build()
    }

    pub fn read(path: impl AsRef<Path>) -> FluxResult<Self> {
        let file = std::io::BufReader::new(std::fs::File::open(path)?);
        Ok(serde_json::from_reader(file)?)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> FluxResult<()> {
        let file = std::io::BufWriter::new(std::fs::File::create(path)?);
        serde_json::to_writer(file, self)?;
        Ok(())
    }
}

fn reshape(
    name: &str,
    values: Vec<FloatValue>,
    shape: (usize, usize, usize),
) -> FluxResult<Array3<FloatValue>> {
    let len = values.len();
    Array3::from_shape_vec(shape, values).map_err(|_| FluxError::DimensionMismatch {
        variable: name.to_string(),
        expected: vec![shape.0, shape.1, shape.2],
        found: vec![len],
    })
}

/// Load an atmosphere, picking the reader from the file extension
///
/// # Errors
///
/// [`FluxError::InvalidConfig`] for an unsupported extension, otherwise any
/// error of the reader or of grid validation.
pub fn load_atmosphere(path: impl AsRef<Path>) -> FluxResult<AtmosphereGrid> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    let grid = match extension.as_deref() {
        Some("json") => AtmosphereFile::read(path)?.into_grid()?,
        #[cfg(feature = "netcdf")]
        Some("nc") | Some("nc4") => netcdf::read_atmosphere(path)?,
        _ => {
            return Err(FluxError::InvalidConfig(format!(
                "Unsupported atmosphere file format: {}",
                path.display()
            )))
        }
    };

    let (n_lat, n_lon, n_levels) = grid.shape();
    info!(
        "Loaded atmosphere from {} ({} x {} x {}, gases: {})",
        path.display(),
        n_lat,
        n_lon,
        n_levels,
        grid.gas_names().collect::<Vec<_>>().join(", ")
    );
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document() -> AtmosphereFile {
        let n = 2 * 3 * 2;
        AtmosphereFile {
            lat: vec![-5.0, 5.0],
            lon: vec![0.0, 120.0, 240.0],
            pressure: vec![1000.0, 200.0],
            variables: BTreeMap::from([
                (
                    VAR_TEMPERATURE.to_string(),
                    (0..n).map(|v| 200.0 + v as f64).collect(),
                ),
                (VAR_GEOMETRIC_HEIGHT.to_string(), vec![0.0; n]),
                ("H2O".to_string(), vec![1e-3; n]),
            ]),
        }
    }

    #[test]
    fn test_into_grid_is_row_major() {
        let grid = document().into_grid().unwrap();
        assert_eq!(grid.shape(), (2, 3, 2));
        // flat index = (i * n_lon + j) * n_levels + k
        assert_eq!(grid.column(VAR_TEMPERATURE, 1, 2).unwrap().to_vec(), vec![210.0, 211.0]);
        // Pressure broadcast from the coordinate
        assert_eq!(grid.column(VAR_PRESSURE, 1, 0).unwrap().to_vec(), vec![1000.0, 200.0]);
        assert!(grid.has_gas("H2O"));
    }

    #[test]
    fn test_wrong_length_rejected() {
        let mut doc = document();
        doc.variables.insert("CO2".to_string(), vec![4e-4; 5]);
        match doc.into_grid() {
            Err(FluxError::DimensionMismatch {
                variable,
                expected,
                found,
            }) => {
                assert_eq!(variable, "CO2");
                assert_eq!(expected, vec![2, 3, 2]);
                assert_eq!(found, vec![5]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_missing_temperature() {
        let mut doc = document();
        doc.variables.remove(VAR_TEMPERATURE);
        assert!(matches!(
            doc.into_grid(),
            Err(FluxError::MissingVariable(name)) if name == VAR_TEMPERATURE
        ));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("atmosphere.json");
        document().write(&path).unwrap();

        let grid = load_atmosphere(&path).unwrap();
        let restored = AtmosphereFile::from_grid(&grid).unwrap();
        assert_eq!(restored.variables[VAR_TEMPERATURE], document().variables[VAR_TEMPERATURE]);
        assert_eq!(restored.variables[VAR_PRESSURE].len(), 12);
    }

    #[test]
    fn test_unsupported_extension() {
        assert!(matches!(
            load_atmosphere("atmosphere.grib2"),
            Err(FluxError::InvalidConfig(_))
        ));
    }
}
