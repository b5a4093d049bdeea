//! NetCDF atmospheres and flux datasets
//!
//! Atmosphere files carry `lat`, `lon` and `pressure` coordinate variables.
//! Every variable spanning exactly those three dimensions is read as a field,
//! in whatever dimension order it was stored, and permuted to
//! `(lat, lon, pressure)`.

use crate::atmosphere::{AtmosphereGrid, VAR_GEOMETRIC_HEIGHT, VAR_TEMPERATURE};
use crate::coordinates::{CoordinateAxis, F_GRID, LAT, LON, PRESSURE};
use crate::dataset::{FluxDatasetIntegrated, FluxDatasetSpectral};
use crate::errors::{FluxError, FluxResult};
use crate::FloatValue;
use log::debug;
use ndarray::{Array, Array3, ArrayD, Dimension, Ix3, IxDyn};
use std::collections::BTreeMap;
use std::path::Path;

const FIELD_DIMS: [&str; 3] = [LAT, LON, PRESSURE];

pub fn read_atmosphere(path: impl AsRef<Path>) -> FluxResult<AtmosphereGrid> {
    let file = netcdf::open(path.as_ref())?;

    let lat = read_coordinate(&file, LAT)?;
    let lon = read_coordinate(&file, LON)?;
    let pressure = read_coordinate(&file, PRESSURE)?;

    let mut temperature = None;
    let mut geometric_height = None;
    let mut gases = BTreeMap::new();

    for variable in file.variables() {
        let dims: Vec<String> = variable
            .dimensions()
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        if dims.len() != 3 || !FIELD_DIMS.iter().all(|axis| dims.iter().any(|d| d == axis)) {
            continue;
        }

        let name = variable.name().to_string();
        let field = read_field(&variable, &name, &dims)?;
        debug!("Read {} with dimensions {:?}", name, dims);
        match name.as_str() {
            VAR_TEMPERATURE => temperature = Some(field),
            VAR_GEOMETRIC_HEIGHT => geometric_height = Some(field),
            _ => {
                gases.insert(name, field);
            }
        }
    }

    AtmosphereGrid::new(
        lat,
        lon,
        pressure,
        None,
        temperature.ok_or_else(|| FluxError::MissingVariable(VAR_TEMPERATURE.to_string()))?,
        geometric_height
            .ok_or_else(|| FluxError::MissingVariable(VAR_GEOMETRIC_HEIGHT.to_string()))?,
        gases,
    )
}

fn read_coordinate(file: &netcdf::File, name: &str) -> FluxResult<CoordinateAxis> {
    let variable = file
        .variable(name)
        .ok_or_else(|| FluxError::MissingVariable(name.to_string()))?;
    let values: Vec<FloatValue> = variable.get_values::<FloatValue, _>(..)?;
    CoordinateAxis::new(name, values)
}

fn read_field(
    variable: &netcdf::Variable,
    name: &str,
    dims: &[String],
) -> FluxResult<Array3<FloatValue>> {
    let lens: Vec<usize> = variable.dimensions().iter().map(|d| d.len()).collect();
    let values: Vec<FloatValue> = variable.get_values::<FloatValue, _>(..)?;
    let n_values = values.len();

    let stored = ArrayD::from_shape_vec(IxDyn(&lens), values).map_err(|_| {
        FluxError::DimensionMismatch {
            variable: name.to_string(),
            expected: lens.clone(),
            found: vec![n_values],
        }
    })?;

    // Position of each target axis in the stored order
    let order: Vec<usize> = FIELD_DIMS
        .iter()
        .filter_map(|axis| dims.iter().position(|d| d == axis))
        .collect();

    let permuted = stored
        .permuted_axes(IxDyn(&order))
        .into_dimensionality::<Ix3>()
        .map_err(|_| FluxError::DimensionMismatch {
            variable: name.to_string(),
            expected: vec![3],
            found: vec![dims.len()],
        })?;
    Ok(permuted.as_standard_layout().into_owned())
}

fn write_coordinate(
    file: &mut netcdf::FileMut,
    axis: &CoordinateAxis,
    units: &str,
) -> FluxResult<()> {
    file.add_dimension(axis.name(), axis.len())?;
    let mut variable = file.add_variable::<FloatValue>(axis.name(), &[axis.name()])?;
    variable.put_values(axis.values(), ..)?;
    variable.put_attribute("units", units)?;
    Ok(())
}

fn write_field<D: Dimension>(
    file: &mut netcdf::FileMut,
    name: &str,
    dims: &[&str],
    units: &str,
    values: &Array<FloatValue, D>,
) -> FluxResult<()> {
    let flat: Vec<FloatValue> = values.iter().copied().collect();
    let mut variable = file.add_variable::<FloatValue>(name, dims)?;
    variable.put_values(&flat, ..)?;
    variable.put_attribute("units", units)?;
    Ok(())
}

/// Write a spectral dataset, including the auxiliary `wavenumber` variable
pub fn write_spectral(dataset: &FluxDatasetSpectral, path: impl AsRef<Path>) -> FluxResult<()> {
    let mut file = netcdf::create(path.as_ref())?;

    write_coordinate(&mut file, dataset.lat(), "degrees_north")?;
    write_coordinate(&mut file, dataset.lon(), "degrees_east")?;
    write_coordinate(&mut file, dataset.pressure(), "Pa")?;
    write_coordinate(&mut file, dataset.f_grid(), "Hz")?;

    let mut wavenumber = file.add_variable::<FloatValue>("wavenumber", &[F_GRID])?;
    wavenumber.put_values(dataset.wavenumber(), ..)?;
    wavenumber.put_attribute("units", "cm-1")?;

    let dims = dataset.dims();
    write_field(&mut file, "flux_upward", &dims, "W m-2 Hz-1", &dataset.flux_upward)?;
    write_field(&mut file, "flux_downward", &dims, "W m-2 Hz-1", &dataset.flux_downward)?;
    Ok(())
}

pub fn write_integrated(dataset: &FluxDatasetIntegrated, path: impl AsRef<Path>) -> FluxResult<()> {
    let mut file = netcdf::create(path.as_ref())?;

    write_coordinate(&mut file, dataset.lat(), "degrees_north")?;
    write_coordinate(&mut file, dataset.lon(), "degrees_east")?;
    write_coordinate(&mut file, dataset.pressure(), "Pa")?;

    let dims = dataset.dims();
    write_field(&mut file, "flux_upward", &dims, "W m-2", &dataset.flux_upward)?;
    write_field(&mut file, "flux_downward", &dims, "W m-2", &dataset.flux_downward)?;
    write_field(&mut file, "heating_rate", &dims, "K d-1", &dataset.heating_rate)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atmosphere::AtmosphereGridBuilder;

    #[test]
    fn test_fields_permuted_to_lat_lon_pressure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("atmosphere.nc");

        {
            let mut file = netcdf::create(&path).unwrap();
            for (name, values) in [
                (LAT, vec![0.0, 10.0]),
                (LON, vec![0.0, 90.0, 180.0]),
                (PRESSURE, vec![1000.0, 500.0]),
            ] {
                file.add_dimension(name, values.len()).unwrap();
                let mut var = file.add_variable::<f64>(name, &[name]).unwrap();
                var.put_values(&values, ..).unwrap();
            }
            // Stored as (pressure, lat, lon)
            let temperature: Vec<f64> = (0..12).map(|v| v as f64).collect();
            let mut var = file
                .add_variable::<f64>(VAR_TEMPERATURE, &[PRESSURE, LAT, LON])
                .unwrap();
            var.put_values(&temperature, ..).unwrap();
            let mut var = file
                .add_variable::<f64>(VAR_GEOMETRIC_HEIGHT, &[LAT, LON, PRESSURE])
                .unwrap();
            var.put_values(&[0.0; 12], ..).unwrap();
            let mut var = file.add_variable::<f64>("H2O", &[LON, LAT, PRESSURE]).unwrap();
            var.put_values(&[1e-3; 12], ..).unwrap();
        }

        let grid = read_atmosphere(&path).unwrap();
        assert_eq!(grid.shape(), (2, 3, 2));
        // stored[k, i, j] = k * 6 + i * 3 + j
        assert_eq!(
            grid.column(VAR_TEMPERATURE, 1, 2).unwrap().to_vec(),
            vec![5.0, 11.0]
        );
        assert!(grid.has_gas("H2O"));
    }

    #[test]
    fn test_write_integrated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("integrated.nc");
        let grid = AtmosphereGridBuilder::new(vec![0.0], vec![0.0, 10.0], vec![1000.0, 100.0])
            .with_temperature(Array3::from_elem((1, 2, 2), 250.0))
            .with_geometric_height(Array3::zeros((1, 2, 2)))
            .build()
            .unwrap();

        let mut dataset = FluxDatasetIntegrated::zeros(&grid);
        dataset.heating_rate.fill(-1.5);
        write_integrated(&dataset, &path).unwrap();

        let file = netcdf::open(&path).unwrap();
        let heating: Vec<f64> = file
            .variable("heating_rate")
            .unwrap()
            .get_values::<f64, _>(..)
            .unwrap();
        assert_eq!(heating, vec![-1.5; 4]);
    }
}
