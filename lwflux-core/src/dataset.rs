//! Gridded flux outputs
//!
//! Two zero-initialised datasets are allocated before the grid loop and filled
//! one `(lat, lon)` cell at a time:
//!
//! - [`FluxDatasetSpectral`]: `flux_upward`, `flux_downward` on
//!   `(lat, lon, pressure, f_grid)`
//! - [`FluxDatasetIntegrated`]: `flux_upward`, `flux_downward`, `heating_rate`
//!   on `(lat, lon, pressure)`
//!
//! Cells are addressed by coordinate label. [`FluxDatasetSpectral::locate`]
//! resolves a label pair to a [`CellIndex`] once; writes then go through that
//! index and check the shape of what is written.

use crate::atmosphere::AtmosphereGrid;
use crate::config::SpectralGrid;
use crate::coordinates::{CoordinateAxis, F_GRID, LAT, LON, PRESSURE};
use crate::errors::{FluxError, FluxResult};
use crate::FloatValue;
use ndarray::{s, Array3, Array4, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Resolved offsets of a `(lat, lon)` cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellIndex {
    pub lat_index: usize,
    pub lon_index: usize,
}

fn locate(
    lat_axis: &CoordinateAxis,
    lon_axis: &CoordinateAxis,
    lat: FloatValue,
    lon: FloatValue,
) -> FluxResult<CellIndex> {
    Ok(CellIndex {
        lat_index: lat_axis.position(lat)?,
        lon_index: lon_axis.position(lon)?,
    })
}

fn check_cell(cell: CellIndex, n_lat: usize, n_lon: usize) -> FluxResult<()> {
    if cell.lat_index >= n_lat || cell.lon_index >= n_lon {
        return Err(FluxError::ShapeMismatch {
            field: "cell index".to_string(),
            expected: vec![n_lat, n_lon],
            found: vec![cell.lat_index, cell.lon_index],
        });
    }
    Ok(())
}

fn check_shape(field: &str, found: &[usize], expected: &[usize]) -> FluxResult<()> {
    if found != expected {
        return Err(FluxError::ShapeMismatch {
            field: field.to_string(),
            expected: expected.to_vec(),
            found: found.to_vec(),
        });
    }
    Ok(())
}

/// Spectrally resolved fluxes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SpectralData", into = "SpectralData")]
pub struct FluxDatasetSpectral {
    lat: CoordinateAxis,
    lon: CoordinateAxis,
    pressure: CoordinateAxis,
    /// Frequencies (Hz)
    f_grid: CoordinateAxis,
    /// Wavenumbers (cm^-1) matching `f_grid`
    wavenumber: Vec<FloatValue>,
    pub flux_upward: Array4<FloatValue>,
    pub flux_downward: Array4<FloatValue>,
}

#[derive(Serialize, Deserialize)]
struct SpectralData {
    lat: CoordinateAxis,
    lon: CoordinateAxis,
    pressure: CoordinateAxis,
    f_grid: CoordinateAxis,
    wavenumber: Vec<FloatValue>,
    flux_upward: Array4<FloatValue>,
    flux_downward: Array4<FloatValue>,
}

impl TryFrom<SpectralData> for FluxDatasetSpectral {
    type Error = FluxError;

    fn try_from(data: SpectralData) -> Result<Self, Self::Error> {
        let expected = [data.lat.len(), data.lon.len(), data.pressure.len(), data.f_grid.len()];
        check_shape("flux_upward", data.flux_upward.shape(), &expected)?;
        check_shape("flux_downward", data.flux_downward.shape(), &expected)?;
        check_shape("wavenumber", &[data.wavenumber.len()], &[data.f_grid.len()])?;
        Ok(Self {
            lat: data.lat,
            lon: data.lon,
            pressure: data.pressure,
            f_grid: data.f_grid,
            wavenumber: data.wavenumber,
            flux_upward: data.flux_upward,
            flux_downward: data.flux_downward,
        })
    }
}

impl From<FluxDatasetSpectral> for SpectralData {
    fn from(dataset: FluxDatasetSpectral) -> Self {
        SpectralData {
            lat: dataset.lat,
            lon: dataset.lon,
            pressure: dataset.pressure,
            f_grid: dataset.f_grid,
            wavenumber: dataset.wavenumber,
            flux_upward: dataset.flux_upward,
            flux_downward: dataset.flux_downward,
        }
    }
}

impl FluxDatasetSpectral {
    /// Allocate a zero-filled dataset on the grid's coordinates
    pub fn zeros(grid: &AtmosphereGrid, spectral_grid: &SpectralGrid) -> FluxResult<Self> {
        let f_grid = CoordinateAxis::new(F_GRID, spectral_grid.frequency().to_vec())?;
        let shape = (grid.lat().len(), grid.lon().len(), grid.pressure().len(), f_grid.len());
        Ok(Self {
            lat: grid.lat().clone(),
            lon: grid.lon().clone(),
            pressure: grid.pressure().clone(),
            f_grid,
            wavenumber: spectral_grid.wavenumber().to_vec(),
            flux_upward: Array4::zeros(shape),
            flux_downward: Array4::zeros(shape),
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

    pub fn f_grid(&self) -> &CoordinateAxis {
        &self.f_grid
    }

    pub fn wavenumber(&self) -> &[FloatValue] {
        &self.wavenumber
    }

    pub fn dims(&self) -> [&str; 4] {
        [LAT, LON, PRESSURE, F_GRID]
    }

    pub fn shape(&self) -> (usize, usize, usize, usize) {
        self.flux_upward.dim()
    }

    pub fn locate(&self, lat: FloatValue, lon: FloatValue) -> FluxResult<CellIndex> {
        locate(&self.lat, &self.lon, lat, lon)
    }

    /// Write one cell by coordinate label. Slices are `(pressure, f_grid)`.
    pub fn set_slice(
        &mut self,
        lat: FloatValue,
        lon: FloatValue,
        flux_upward: ArrayView2<'_, FloatValue>,
        flux_downward: ArrayView2<'_, FloatValue>,
    ) -> FluxResult<()> {
        let cell = self.locate(lat, lon)?;
        self.set_cell(cell, flux_upward, flux_downward)
    }

    /// Write one resolved cell. Slices are `(pressure, f_grid)`.
    pub fn set_cell(
        &mut self,
        cell: CellIndex,
        flux_upward: ArrayView2<'_, FloatValue>,
        flux_downward: ArrayView2<'_, FloatValue>,
    ) -> FluxResult<()> {
        let (n_lat, n_lon, n_levels, n_freq) = self.shape();
        check_cell(cell, n_lat, n_lon)?;
        check_shape("flux_upward", flux_upward.shape(), &[n_levels, n_freq])?;
        check_shape("flux_downward", flux_downward.shape(), &[n_levels, n_freq])?;

        self.flux_upward
            .slice_mut(s![cell.lat_index, cell.lon_index, .., ..])
            .assign(&flux_upward);
        self.flux_downward
            .slice_mut(s![cell.lat_index, cell.lon_index, .., ..])
            .assign(&flux_downward);
        Ok(())
    }

    /// Fill one cell with NaN
    pub fn invalidate_cell(&mut self, cell: CellIndex) -> FluxResult<()> {
        let (n_lat, n_lon, _, _) = self.shape();
        check_cell(cell, n_lat, n_lon)?;
        self.flux_upward
            .slice_mut(s![cell.lat_index, cell.lon_index, .., ..])
            .fill(FloatValue::NAN);
        self.flux_downward
            .slice_mut(s![cell.lat_index, cell.lon_index, .., ..])
            .fill(FloatValue::NAN);
        Ok(())
    }

    /// `(flux_upward, flux_downward)` of a cell by label, each `(pressure, f_grid)`
    pub fn slice(
        &self,
        lat: FloatValue,
        lon: FloatValue,
    ) -> FluxResult<(ArrayView2<'_, FloatValue>, ArrayView2<'_, FloatValue>)> {
        let cell = self.locate(lat, lon)?;
        Ok((
            self.flux_upward.slice(s![cell.lat_index, cell.lon_index, .., ..]),
            self.flux_downward.slice(s![cell.lat_index, cell.lon_index, .., ..]),
        ))
    }

    /// Serialise to JSON. JSON has no NaN, so invalidated cells are written as
    /// `null` and cannot be read back with [`Self::read_json`].
    pub fn write_json(&self, path: impl AsRef<Path>) -> FluxResult<()> {
        let file = std::io::BufWriter::new(std::fs::File::create(path)?);
        serde_json::to_writer(file, self)?;
        Ok(())
    }

    pub fn read_json(path: impl AsRef<Path>) -> FluxResult<Self> {
        let file = std::io::BufReader::new(std::fs::File::open(path)?);
        Ok(serde_json::from_reader(file)?)
    }
}

/// Spectrally integrated fluxes and heating rates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "IntegratedData", into = "IntegratedData")]
pub struct FluxDatasetIntegrated {
    lat: CoordinateAxis,
    lon: CoordinateAxis,
    pressure: CoordinateAxis,
    pub flux_upward: Array3<FloatValue>,
    pub flux_downward: Array3<FloatValue>,
    pub heating_rate: Array3<FloatValue>,
}

/// One cell of a [`FluxDatasetIntegrated`], each field indexed by pressure level
#[derive(Debug, Clone, Copy)]
pub struct IntegratedSlice<'a> {
    pub flux_upward: ArrayView1<'a, FloatValue>,
    pub flux_downward: ArrayView1<'a, FloatValue>,
    pub heating_rate: ArrayView1<'a, FloatValue>,
}

#[derive(Serialize, Deserialize)]
struct IntegratedData {
    lat: CoordinateAxis,
    lon: CoordinateAxis,
    pressure: CoordinateAxis,
    flux_upward: Array3<FloatValue>,
    flux_downward: Array3<FloatValue>,
    heating_rate: Array3<FloatValue>,
}

impl TryFrom<IntegratedData> for FluxDatasetIntegrated {
    type Error = FluxError;

    fn try_from(data: IntegratedData) -> Result<Self, Self::Error> {
        let expected = [data.lat.len(), data.lon.len(), data.pressure.len()];
        check_shape("flux_upward", data.flux_upward.shape(), &expected)?;
        check_shape("flux_downward", data.flux_downward.shape(), &expected)?;
        check_shape("heating_rate", data.heating_rate.shape(), &expected)?;
        Ok(Self {
            lat: data.lat,
            lon: data.lon,
            pressure: data.pressure,
            flux_upward: data.flux_upward,
            flux_downward: data.flux_downward,
            heating_rate: data.heating_rate,
        })
    }
}

impl From<FluxDatasetIntegrated> for IntegratedData {
    fn from(dataset: FluxDatasetIntegrated) -> Self {
        IntegratedData {
            lat: dataset.lat,
            lon: dataset.lon,
            pressure: dataset.pressure,
            flux_upward: dataset.flux_upward,
            flux_downward: dataset.flux_downward,
            heating_rate: dataset.heating_rate,
        }
    }
}

impl FluxDatasetIntegrated {
    /// Allocate a zero-filled dataset on the grid's coordinates
    pub fn zeros(grid: &AtmosphereGrid) -> Self {
        let shape = (grid.lat().len(), grid.lon().len(), grid.pressure().len());
        Self {
            lat: grid.lat().clone(),
            lon: grid.lon().clone(),
            pressure: grid.pressure().clone(),
            flux_upward: Array3::zeros(shape),
            flux_downward: Array3::zeros(shape),
            heating_rate: Array3::zeros(shape),
        }
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

    pub fn dims(&self) -> [&str; 3] {
        [LAT, LON, PRESSURE]
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.flux_upward.dim()
    }

    pub fn locate(&self, lat: FloatValue, lon: FloatValue) -> FluxResult<CellIndex> {
        locate(&self.lat, &self.lon, lat, lon)
    }

    /// Write one cell by coordinate label
    pub fn set_slice(
        &mut self,
        lat: FloatValue,
        lon: FloatValue,
        values: IntegratedSlice<'_>,
    ) -> FluxResult<()> {
        let cell = self.locate(lat, lon)?;
        self.set_cell(cell, values)
    }

    /// Write one resolved cell
    pub fn set_cell(&mut self, cell: CellIndex, values: IntegratedSlice<'_>) -> FluxResult<()> {
        let (n_lat, n_lon, n_levels) = self.shape();
        check_cell(cell, n_lat, n_lon)?;
        check_shape("flux_upward", values.flux_upward.shape(), &[n_levels])?;
        check_shape("flux_downward", values.flux_downward.shape(), &[n_levels])?;
        check_shape("heating_rate", values.heating_rate.shape(), &[n_levels])?;

        self.flux_upward
            .slice_mut(s![cell.lat_index, cell.lon_index, ..])
            .assign(&values.flux_upward);
        self.flux_downward
            .slice_mut(s![cell.lat_index, cell.lon_index, ..])
            .assign(&values.flux_downward);
        self.heating_rate
            .slice_mut(s![cell.lat_index, cell.lon_index, ..])
            .assign(&values.heating_rate);
        Ok(())
    }

    /// Fill one cell with NaN
    pub fn invalidate_cell(&mut self, cell: CellIndex) -> FluxResult<()> {
        let (n_lat, n_lon, _) = self.shape();
        check_cell(cell, n_lat, n_lon)?;
        for field in [
            &mut self.flux_upward,
            &mut self.flux_downward,
            &mut self.heating_rate,
        ] {
            field
                .slice_mut(s![cell.lat_index, cell.lon_index, ..])
                .fill(FloatValue::NAN);
        }
        Ok(())
    }

    /// Values of a cell by label
    pub fn slice(&self, lat: FloatValue, lon: FloatValue) -> FluxResult<IntegratedSlice<'_>> {
        let cell = self.locate(lat, lon)?;
        Ok(IntegratedSlice {
            flux_upward: self.flux_upward.slice(s![cell.lat_index, cell.lon_index, ..]),
            flux_downward: self.flux_downward.slice(s![cell.lat_index, cell.lon_index, ..]),
            heating_rate: self.heating_rate.slice(s![cell.lat_index, cell.lon_index, ..]),
        })
    }

    /// Serialise to JSON. JSON has no NaN, so invalidated cells are written as
    /// `null` and cannot be read back with [`Self::read_json`].
    pub fn write_json(&self, path: impl AsRef<Path>) -> FluxResult<()> {
        let file = std::io::BufWriter::new(std::fs::File::create(path)?);
        serde_json::to_writer(file, self)?;
        Ok(())
    }

    pub fn read_json(path: impl AsRef<Path>) -> FluxResult<Self> {
        let file = std::io::BufReader::new(std::fs::File::open(path)?);
        Ok(serde_json::from_reader(file)?)
    }
}
