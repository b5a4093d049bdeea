//! Python bindings
//!
//! A radiative-transfer solver written in Python can be plugged into the
//! pipeline through [`PythonFluxSolver`]. The object must provide:
//!
//! ```python
//! class Solver:
//!     def lookup_table_exists(self, setup_name: str) -> bool: ...
//!     def build_lookup_table(self, profiles: list[dict], config: dict) -> None: ...
//!     def solve_single_profile(
//!         self,
//!         profile: dict,
//!         surface_temperature: float,
//!         surface_altitude: float,
//!         surface_reflectivity: float,
//!         geographical_position: list[float],
//!     ) -> dict: ...
//! ```
//!
//! `solve_single_profile` returns a mapping with `spectral_flux_clearsky_up`,
//! `spectral_flux_clearsky_down` (`(n_frequencies, n_levels)` arrays),
//! `flux_clearsky_up`, `flux_clearsky_down` and `heating_rate_clearsky`.
//! The configuration reaches the Python side through `build_lookup_table`.
//! An exception raised by any of these methods becomes a [`SolverError`]; one
//! from `lookup_table_exists` fails the run instead of forcing a rebuild.

use crate::aggregator::FluxRunOutput;
use crate::config::{RunOptions, SimulationConfig};
use crate::errors::{FluxError, SolverError};
use crate::profile::{ProfileBatch, ProfileRecord};
use crate::simulation::LongwaveFluxSimulation;
use crate::solver::{FluxSolver, SingleProfileResult, SolveRequest};
use crate::FloatValue;
use numpy::{PyArray1, PyReadonlyArray1, PyReadonlyArray2, ToPyArray};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};
use std::path::PathBuf;
use std::sync::Arc;

pub const KEY_SPECTRAL_FLUX_UP: &str = "spectral_flux_clearsky_up";
pub const KEY_SPECTRAL_FLUX_DOWN: &str = "spectral_flux_clearsky_down";
pub const KEY_FLUX_UP: &str = "flux_clearsky_up";
pub const KEY_FLUX_DOWN: &str = "flux_clearsky_down";
pub const KEY_HEATING_RATE: &str = "heating_rate_clearsky";

impl From<FluxError> for PyErr {
    fn from(e: FluxError) -> Self {
        match e {
            FluxError::InvalidConfig(_)
            | FluxError::MissingVariable(_)
            | FluxError::DimensionMismatch { .. } => PyValueError::new_err(e.to_string()),
            _ => PyRuntimeError::new_err(e.to_string()),
        }
    }
}

fn solver_error(e: PyErr) -> SolverError {
    SolverError::new(e.to_string())
}

/// Wrapper to use a Python object as a [`FluxSolver`]
#[derive(Debug)]
pub struct PythonFluxSolver {
    pub solver: Py<PyAny>,
}

impl PythonFluxSolver {
    pub fn new(solver: Py<PyAny>) -> Self {
        Self { solver }
    }
}

fn profile_to_dict<'py>(py: Python<'py>, profile: &ProfileRecord) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new_bound(py);
    let origin = profile.origin();
    dict.set_item("lat", origin.lat)?;
    dict.set_item("lon", origin.lon)?;
    dict.set_item("pressure", PyArray1::from_slice_bound(py, profile.pressure()))?;
    dict.set_item("temperature", PyArray1::from_slice_bound(py, profile.temperature()))?;
    for (name, values) in profile.gases() {
        dict.set_item(name, PyArray1::from_slice_bound(py, values))?;
    }
    Ok(dict)
}

fn config_to_dict<'py>(py: Python<'py>, config: &SimulationConfig) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new_bound(py);
    dict.set_item("setup_name", config.setup_name())?;
    let species: Vec<&str> = config.species().iter().map(|s| s.as_str()).collect();
    dict.set_item("species", species)?;
    dict.set_item(
        "f_grid",
        PyArray1::from_slice_bound(py, config.spectral_grid().frequency()),
    )?;
    dict.set_item(
        "wavenumber",
        PyArray1::from_slice_bound(py, config.spectral_grid().wavenumber()),
    )?;
    dict.set_item("surface_reflectivity", config.surface_reflectivity())?;
    Ok(dict)
}

fn extract_result(result: &Bound<'_, PyAny>) -> PyResult<SingleProfileResult> {
    let spectral = |key: &str| -> PyResult<_> {
        let array: PyReadonlyArray2<FloatValue> = result.get_item(key)?.extract()?;
        Ok(array.as_array().to_owned())
    };
    let levels = |key: &str| -> PyResult<_> {
        let array: PyReadonlyArray1<FloatValue> = result.get_item(key)?.extract()?;
        Ok(array.as_array().to_owned())
    };

    Ok(SingleProfileResult {
        spectral_flux_up: spectral(KEY_SPECTRAL_FLUX_UP)?,
        spectral_flux_down: spectral(KEY_SPECTRAL_FLUX_DOWN)?,
        flux_up: levels(KEY_FLUX_UP)?,
        flux_down: levels(KEY_FLUX_DOWN)?,
        heating_rate: levels(KEY_HEATING_RATE)?,
    })
}

impl FluxSolver for PythonFluxSolver {
    fn lookup_table_exists(&self, config: &SimulationConfig) -> Result<bool, SolverError> {
        Python::with_gil(|py| {
            self.solver
                .bind(py)
                .call_method1("lookup_table_exists", (config.setup_name(),))?
                .extract::<bool>()
        })
        .map_err(solver_error)
    }

    fn build_lookup_table(
        &self,
        batch: &ProfileBatch,
        config: &SimulationConfig,
    ) -> Result<(), SolverError> {
        Python::with_gil(|py| -> PyResult<()> {
            let profiles = PyList::empty_bound(py);
            for profile in batch.iter() {
                profiles.append(profile_to_dict(py, profile)?)?;
            }
            self.solver
                .bind(py)
                .call_method1("build_lookup_table", (profiles, config_to_dict(py, config)?))?;
            Ok(())
        })
        .map_err(solver_error)
    }

    fn solve_single_profile(
        &self,
        request: &SolveRequest<'_>,
        _config: &SimulationConfig,
    ) -> Result<SingleProfileResult, SolverError> {
        Python::with_gil(|py| -> PyResult<SingleProfileResult> {
            let position = vec![request.position.lat, request.position.lon];
            let result = self.solver.bind(py).call_method1(
                "solve_single_profile",
                (
                    profile_to_dict(py, request.profile)?,
                    request.surface.temperature,
                    request.surface.altitude,
                    request.surface.reflectivity,
                    position,
                ),
            )?;
            extract_result(&result)
        })
        .map_err(solver_error)
    }
}

fn output_to_dict<'py>(py: Python<'py>, output: &FluxRunOutput) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new_bound(py);
    let spectral = &output.spectral;
    let integrated = &output.integrated;

    dict.set_item("lat", PyArray1::from_slice_bound(py, spectral.lat().values()))?;
    dict.set_item("lon", PyArray1::from_slice_bound(py, spectral.lon().values()))?;
    dict.set_item("pressure", PyArray1::from_slice_bound(py, spectral.pressure().values()))?;
    dict.set_item("f_grid", PyArray1::from_slice_bound(py, spectral.f_grid().values()))?;
    dict.set_item("wavenumber", PyArray1::from_slice_bound(py, spectral.wavenumber()))?;

    dict.set_item("spectral_flux_upward", spectral.flux_upward.to_pyarray_bound(py))?;
    dict.set_item("spectral_flux_downward", spectral.flux_downward.to_pyarray_bound(py))?;
    dict.set_item("flux_upward", integrated.flux_upward.to_pyarray_bound(py))?;
    dict.set_item("flux_downward", integrated.flux_downward.to_pyarray_bound(py))?;
    dict.set_item("heating_rate", integrated.heating_rate.to_pyarray_bound(py))?;

    let failed: Vec<(FloatValue, FloatValue)> = output
        .report
        .failed_cells
        .iter()
        .map(|cell| (cell.lat, cell.lon))
        .collect();
    dict.set_item("failed_cells", failed)?;
    Ok(dict)
}

/// Run a longwave flux simulation over an atmosphere file.
///
/// `config` and `options` are TOML documents; defaults apply when omitted.
/// Returns a dict of numpy arrays keyed by coordinate and variable name.
#[pyfunction]
#[pyo3(signature = (path, solver, config=None, options=None))]
pub fn run_longwave_fluxes<'py>(
    py: Python<'py>,
    path: PathBuf,
    solver: Py<PyAny>,
    config: Option<&str>,
    options: Option<&str>,
) -> PyResult<Bound<'py, PyDict>> {
    let config = match config {
        Some(contents) => SimulationConfig::from_toml_str(contents)?,
        None => SimulationConfig::default(),
    };
    let options = match options {
        Some(contents) => RunOptions::from_toml_str(contents)?,
        None => RunOptions::default(),
    };

    let simulation =
        LongwaveFluxSimulation::new(config, options, Arc::new(PythonFluxSolver::new(solver)));
    // Solver calls take the GIL themselves, possibly from other threads
    let output = py.allow_threads(|| simulation.run_from_path(&path))?;
    output_to_dict(py, &output)
}

#[pymodule]
pub fn core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(run_longwave_fluxes, m)?)?;
    Ok(())
}
