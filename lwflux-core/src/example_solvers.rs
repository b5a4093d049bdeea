//! Stand-in solvers for exercising the pipeline without radiative-transfer physics
//!
//! Each solver counts how often it builds a lookup table and solves a column,
//! and keeps a per-instance set of setup names whose tables it has "persisted".

use crate::config::SimulationConfig;
use crate::errors::SolverError;
use crate::profile::ProfileBatch;
use crate::solver::{FluxSolver, SingleProfileResult, SolveRequest};
use crate::FloatValue;
use ndarray::{Array1, Array2};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Call counters shared by the example solvers
#[derive(Debug, Default)]
pub struct SolverCounters {
    builds: AtomicUsize,
    solves: AtomicUsize,
}

impl SolverCounters {
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn solves(&self) -> usize {
        self.solves.load(Ordering::SeqCst)
    }

    fn record_build(&self) {
        self.builds.fetch_add(1, Ordering::SeqCst);
    }

    fn record_solve(&self) {
        self.solves.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory stand-in for a solver's on-disk lookup-table cache
#[derive(Debug, Default)]
struct TableStore {
    tables: Mutex<HashSet<String>>,
}

impl TableStore {
    fn contains(&self, setup_name: &str) -> bool {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(setup_name)
    }

    fn insert(&self, setup_name: &str) {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(setup_name.to_string());
    }
}

fn uniform_result(n_frequencies: usize, n_levels: usize, value: FloatValue) -> SingleProfileResult {
    SingleProfileResult {
        spectral_flux_up: Array2::from_elem((n_frequencies, n_levels), value),
        spectral_flux_down: Array2::from_elem((n_frequencies, n_levels), value),
        flux_up: Array1::from_elem(n_levels, value),
        flux_down: Array1::from_elem(n_levels, value),
        heating_rate: Array1::from_elem(n_levels, value),
    }
}

/// Returns the same value for every field of every column
#[derive(Debug, Default)]
pub struct ConstantSolver {
    value: FloatValue,
    build_delay: Option<Duration>,
    counters: SolverCounters,
    store: TableStore,
}

impl ConstantSolver {
    pub fn new(value: FloatValue) -> Self {
        Self {
            value,
            ..Default::default()
        }
    }

    /// Sleep this long inside `build_lookup_table`
    pub fn with_build_delay(mut self, delay: Duration) -> Self {
        self.build_delay = Some(delay);
        self
    }

    pub fn counters(&self) -> &SolverCounters {
        &self.counters
    }
}

impl FluxSolver for ConstantSolver {
    fn lookup_table_exists(&self, config: &SimulationConfig) -> Result<bool, SolverError> {
        Ok(self.store.contains(config.setup_name()))
    }

    fn build_lookup_table(
        &self,
        _batch: &ProfileBatch,
        config: &SimulationConfig,
    ) -> Result<(), SolverError> {
        self.counters.record_build();
        if let Some(delay) = self.build_delay {
            std::thread::sleep(delay);
        }
        self.store.insert(config.setup_name());
        Ok(())
    }

    fn solve_single_profile(
        &self,
        request: &SolveRequest<'_>,
        config: &SimulationConfig,
    ) -> Result<SingleProfileResult, SolverError> {
        self.counters.record_solve();
        Ok(uniform_result(
            config.spectral_grid().len(),
            request.profile.n_levels(),
            self.value,
        ))
    }
}

/// Echoes its inputs back so tests can check what each column was solved with
///
/// - spectral up: the profile's temperature at each level, same for every frequency
/// - spectral down: the frequency index
/// - flux up: the surface temperature
/// - flux down: the surface altitude
/// - heating rate: the profile's first temperature level
#[derive(Debug, Default)]
pub struct EchoSolver {
    counters: SolverCounters,
    store: TableStore,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// Boundary conditions seen by [`EchoSolver`] for one call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordedRequest {
    pub lat: FloatValue,
    pub lon: FloatValue,
    pub surface_temperature: FloatValue,
    pub surface_altitude: FloatValue,
    pub surface_reflectivity: FloatValue,
}

impl EchoSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counters(&self) -> &SolverCounters {
        &self.counters
    }

    /// Requests in the order they were received
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl FluxSolver for EchoSolver {
    fn lookup_table_exists(&self, config: &SimulationConfig) -> Result<bool, SolverError> {
        Ok(self.store.contains(config.setup_name()))
    }

    fn build_lookup_table(
        &self,
        _batch: &ProfileBatch,
        config: &SimulationConfig,
    ) -> Result<(), SolverError> {
        self.counters.record_build();
        self.store.insert(config.setup_name());
        Ok(())
    }

    fn solve_single_profile(
        &self,
        request: &SolveRequest<'_>,
        config: &SimulationConfig,
    ) -> Result<SingleProfileResult, SolverError> {
        self.counters.record_solve();
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedRequest {
                lat: request.position.lat,
                lon: request.position.lon,
                surface_temperature: request.surface.temperature,
                surface_altitude: request.surface.altitude,
                surface_reflectivity: request.surface.reflectivity,
            });

        let temperature = request.profile.temperature();
        let n_levels = temperature.len();
        let n_frequencies = config.spectral_grid().len();
        let marker = temperature.first().copied().unwrap_or(FloatValue::NAN);

        Ok(SingleProfileResult {
            spectral_flux_up: Array2::from_shape_fn((n_frequencies, n_levels), |(_, k)| {
                temperature[k]
            }),
            spectral_flux_down: Array2::from_shape_fn((n_frequencies, n_levels), |(f, _)| {
                f as FloatValue
            }),
            flux_up: Array1::from_elem(n_levels, request.surface.temperature),
            flux_down: Array1::from_elem(n_levels, request.surface.altitude),
            heating_rate: Array1::from_elem(n_levels, marker),
        })
    }
}

/// Fails while checking for or building the lookup table, or for selected columns
#[derive(Debug)]
pub struct FailingSolver {
    message: String,
    fail_cache_check: bool,
    fail_lookup_table: bool,
    /// `(lat, lon)` labels whose solve fails
    failing_columns: Vec<(FloatValue, FloatValue)>,
    value: FloatValue,
    counters: SolverCounters,
    store: TableStore,
}

impl FailingSolver {
    pub fn failing_lookup_table(message: &str) -> Self {
        Self {
            message: message.to_string(),
            fail_cache_check: false,
            fail_lookup_table: true,
            failing_columns: vec![],
            value: 0.0,
            counters: SolverCounters::default(),
            store: TableStore::default(),
        }
    }

    /// Solve every column with `value` except those at the given `(lat, lon)` labels
    pub fn failing_columns(
        message: &str,
        columns: Vec<(FloatValue, FloatValue)>,
        value: FloatValue,
    ) -> Self {
        Self {
            message: message.to_string(),
            fail_cache_check: false,
            fail_lookup_table: false,
            failing_columns: columns,
            value,
            counters: SolverCounters::default(),
            store: TableStore::default(),
        }
    }

    /// Cannot tell whether a lookup table exists
    pub fn unreadable_lookup_table_cache(message: &str) -> Self {
        Self {
            fail_cache_check: true,
            ..Self::failing_lookup_table(message)
        }
    }

    pub fn counters(&self) -> &SolverCounters {
        &self.counters
    }
}

impl FluxSolver for FailingSolver {
    fn lookup_table_exists(&self, config: &SimulationConfig) -> Result<bool, SolverError> {
        if self.fail_cache_check {
            return Err(SolverError::new(self.message.clone()));
        }
        Ok(self.store.contains(config.setup_name()))
    }

    fn build_lookup_table(
        &self,
        _batch: &ProfileBatch,
        config: &SimulationConfig,
    ) -> Result<(), SolverError> {
        self.counters.record_build();
        if self.fail_lookup_table {
            return Err(SolverError::new(self.message.clone()));
        }
        self.store.insert(config.setup_name());
        Ok(())
    }

    fn solve_single_profile(
        &self,
        request: &SolveRequest<'_>,
        config: &SimulationConfig,
    ) -> Result<SingleProfileResult, SolverError> {
        self.counters.record_solve();
        let position = (request.position.lat, request.position.lon);
        if self.failing_columns.contains(&position) {
            return Err(SolverError::new(self.message.clone()));
        }
        Ok(uniform_result(
            config.spectral_grid().len(),
            request.profile.n_levels(),
            self.value,
        ))
    }
}
