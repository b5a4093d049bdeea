//! Per-grid-point driver loop
//!
//! The aggregator walks the horizontal grid latitude-outer, longitude-inner,
//! solves each column with its profile and boundary conditions, and scatters
//! the results into the output datasets by coordinate label.
//!
//! # States
//!
//! ```text
//! NotStarted -> Iterating(i, j) -> ... -> Done
//!                     |
//!                     +-> Failed(i, j)
//! ```
//!
//! `Failed` is absorbing. Under [`FailurePolicy::SkipCell`] a failing column is
//! filled with NaN and recorded instead, and the loop carries on.
//!
//! The lookup table has to be ready before [`FluxAggregator::run`] is called;
//! [`LongwaveFluxSimulation`](crate::simulation::LongwaveFluxSimulation)
//! takes care of the ordering.

use crate::atmosphere::AtmosphereGrid;
use crate::config::{ExecutionMode, FailurePolicy, RunOptions, SimulationConfig};
use crate::dataset::{FluxDatasetIntegrated, FluxDatasetSpectral, IntegratedSlice};
use crate::errors::{FluxError, FluxResult};
use crate::indexing::{checked_batch_index, GridShape, IndexStride};
use crate::lookup_table::LookupTableStatus;
use crate::profile::ProfileBatch;
use crate::solver::{
    FluxSolver, GeographicPosition, SingleProfileResult, SolveRequest, SurfaceConditions,
};
use crate::FloatValue;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Raise a surface altitude to the admissible floor
///
/// A NaN height also becomes the floor, so the result is never below it.
pub fn clamp_surface_altitude(altitude: FloatValue, floor: FloatValue) -> FloatValue {
    altitude.max(floor)
}

/// Progress of the grid loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    NotStarted,
    Iterating { lat_index: usize, lon_index: usize },
    Done,
    Failed { lat_index: usize, lon_index: usize },
}

/// A column skipped under [`FailurePolicy::SkipCell`]
#[derive(Debug, Clone, PartialEq)]
pub struct FailedCell {
    pub lat_index: usize,
    pub lon_index: usize,
    pub lat: FloatValue,
    pub lon: FloatValue,
    pub reason: String,
}

/// Summary of a completed run
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Columns solved and written
    pub processed: usize,
    pub failed_cells: Vec<FailedCell>,
    /// Columns whose profile was built for a different grid point
    pub mismatched_profiles: usize,
    pub lookup_table: Option<LookupTableStatus>,
    pub elapsed: Duration,
}

/// Datasets and report produced by a run
#[derive(Debug, Clone)]
pub struct FluxRunOutput {
    pub spectral: FluxDatasetSpectral,
    pub integrated: FluxDatasetIntegrated,
    pub report: RunReport,
}

/// A solved column, ready to be written
struct CellSolution {
    lat: FloatValue,
    lon: FloatValue,
    result: SingleProfileResult,
    profile_mismatch: bool,
}

/// Drives the solver over every column of a grid
pub struct FluxAggregator<'a, S: FluxSolver + ?Sized> {
    solver: &'a S,
    config: &'a SimulationConfig,
    grid: &'a AtmosphereGrid,
    batch: &'a ProfileBatch,
    options: &'a RunOptions,
    state: AggregatorState,
}

impl<'a, S: FluxSolver + ?Sized> FluxAggregator<'a, S> {
    /// # Errors
    ///
    /// [`FluxError::DimensionMismatch`] if the batch was not built for this grid.
    pub fn new(
        solver: &'a S,
        config: &'a SimulationConfig,
        grid: &'a AtmosphereGrid,
        batch: &'a ProfileBatch,
        options: &'a RunOptions,
    ) -> FluxResult<Self> {
        let (n_lat, n_lon, _) = grid.shape();
        if batch.shape() != GridShape::new(n_lat, n_lon) {
            return Err(FluxError::DimensionMismatch {
                variable: "profile batch".to_string(),
                expected: vec![n_lat, n_lon],
                found: vec![batch.shape().n_lat, batch.shape().n_lon],
            });
        }

        let shape = batch.shape();
        if !shape.is_square() && options.index_stride == IndexStride::LatitudeCount {
            warn!(
                "Latitude-count batch indexing on a {} x {} grid pairs profiles with the wrong coordinates",
                shape.n_lat, shape.n_lon
            );
        }

        Ok(Self {
            solver,
            config,
            grid,
            batch,
            options,
            state: AggregatorState::NotStarted,
        })
    }

    pub fn state(&self) -> AggregatorState {
        self.state
    }

    /// Solve every column and return the filled datasets
    ///
    /// # Errors
    ///
    /// The first [`FluxError::SolverFailure`] or [`FluxError::ShapeMismatch`] in
    /// grid order under [`FailurePolicy::Abort`], or any indexing error.
    pub fn run(&mut self) -> FluxResult<FluxRunOutput> {
        let start = Instant::now();
        let mut spectral = FluxDatasetSpectral::zeros(self.grid, self.config.spectral_grid())?;
        let mut integrated = FluxDatasetIntegrated::zeros(self.grid);
        let mut report = RunReport {
            processed: 0,
            failed_cells: vec![],
            mismatched_profiles: 0,
            lookup_table: None,
            elapsed: Duration::ZERO,
        };

        let shape = self.batch.shape();
        info!(
            "Solving {} columns ({:?}, {:?})",
            shape.len(),
            self.options.execution,
            self.options.index_stride
        );

        match self.options.execution {
            ExecutionMode::Sequential => {
                for (i, j) in shape.iter() {
                    self.state = AggregatorState::Iterating {
                        lat_index: i,
                        lon_index: j,
                    };
                    let outcome = self.solve_cell(i, j);
                    self.record(i, j, outcome, &mut spectral, &mut integrated, &mut report)?;
                }
            }
            ExecutionMode::Parallel => {
                let cells: Vec<(usize, usize)> = shape.iter().collect();
                // Lowest grid position whose outcome ends the run
                let first_abort = AtomicUsize::new(usize::MAX);
                let outcomes: Vec<Option<FluxResult<CellSolution>>> = {
                    let this = &*self;
                    cells
                        .par_iter()
                        .enumerate()
                        .map(|(position, &(i, j))| {
                            if position > first_abort.load(Ordering::Relaxed) {
                                return None;
                            }
                            let outcome = this.solve_cell(i, j);
                            if let Err(e) = &outcome {
                                if this.aborts_on(e) {
                                    first_abort.fetch_min(position, Ordering::Relaxed);
                                }
                            }
                            Some(outcome)
                        })
                        .collect()
                };
                for ((i, j), outcome) in cells.into_iter().zip(outcomes) {
                    // Unsolved columns only follow an aborting one
                    let outcome = match outcome {
                        Some(outcome) => outcome,
                        None => break,
                    };
                    self.state = AggregatorState::Iterating {
                        lat_index: i,
                        lon_index: j,
                    };
                    self.record(i, j, outcome, &mut spectral, &mut integrated, &mut report)?;
                }
            }
        }

        self.state = AggregatorState::Done;
        report.elapsed = start.elapsed();

        if report.mismatched_profiles > 0 {
            warn!(
                "{} of {} columns were solved with a profile built for another grid point",
                report.mismatched_profiles,
                shape.len()
            );
        }
        info!(
            "Solved {} columns in {:.1?} ({} skipped)",
            report.processed,
            report.elapsed,
            report.failed_cells.len()
        );

        Ok(FluxRunOutput {
            spectral,
            integrated,
            report,
        })
    }

    fn solve_cell(&self, lat_index: usize, lon_index: usize) -> FluxResult<CellSolution> {
        let index = checked_batch_index(
            lat_index,
            lon_index,
            self.batch.shape(),
            self.options.index_stride,
        )?;
        let profile = self.batch.get(index).ok_or(FluxError::BatchIndexOutOfRange {
            index,
            len: self.batch.len(),
            lat_index,
            lon_index,
        })?;

        let origin = profile.origin();
        let profile_mismatch = origin.lat_index != lat_index || origin.lon_index != lon_index;

        let lat = self.grid.lat().values()[lat_index];
        let lon = self.grid.lon().values()[lon_index];
        let surface = SurfaceConditions {
            temperature: self.grid.surface_temperature(lat_index, lon_index)?,
            altitude: clamp_surface_altitude(
                self.grid.surface_height(lat_index, lon_index)?,
                self.options.surface_altitude_floor,
            ),
            reflectivity: self.config.surface_reflectivity(),
        };

        debug!(
            "Solving column {} at lat={}, lon={} (T_s={}, z_s={})",
            index, lat, lon, surface.temperature, surface.altitude
        );

        let request = SolveRequest {
            profile,
            surface,
            position: GeographicPosition { lat, lon },
        };
        let result = self
            .solver
            .solve_single_profile(&request, self.config)
            .map_err(|source| FluxError::SolverFailure {
                lat_index,
                lon_index,
                lat,
                lon,
                source,
            })?;
        result.validate(self.config.spectral_grid().len(), self.grid.pressure().len())?;

        Ok(CellSolution {
            lat,
            lon,
            result,
            profile_mismatch,
        })
    }

    fn record(
        &mut self,
        lat_index: usize,
        lon_index: usize,
        outcome: FluxResult<CellSolution>,
        spectral: &mut FluxDatasetSpectral,
        integrated: &mut FluxDatasetIntegrated,
        report: &mut RunReport,
    ) -> FluxResult<()> {
        let solution = match outcome {
            Ok(solution) => solution,
            Err(e) if !self.aborts_on(&e) => {
                let lat = self.grid.lat().values()[lat_index];
                let lon = self.grid.lon().values()[lon_index];
                warn!("Skipping column at lat={}, lon={}: {}", lat, lon, e);

                spectral.invalidate_cell(spectral.locate(lat, lon)?)?;
                integrated.invalidate_cell(integrated.locate(lat, lon)?)?;
                report.failed_cells.push(FailedCell {
                    lat_index,
                    lon_index,
                    lat,
                    lon,
                    reason: e.to_string(),
                });
                self.log_progress(report);
                return Ok(());
            }
            Err(e) => {
                self.state = AggregatorState::Failed {
                    lat_index,
                    lon_index,
                };
                return Err(e);
            }
        };

        if solution.profile_mismatch {
            report.mismatched_profiles += 1;
        }

        let result = &solution.result;
        let cell = spectral.locate(solution.lat, solution.lon)?;
        spectral.set_cell(
            cell,
            result.spectral_flux_up.t(),
            result.spectral_flux_down.t(),
        )?;

        let cell = integrated.locate(solution.lat, solution.lon)?;
        integrated.set_cell(
            cell,
            IntegratedSlice {
                flux_upward: result.flux_up.view(),
                flux_downward: result.flux_down.view(),
                heating_rate: result.heating_rate.view(),
            },
        )?;

        report.processed += 1;
        self.log_progress(report);
        Ok(())
    }

    /// Whether `error` ends the run rather than skipping its column
    fn aborts_on(&self, error: &FluxError) -> bool {
        !(is_cell_failure(error) && self.options.failure_policy == FailurePolicy::SkipCell)
    }

    fn log_progress(&self, report: &RunReport) {
        let interval = self.options.progress_interval;
        let done = report.processed + report.failed_cells.len();
        if interval > 0 && done % interval == 0 {
            info!("Processed {}/{} columns", done, self.batch.len());
        }
    }
}

/// Errors that only concern one column and may be skipped
fn is_cell_failure(error: &FluxError) -> bool {
    matches!(
        error,
        FluxError::SolverFailure { .. } | FluxError::ShapeMismatch { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atmosphere::AtmosphereGridBuilder;
    use crate::config::SpectralGrid;
    use crate::config::SpeciesTag;
    use crate::example_solvers::{ConstantSolver, EchoSolver, FailingSolver};
    use crate::profile::ProfileConverter;
    use ndarray::{s, Array3};

    fn config() -> SimulationConfig {
        SimulationConfig::new(
            "unit",
            vec![SpeciesTag::new("CO2").unwrap()],
            SpectralGrid::from_wavenumbers(vec![500.0, 600.0]).unwrap(),
            0.05,
        )
        .unwrap()
    }

    fn marker_grid(n_lat: usize, n_lon: usize) -> AtmosphereGrid {
        let shape = (n_lat, n_lon, 3);
        AtmosphereGridBuilder::new(
            (0..n_lat).map(|i| i as f64 * 10.0).collect(),
            (0..n_lon).map(|j| j as f64 * 10.0).collect(),
            vec![1000.0, 500.0, 100.0],
        )
        .with_temperature(Array3::from_shape_fn(shape, |(i, j, k)| {
            200.0 + (10 * i + j) as f64 - k as f64 * 0.5
        }))
        .with_geometric_height(Array3::from_shape_fn(shape, |(i, j, k)| {
            -400.0 + (100 * (i + j) + 1000 * k) as f64
        }))
        .with_gas("CO2", Array3::from_elem(shape, 4e-4))
        .build()
        .unwrap()
    }

    fn batch(grid: &AtmosphereGrid) -> ProfileBatch {
        ProfileConverter::new(vec!["CO2".to_string()])
            .convert(grid)
            .unwrap()
    }

    #[test]
    fn test_clamp_surface_altitude() {
        assert_eq!(clamp_surface_altitude(-400.0, -318.0), -318.0);
        assert_eq!(clamp_surface_altitude(-318.0, -318.0), -318.0);
        assert_eq!(clamp_surface_altitude(-317.5, -318.0), -317.5);
        assert_eq!(clamp_surface_altitude(1500.0, -318.0), 1500.0);
        assert_eq!(clamp_surface_altitude(f64::NAN, -318.0), -318.0);
        for h in [-1.0e4, -319.0, -318.0, 0.0, 8848.0] {
            let clamped = clamp_surface_altitude(h, -318.0);
            assert!(clamped >= -318.0);
            if h >= -318.0 {
                assert_eq!(clamped, h);
            }
        }
    }

    #[test]
    fn test_state_transitions() {
        let grid = marker_grid(2, 2);
        let batch = batch(&grid);
        let config = config();
        let options = RunOptions::default();
        let solver = ConstantSolver::new(1.0);

        let mut aggregator =
            FluxAggregator::new(&solver, &config, &grid, &batch, &options).unwrap();
        assert_eq!(aggregator.state(), AggregatorState::NotStarted);
        aggregator.run().unwrap();
        assert_eq!(aggregator.state(), AggregatorState::Done);
    }

    #[test]
    fn test_boundary_conditions_per_column() {
        let grid = marker_grid(2, 3);
        let batch = batch(&grid);
        let config = config();
        let options = RunOptions::default();
        let solver = EchoSolver::new();

        FluxAggregator::new(&solver, &config, &grid, &batch, &options)
            .unwrap()
            .run()
            .unwrap();

        let requests = solver.requests();
        assert_eq!(requests.len(), 6);
        // Row-major: latitude outer
        let order: Vec<(f64, f64)> = requests.iter().map(|r| (r.lat, r.lon)).collect();
        assert_eq!(
            order,
            vec![(0.0, 0.0), (0.0, 10.0), (0.0, 20.0), (10.0, 0.0), (10.0, 10.0), (10.0, 20.0)]
        );
        for (r, (i, j)) in requests.iter().zip(GridShape::new(2, 3).iter()) {
            assert_eq!(r.surface_temperature, 200.0 + (10 * i + j) as f64);
            let height = -400.0 + (100 * (i + j)) as f64;
            assert_eq!(r.surface_altitude, height.max(-318.0));
            assert_eq!(r.surface_reflectivity, 0.05);
        }
    }

    #[test]
    fn test_spectral_results_are_transposed() {
        let grid = marker_grid(1, 1);
        let batch = batch(&grid);
        let config = config();
        let options = RunOptions::default();
        let solver = EchoSolver::new();

        let output = FluxAggregator::new(&solver, &config, &grid, &batch, &options)
            .unwrap()
            .run()
            .unwrap();

        // flux_upward[.., .., level, freq] = temperature at level
        let up: ndarray::ArrayView2<FloatValue> = output.spectral.flux_upward.slice(s![0, 0, .., ..]);
        assert_eq!(up.shape(), &[3, 2]);
        assert_eq!(up[[0, 1]], 200.0);
        assert_eq!(up[[2, 0]], 199.0);
        // flux_downward[.., .., level, freq] = frequency index
        let down: ndarray::ArrayView2<FloatValue> = output.spectral.flux_downward.slice(s![0, 0, .., ..]);
        assert_eq!(down[[1, 0]], 0.0);
        assert_eq!(down[[1, 1]], 1.0);
    }

    #[test]
    fn test_abort_on_solver_failure() {
        let grid = marker_grid(2, 2);
        let batch = batch(&grid);
        let config = config();
        let options = RunOptions::default();
        let solver = FailingSolver::failing_columns("negative temperature", vec![(10.0, 0.0)], 1.0);

        let mut aggregator =
            FluxAggregator::new(&solver, &config, &grid, &batch, &options).unwrap();
        match aggregator.run() {
            Err(FluxError::SolverFailure {
                lat_index,
                lon_index,
                lat,
                lon,
                source,
            }) => {
                assert_eq!((lat_index, lon_index), (1, 0));
                assert_eq!((lat, lon), (10.0, 0.0));
                assert_eq!(source.message, "negative temperature");
            }
            other => panic!("unexpected result: {:?}", other.map(|o| o.report)),
        }
        assert_eq!(
            aggregator.state(),
            AggregatorState::Failed {
                lat_index: 1,
                lon_index: 0
            }
        );
        // Nothing after the failing column is attempted
        assert_eq!(solver.counters().solves(), 3);
    }

    #[test]
    fn test_skip_cell_policy() {
        let grid = marker_grid(2, 2);
        let batch = batch(&grid);
        let config = config();
        let options = RunOptions {
            failure_policy: FailurePolicy::SkipCell,
            ..Default::default()
        };
        let solver = FailingSolver::failing_columns("bad column", vec![(0.0, 10.0)], 2.0);

        let mut aggregator =
            FluxAggregator::new(&solver, &config, &grid, &batch, &options).unwrap();
        let output = aggregator.run().unwrap();

        assert_eq!(aggregator.state(), AggregatorState::Done);
        assert_eq!(output.report.processed, 3);
        assert_eq!(output.report.failed_cells.len(), 1);
        assert_eq!(output.report.failed_cells[0].lon, 10.0);

        let skipped = output.integrated.slice(0.0, 10.0).unwrap();
        assert!(skipped.heating_rate.iter().all(|v| v.is_nan()));
        let solved = output.integrated.slice(10.0, 10.0).unwrap();
        assert!(solved.heating_rate.iter().all(|&v| v == 2.0));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let grid = marker_grid(3, 4);
        let batch = batch(&grid);
        let config = config();
        let solver = EchoSolver::new();

        let sequential_options = RunOptions::default();
        let sequential = FluxAggregator::new(&solver, &config, &grid, &batch, &sequential_options)
            .unwrap()
            .run()
            .unwrap();
        let parallel_options = RunOptions {
            execution: ExecutionMode::Parallel,
            ..Default::default()
        };
        let parallel = FluxAggregator::new(&solver, &config, &grid, &batch, &parallel_options)
            .unwrap()
            .run()
            .unwrap();

        assert_eq!(sequential.spectral, parallel.spectral);
        assert_eq!(sequential.integrated, parallel.integrated);
        assert_eq!(parallel.report.processed, 12);
    }

    #[test]
    fn test_parallel_abort_stops_solving_and_reports_first_failure() {
        let grid = marker_grid(30, 30);
        let batch = batch(&grid);
        let config = config();
        let options = RunOptions {
            execution: ExecutionMode::Parallel,
            ..Default::default()
        };
        let solver =
            FailingSolver::failing_columns("bad column", vec![(0.0, 10.0), (200.0, 0.0)], 1.0);

        let mut aggregator =
            FluxAggregator::new(&solver, &config, &grid, &batch, &options).unwrap();
        match aggregator.run() {
            Err(FluxError::SolverFailure {
                lat_index,
                lon_index,
                ..
            }) => assert_eq!((lat_index, lon_index), (0, 1)),
            other => panic!("unexpected result: {:?}", other.map(|o| o.report)),
        }
        assert_eq!(
            aggregator.state(),
            AggregatorState::Failed {
                lat_index: 0,
                lon_index: 1
            }
        );
        assert!(solver.counters().solves() < 900);
    }

    #[test]
    fn test_latitude_count_stride_on_square_grid() {
        let grid = marker_grid(3, 3);
        let batch = batch(&grid);
        let config = config();
        let options = RunOptions {
            index_stride: IndexStride::LatitudeCount,
            ..Default::default()
        };
        let solver = EchoSolver::new();

        let output = FluxAggregator::new(&solver, &config, &grid, &batch, &options)
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(output.report.mismatched_profiles, 0);
    }

    #[test]
    fn test_latitude_count_stride_on_wide_grid_mispairs() {
        let grid = marker_grid(2, 3);
        let batch = batch(&grid);
        let config = config();
        let options = RunOptions {
            index_stride: IndexStride::LatitudeCount,
            ..Default::default()
        };
        let solver = EchoSolver::new();

        let output = FluxAggregator::new(&solver, &config, &grid, &batch, &options)
            .unwrap()
            .run()
            .unwrap();

        // (1, 0) is solved with the profile of (0, 2); heating rate echoes its marker
        assert_eq!(output.report.mismatched_profiles, 3);
        let cell = output.integrated.slice(10.0, 0.0).unwrap();
        assert_eq!(cell.heating_rate[0], 202.0);
    }

    #[test]
    fn test_latitude_count_stride_on_tall_grid_fails() {
        let grid = marker_grid(3, 2);
        let batch = batch(&grid);
        let config = config();
        let options = RunOptions {
            index_stride: IndexStride::LatitudeCount,
            failure_policy: FailurePolicy::SkipCell,
            ..Default::default()
        };
        let solver = ConstantSolver::new(0.0);

        let mut aggregator =
            FluxAggregator::new(&solver, &config, &grid, &batch, &options).unwrap();
        assert!(matches!(
            aggregator.run(),
            Err(FluxError::BatchIndexOutOfRange { index: 6, .. })
        ));
        assert_eq!(
            aggregator.state(),
            AggregatorState::Failed {
                lat_index: 2,
                lon_index: 0
            }
        );
    }

    #[test]
    fn test_batch_for_other_grid_rejected() {
        let grid = marker_grid(2, 2);
        let other = batch(&marker_grid(2, 3));
        let config = config();
        let options = RunOptions::default();
        let solver = ConstantSolver::new(0.0);

        assert!(matches!(
            FluxAggregator::new(&solver, &config, &grid, &other, &options),
            Err(FluxError::DimensionMismatch { .. })
        ));
    }
}
