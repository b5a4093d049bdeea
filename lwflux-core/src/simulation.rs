//! End-to-end longwave flux run
//!
//! A [`LongwaveFluxSimulation`] ties the stages together:
//!
//! 1. convert the atmosphere grid into a [`ProfileBatch`]
//! 2. make sure the solver has a lookup table for the configuration
//! 3. solve every column and aggregate the results
//!
//! The lookup table is prepared once per setup name for the lifetime of the
//! simulation, however many grids are run through it.

use crate::aggregator::{FluxAggregator, FluxRunOutput};
use crate::atmosphere::AtmosphereGrid;
use crate::config::{RunOptions, SimulationConfig};
use crate::errors::FluxResult;
use crate::io::load_atmosphere;
use crate::lookup_table::LookupTableManager;
use crate::profile::{ProfileBatch, ProfileConverter};
use crate::solver::FluxSolver;
use log::info;
use std::path::Path;
use std::sync::Arc;

pub struct LongwaveFluxSimulation<S: FluxSolver + ?Sized + 'static> {
    config: Arc<SimulationConfig>,
    options: RunOptions,
    converter: ProfileConverter,
    solver: Arc<S>,
    lookup_tables: LookupTableManager,
}

impl<S: FluxSolver + ?Sized + 'static> LongwaveFluxSimulation<S> {
    pub fn new(config: SimulationConfig, options: RunOptions, solver: Arc<S>) -> Self {
        let lookup_tables = LookupTableManager::with_timeout(options.lookup_table_timeout());
        Self {
            config: Arc::new(config),
            options,
            converter: ProfileConverter::default(),
            solver,
            lookup_tables,
        }
    }

    /// Replace the default set of gases copied into each profile
    pub fn with_converter(mut self, converter: ProfileConverter) -> Self {
        self.converter = converter;
        self
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn solver(&self) -> &Arc<S> {
        &self.solver
    }

    /// Compute clear-sky longwave fluxes for every column of `grid`
    ///
    /// # Errors
    ///
    /// Conversion errors are raised before the solver is touched. Lookup-table
    /// errors are raised before any column is solved.
    pub fn run(&self, grid: &AtmosphereGrid) -> FluxResult<FluxRunOutput> {
        let (n_lat, n_lon, n_levels) = grid.shape();
        info!(
            "Starting longwave run '{}' on a {} x {} x {} grid",
            self.config.setup_name(),
            n_lat,
            n_lon,
            n_levels
        );

        let batch: Arc<ProfileBatch> = Arc::new(self.converter.convert(grid)?);
        let status = self
            .lookup_tables
            .ensure_lookup_table(&self.solver, &batch, &self.config)?;

        let mut aggregator =
            FluxAggregator::new(&*self.solver, &self.config, grid, &batch, &self.options)?;
        let mut output = aggregator.run()?;
        output.report.lookup_table = Some(status);
        Ok(output)
    }

    /// Load an atmosphere file and run it
    pub fn run_from_path(&self, path: impl AsRef<Path>) -> FluxResult<FluxRunOutput> {
        let grid = load_atmosphere(path)?;
        self.run(&grid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atmosphere::AtmosphereGridBuilder;
    use crate::config::SpectralGrid;
    use crate::errors::FluxError;
    use crate::example_solvers::{ConstantSolver, FailingSolver};
    use crate::lookup_table::LookupTableStatus;
    use ndarray::Array3;

    fn config() -> SimulationConfig {
        SimulationConfig::new(
            "simulation-unit",
            SimulationConfig::default().species().to_vec(),
            SpectralGrid::linspace(1.0, 3000.0, 5).unwrap(),
            0.05,
        )
        .unwrap()
    }

    fn grid() -> AtmosphereGrid {
        let shape = (2, 2, 3);
        let mut builder =
            AtmosphereGridBuilder::new(vec![0.0, 10.0], vec![0.0, 10.0], vec![1000.0, 500.0, 100.0])
                .with_temperature(Array3::from_elem(shape, 250.0))
                .with_geometric_height(Array3::zeros(shape));
        for gas in ["H2O", "CO2", "O3", "N2", "O2"] {
            builder = builder.with_gas(gas, Array3::from_elem(shape, 1e-4));
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_lookup_table_status_reported() {
        let solver = Arc::new(ConstantSolver::new(1.0));
        let simulation =
            LongwaveFluxSimulation::new(config(), RunOptions::default(), solver.clone());

        let first = simulation.run(&grid()).unwrap();
        assert!(matches!(
            first.report.lookup_table,
            Some(LookupTableStatus::Built { .. })
        ));
        let second = simulation.run(&grid()).unwrap();
        assert_eq!(second.report.lookup_table, Some(LookupTableStatus::Cached));
        assert_eq!(solver.counters().builds(), 1);
    }

    #[test]
    fn test_lookup_table_failure_stops_before_solving() {
        let solver = Arc::new(FailingSolver::failing_lookup_table("no absorption data"));
        let simulation =
            LongwaveFluxSimulation::new(config(), RunOptions::default(), solver.clone());

        assert!(matches!(
            simulation.run(&grid()),
            Err(FluxError::LookupTableBuildFailure { .. })
        ));
        assert_eq!(solver.counters().solves(), 0);
    }

    #[test]
    fn test_custom_converter() {
        let solver = Arc::new(ConstantSolver::new(1.0));
        let simulation = LongwaveFluxSimulation::new(config(), RunOptions::default(), solver)
            .with_converter(ProfileConverter::new(vec!["CH4".to_string()]));

        assert!(matches!(
            simulation.run(&grid()),
            Err(FluxError::MissingVariable(name)) if name == "CH4"
        ));
    }

    #[test]
    fn test_trait_object_solver() {
        let solver: Arc<dyn FluxSolver> = Arc::new(ConstantSolver::new(2.0));
        let simulation = LongwaveFluxSimulation::new(config(), RunOptions::default(), solver);

        let output = simulation.run(&grid()).unwrap();
        assert!(output.integrated.flux_upward.iter().all(|&v| v == 2.0));
    }
}
