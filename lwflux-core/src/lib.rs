//! Orchestration of longwave radiative-flux runs over gridded atmospheres
//!
//! The crate does no radiative transfer itself. It converts an
//! [`AtmosphereGrid`](atmosphere::AtmosphereGrid) into per-column profiles,
//! prepares the solver's absorption lookup table once, drives a
//! [`FluxSolver`](solver::FluxSolver) over every column and gathers the
//! results into spectral and integrated flux datasets.
//!
//! ```rust
//! use lwflux_core::atmosphere::AtmosphereGridBuilder;
//! use lwflux_core::config::{RunOptions, SimulationConfig, SpectralGrid};
//! use lwflux_core::example_solvers::ConstantSolver;
//! use lwflux_core::profile::ProfileConverter;
//! use lwflux_core::simulation::LongwaveFluxSimulation;
//! use ndarray::Array3;
//! use std::sync::Arc;
//!
//! let (lat, lon) = (vec![0.0, 10.0], vec![0.0, 10.0]);
//! let grid = AtmosphereGridBuilder::new(lat, lon, vec![1000.0, 500.0, 100.0])
//!     .with_temperature(Array3::from_elem((2, 2, 3), 250.0))
//!     .with_geometric_height(Array3::zeros((2, 2, 3)))
//!     .with_gas("H2O", Array3::from_elem((2, 2, 3), 1e-3))
//!     .build()
//!     .unwrap();
//!
//! let config = SimulationConfig::new(
//!     "doc",
//!     SimulationConfig::default().species().to_vec(),
//!     SpectralGrid::linspace(1.0, 3000.0, 10).unwrap(),
//!     0.05,
//! )
//! .unwrap();
//! let solver = Arc::new(ConstantSolver::new(1.0));
//! let simulation = LongwaveFluxSimulation::new(config, RunOptions::default(), solver)
//!     .with_converter(ProfileConverter::new(vec!["H2O".to_string()]));
//!
//! let output = simulation.run(&grid).unwrap();
//! assert_eq!(output.spectral.shape(), (2, 2, 3, 10));
//! assert_eq!(output.integrated.shape(), (2, 2, 3));
//! ```

pub mod aggregator;
pub mod atmosphere;
pub mod config;
pub mod coordinates;
pub mod dataset;
pub mod errors;
pub mod example_solvers;
pub mod indexing;
pub mod io;
pub mod lookup_table;
pub mod profile;
#[cfg(feature = "python")]
pub mod python;
pub mod simulation;
pub mod solver;

/// Floating point type used for every physical quantity
pub type FloatValue = f64;
