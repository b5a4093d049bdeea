//! Boundary to the external radiative-transfer solver
//!
//! The physics lives outside this crate. A solver only has to build (or find)
//! an absorption lookup table for a configuration and then solve one column at
//! a time. Configuration is passed explicitly on every call instead of being
//! set on the solver beforehand.

use crate::config::SimulationConfig;
use crate::errors::{FluxError, FluxResult, SolverError};
use crate::profile::{ProfileBatch, ProfileRecord};
use crate::FloatValue;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Geographic coordinate of a column, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeographicPosition {
    pub lat: FloatValue,
    pub lon: FloatValue,
}

/// Lower boundary conditions for a single column
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfaceConditions {
    /// Surface temperature (K)
    pub temperature: FloatValue,
    /// Surface altitude (m), already clamped to the admissible floor
    pub altitude: FloatValue,
    /// Surface reflectivity in [0, 1]
    pub reflectivity: FloatValue,
}

/// Everything needed to solve one column
#[derive(Debug, Clone, Copy)]
pub struct SolveRequest<'a> {
    pub profile: &'a ProfileRecord,
    pub surface: SurfaceConditions,
    pub position: GeographicPosition,
}

/// Clear-sky fluxes for a single column
///
/// Spectral fields are laid out the way solvers return them,
/// `(n_frequencies, n_levels)`. Integrated fields have one value per level.
#[derive(Debug, Clone, PartialEq)]
pub struct SingleProfileResult {
    /// Upward spectral flux (W m^-2 Hz^-1)
    pub spectral_flux_up: Array2<FloatValue>,
    /// Downward spectral flux (W m^-2 Hz^-1)
    pub spectral_flux_down: Array2<FloatValue>,
    /// Upward flux integrated over the spectral grid (W m^-2)
    pub flux_up: Array1<FloatValue>,
    /// Downward flux integrated over the spectral grid (W m^-2)
    pub flux_down: Array1<FloatValue>,
    /// Heating rate per level (K d^-1)
    pub heating_rate: Array1<FloatValue>,
}

impl SingleProfileResult {
    /// Check the result against the expected spectral and vertical sizes
    pub fn validate(&self, n_frequencies: usize, n_levels: usize) -> FluxResult<()> {
        let spectral = [n_frequencies, n_levels];
        for (field, shape) in [
            ("spectral_flux_up", self.spectral_flux_up.shape()),
            ("spectral_flux_down", self.spectral_flux_down.shape()),
        ] {
            if shape != spectral {
                return Err(FluxError::ShapeMismatch {
                    field: field.to_string(),
                    expected: spectral.to_vec(),
                    found: shape.to_vec(),
                });
            }
        }

        for (field, len) in [
            ("flux_up", self.flux_up.len()),
            ("flux_down", self.flux_down.len()),
            ("heating_rate", self.heating_rate.len()),
        ] {
            if len != n_levels {
                return Err(FluxError::ShapeMismatch {
                    field: field.to_string(),
                    expected: vec![n_levels],
                    found: vec![len],
                });
            }
        }
        Ok(())
    }
}

/// An external radiative-transfer solver
///
/// Implementations must be safe to share across threads: after the lookup
/// table is ready, columns may be solved concurrently.
pub trait FluxSolver: Send + Sync {
    /// Whether a lookup table for `config.setup_name()` is already persisted
    ///
    /// An error means the cache could not be inspected, not that it is empty.
    fn lookup_table_exists(&self, config: &SimulationConfig) -> Result<bool, SolverError>;

    /// Build and persist the lookup table for a configuration from the full batch
    ///
    /// Expensive. Called at most once per run, before any column is solved.
    fn build_lookup_table(
        &self,
        batch: &ProfileBatch,
        config: &SimulationConfig,
    ) -> Result<(), SolverError>;

    /// Solve a single column
    fn solve_single_profile(
        &self,
        request: &SolveRequest<'_>,
        config: &SimulationConfig,
    ) -> Result<SingleProfileResult, SolverError>;
}

impl<S: FluxSolver + ?Sized> FluxSolver for std::sync::Arc<S> {
    fn lookup_table_exists(&self, config: &SimulationConfig) -> Result<bool, SolverError> {
        (**self).lookup_table_exists(config)
    }

    fn build_lookup_table(
        &self,
        batch: &ProfileBatch,
        config: &SimulationConfig,
    ) -> Result<(), SolverError> {
        (**self).build_lookup_table(batch, config)
    }

    fn solve_single_profile(
        &self,
        request: &SolveRequest<'_>,
        config: &SimulationConfig,
    ) -> Result<SingleProfileResult, SolverError> {
        (**self).solve_single_profile(request, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(n_freq: usize, n_levels: usize) -> SingleProfileResult {
        SingleProfileResult {
            spectral_flux_up: Array2::zeros((n_freq, n_levels)),
            spectral_flux_down: Array2::zeros((n_freq, n_levels)),
            flux_up: Array1::zeros(n_levels),
            flux_down: Array1::zeros(n_levels),
            heating_rate: Array1::zeros(n_levels),
        }
    }

    #[test]
    fn test_validate_accepts_expected_shapes() {
        assert!(result(4, 3).validate(4, 3).is_ok());
    }

    #[test]
    fn test_validate_rejects_level_major_spectral_layout() {
        match result(3, 4).validate(4, 3) {
            Err(FluxError::ShapeMismatch {
                field,
                expected,
                found,
            }) => {
                assert_eq!(field, "spectral_flux_up");
                assert_eq!(expected, vec![4, 3]);
                assert_eq!(found, vec![3, 4]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_short_heating_rate() {
        let mut r = result(2, 3);
        r.heating_rate = Array1::zeros(2);
        assert!(matches!(
            r.validate(2, 3),
            Err(FluxError::ShapeMismatch { field, .. }) if field == "heating_rate"
        ));
    }
}
