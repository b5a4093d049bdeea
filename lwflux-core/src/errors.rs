use crate::FloatValue;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by an external radiative-transfer solver.
///
/// Solvers only describe what went wrong; the core attaches the stage and
/// grid coordinate when it wraps this into a [`FluxError`].
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct SolverError {
    pub message: String,
}

impl SolverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for SolverError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for SolverError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Error type for every stage of a flux run.
#[derive(Error, Debug)]
pub enum FluxError {
    #[error("Dimension mismatch for {variable}: expected {expected:?}, got {found:?}")]
    DimensionMismatch {
        variable: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("Missing required variable '{0}'")]
    MissingVariable(String),
    #[error("Coordinate {label} not found on axis '{axis}'")]
    CoordinateNotFound { axis: String, label: FloatValue },
    #[error("Duplicate coordinate {label} on axis '{axis}'")]
    DuplicateCoordinate { axis: String, label: FloatValue },
    #[error("Invalid coordinate on axis '{axis}': {reason}")]
    InvalidCoordinate { axis: String, reason: String },
    #[error("Batch index {index} is out of range for a batch of {len} profiles (lat index {lat_index}, lon index {lon_index})")]
    BatchIndexOutOfRange {
        index: usize,
        len: usize,
        lat_index: usize,
        lon_index: usize,
    },
    #[error("Shape mismatch for {field}: expected {expected:?}, got {found:?}")]
    ShapeMismatch {
        field: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("Failed to build lookup table '{setup_name}': {source}")]
    LookupTableBuildFailure {
        setup_name: String,
        #[source]
        source: SolverError,
    },
    #[error("Lookup table '{setup_name}' was not ready after {timeout:?}")]
    LookupTableTimeout {
        setup_name: String,
        timeout: Duration,
    },
    #[error("Solver failed at lat={lat}, lon={lon} (indices {lat_index}, {lon_index}): {source}")]
    SolverFailure {
        lat_index: usize,
        lon_index: usize,
        lat: FloatValue,
        lon: FloatValue,
        #[source]
        source: SolverError,
    },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[cfg(feature = "netcdf")]
    #[error("NetCDF error: {0}")]
    NetCdf(#[from] netcdf::Error),
}

impl From<serde_json::Error> for FluxError {
    fn from(e: serde_json::Error) -> Self {
        FluxError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for FluxError {
    fn from(e: toml::de::Error) -> Self {
        FluxError::Serialization(e.to_string())
    }
}

impl From<toml::ser::Error> for FluxError {
    fn from(e: toml::ser::Error) -> Self {
        FluxError::Serialization(e.to_string())
    }
}

/// Convenience type for `Result<T, FluxError>`.
pub type FluxResult<T> = Result<T, FluxError>;
