//! Simulation-wide configuration
//!
//! [`SimulationConfig`] fixes everything that is shared by every profile in a
//! run: the absorbing species, the spectral grid, the surface reflectivity and
//! the setup name under which the solver caches its lookup table. It is built
//! once, validated, and only read afterwards.
//!
//! [`RunOptions`] controls how the grid loop behaves rather than what is
//! simulated.
//!
//! Both load from TOML:
//!
//! ```toml
//! setup_name = "clear-sky"
//! surface_reflectivity = 0.05
//! species = ["H2O, H2O-SelfContCKDMT350, H2O-ForeignContCKDMT350", "CO2, CO2-CKDMT252"]
//! wavenumber_grid = { start = 1.0, stop = 3000.0, count = 200 }
//! ```

use crate::errors::{FluxError, FluxResult};
use crate::indexing::IndexStride;
use crate::FloatValue;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Speed of light in vacuum (m/s).
pub const SPEED_OF_LIGHT: FloatValue = 299_792_458.0;

/// Frequency (Hz) of one wavenumber unit (cm^-1).
///
/// `c * 100`, i.e. 29 979 245 800 Hz per cm^-1.
pub const HZ_PER_KAYSER: FloatValue = SPEED_OF_LIGHT * 100.0;

/// Lowest admissible surface altitude (m).
///
/// Surface heights below this are clamped before being handed to the solver.
pub const SURFACE_ALTITUDE_FLOOR: FloatValue = -318.0;

/// Reference setup name used when none is configured.
pub const DEFAULT_SETUP_NAME: &str = "test";

/// Reference longwave surface reflectivity.
pub const DEFAULT_SURFACE_REFLECTIVITY: FloatValue = 0.05;

/// Reference longwave wavenumber range (cm^-1) and resolution.
pub const DEFAULT_WAVENUMBER_START: FloatValue = 1.0;
pub const DEFAULT_WAVENUMBER_STOP: FloatValue = 3.0e3;
pub const DEFAULT_WAVENUMBER_COUNT: usize = 200;

/// Reference absorbing species, with their continua.
pub const DEFAULT_SPECIES: [&str; 6] = [
    "H2O, H2O-SelfContCKDMT350, H2O-ForeignContCKDMT350",
    "O2-*-1e12-1e99,O2-CIAfunCKDMT100",
    "N2, N2-CIAfunCKDMT252, N2-CIArotCKDMT252",
    "CO2, CO2-CKDMT252",
    "O3",
    "O3-XFIT",
];

/// Reference gases extracted from the atmosphere for every profile.
pub const DEFAULT_GASES: [&str; 5] = ["H2O", "CO2", "O3", "N2", "O2"];

/// Convert a wavenumber (cm^-1) to a frequency (Hz)
///
/// A single multiplication by [`HZ_PER_KAYSER`], so identical inputs give
/// bit-identical outputs and ascending inputs stay ascending.
pub fn wavenumber_to_frequency(wavenumber: FloatValue) -> FloatValue {
    wavenumber * HZ_PER_KAYSER
}

/// A spectroscopic species tag, passed to the solver verbatim
///
/// Tags are opaque to the core. A tag such as
/// `"H2O, H2O-SelfContCKDMT350, H2O-ForeignContCKDMT350"` names a species and
/// the continuum models that qualify it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpeciesTag(String);

impl SpeciesTag {
    pub fn new(tag: impl Into<String>) -> FluxResult<Self> {
        let tag = tag.into();
        if tag.trim().is_empty() {
            return Err(FluxError::InvalidConfig(
                "species tags must not be empty".to_string(),
            ));
        }
        Ok(Self(tag))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Species the tag refers to, e.g. `"O2"` for `"O2-*-1e12-1e99,O2-CIAfunCKDMT100"`
    pub fn base_species(&self) -> &str {
        let first = self.0.split(',').next().unwrap_or("").trim();
        first.split('-').next().unwrap_or(first)
    }
}

impl std::fmt::Display for SpeciesTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the wavenumber grid is written in a configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WavenumberGridSpec {
    /// Explicit wavenumbers (cm^-1)
    Values(Vec<FloatValue>),
    /// `count` evenly spaced wavenumbers from `start` to `stop`, both included
    Linspace {
        start: FloatValue,
        stop: FloatValue,
        count: usize,
    },
}

impl WavenumberGridSpec {
    pub fn wavenumbers(&self) -> Vec<FloatValue> {
        match self {
            WavenumberGridSpec::Values(values) => values.clone(),
            WavenumberGridSpec::Linspace { start, stop, count } => linspace(*start, *stop, *count),
        }
    }
}

fn linspace(start: FloatValue, stop: FloatValue, count: usize) -> Vec<FloatValue> {
    match count {
        0 => vec![],
        1 => vec![start],
        _ => {
            let step = (stop - start) / (count - 1) as FloatValue;
            (0..count)
                .map(|i| {
                    if i == count - 1 {
                        stop
                    } else {
                        start + step * i as FloatValue
                    }
                })
                .collect()
        }
    }
}

/// Spectral grid of a simulation
///
/// Holds the wavenumbers it was defined from and the frequencies handed to the
/// solver. The two are always the same length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SpectralGridData", into = "SpectralGridData")]
pub struct SpectralGrid {
    wavenumber: Vec<FloatValue>,
    frequency: Vec<FloatValue>,
}

/// Serialised form of [`SpectralGrid`]. Frequencies are recomputed on load.
#[derive(Serialize, Deserialize)]
struct SpectralGridData {
    wavenumber: Vec<FloatValue>,
    #[serde(default)]
    frequency: Option<Vec<FloatValue>>,
}

impl TryFrom<SpectralGridData> for SpectralGrid {
    type Error = FluxError;

    fn try_from(data: SpectralGridData) -> Result<Self, Self::Error> {
        let grid = SpectralGrid::from_wavenumbers(data.wavenumber)?;
        if let Some(frequency) = data.frequency {
            if frequency.len() != grid.len() {
                return Err(FluxError::InvalidConfig(format!(
                    "spectral grid has {} wavenumbers but {} frequencies",
                    grid.len(),
                    frequency.len()
                )));
            }
        }
        Ok(grid)
    }
}

impl From<SpectralGrid> for SpectralGridData {
    fn from(grid: SpectralGrid) -> Self {
        SpectralGridData {
            wavenumber: grid.wavenumber,
            frequency: Some(grid.frequency),
        }
    }
}

impl SpectralGrid {
    /// Build a grid from wavenumbers (cm^-1)
    ///
    /// # Errors
    ///
    /// The grid must be non-empty, finite and strictly ascending.
    pub fn from_wavenumbers(wavenumber: Vec<FloatValue>) -> FluxResult<Self> {
        if wavenumber.is_empty() {
            return Err(FluxError::InvalidConfig(
                "spectral grid must contain at least one wavenumber".to_string(),
            ));
        }
        if let Some(bad) = wavenumber.iter().find(|w| !w.is_finite()) {
            return Err(FluxError::InvalidConfig(format!(
                "spectral grid contains a non-finite wavenumber ({})",
                bad
            )));
        }
        if let Some(pair) = wavenumber.windows(2).find(|pair| pair[1] <= pair[0]) {
            return Err(FluxError::InvalidConfig(format!(
                "spectral grid must be strictly ascending ({} followed by {})",
                pair[0], pair[1]
            )));
        }

        let frequency = wavenumber.iter().map(|&w| wavenumber_to_frequency(w)).collect();
        Ok(Self {
            wavenumber,
            frequency,
        })
    }

    pub fn linspace(start: FloatValue, stop: FloatValue, count: usize) -> FluxResult<Self> {
        Self::from_wavenumbers(linspace(start, stop, count))
    }

    /// Wavenumbers (cm^-1)
    pub fn wavenumber(&self) -> &[FloatValue] {
        &self.wavenumber
    }

    /// Frequencies (Hz)
    pub fn frequency(&self) -> &[FloatValue] {
        &self.frequency
    }

    pub fn len(&self) -> usize {
        self.frequency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequency.is_empty()
    }
}

/// On-disk form of [`SimulationConfig`]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SimulationConfigFile {
    #[serde(default = "default_setup_name")]
    setup_name: String,
    #[serde(default = "default_species")]
    species: Vec<String>,
    #[serde(default = "default_wavenumber_grid")]
    wavenumber_grid: WavenumberGridSpec,
    #[serde(default = "default_reflectivity")]
    surface_reflectivity: FloatValue,
}

fn default_setup_name() -> String {
    DEFAULT_SETUP_NAME.to_string()
}

fn default_species() -> Vec<String> {
    DEFAULT_SPECIES.iter().map(|s| s.to_string()).collect()
}

fn default_wavenumber_grid() -> WavenumberGridSpec {
    WavenumberGridSpec::Linspace {
        start: DEFAULT_WAVENUMBER_START,
        stop: DEFAULT_WAVENUMBER_STOP,
        count: DEFAULT_WAVENUMBER_COUNT,
    }
}

fn default_reflectivity() -> FloatValue {
    DEFAULT_SURFACE_REFLECTIVITY
}

impl TryFrom<SimulationConfigFile> for SimulationConfig {
    type Error = FluxError;

    fn try_from(file: SimulationConfigFile) -> Result<Self, Self::Error> {
        let species = file
            .species
            .into_iter()
            .map(SpeciesTag::new)
            .collect::<FluxResult<Vec<_>>>()?;
        let spectral_grid = SpectralGrid::from_wavenumbers(file.wavenumber_grid.wavenumbers())?;
        SimulationConfig::new(file.setup_name, species, spectral_grid, file.surface_reflectivity)
    }
}

impl From<SimulationConfig> for SimulationConfigFile {
    fn from(config: SimulationConfig) -> Self {
        Self {
            setup_name: config.setup_name,
            species: config.species.into_iter().map(|s| s.0).collect(),
            wavenumber_grid: WavenumberGridSpec::Values(config.spectral_grid.wavenumber),
            surface_reflectivity: config.surface_reflectivity,
        }
    }
}

/// Immutable simulation configuration
///
/// The setup name keys the solver's lookup-table cache. Reusing a name for a
/// different species list or spectral grid is not detected by the solver and
/// silently produces invalid results; keeping names unique per configuration
/// is the caller's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SimulationConfigFile", into = "SimulationConfigFile")]
pub struct SimulationConfig {
    setup_name: String,
    species: Vec<SpeciesTag>,
    spectral_grid: SpectralGrid,
    surface_reflectivity: FloatValue,
}

impl SimulationConfig {
    pub fn new(
        setup_name: impl Into<String>,
        species: Vec<SpeciesTag>,
        spectral_grid: SpectralGrid,
        surface_reflectivity: FloatValue,
    ) -> FluxResult<Self> {
        let setup_name = setup_name.into();
        if setup_name.trim().is_empty() {
            return Err(FluxError::InvalidConfig(
                "setup name must not be empty".to_string(),
            ));
        }
        if species.is_empty() {
            return Err(FluxError::InvalidConfig(
                "at least one species tag is required".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&surface_reflectivity) {
            return Err(FluxError::InvalidConfig(format!(
                "surface reflectivity must be within [0, 1], got {}",
                surface_reflectivity
            )));
        }

        Ok(Self {
            setup_name,
            species,
            spectral_grid,
            surface_reflectivity,
        })
    }

    /// Parse a configuration from TOML, filling unset keys with the reference values
    pub fn from_toml_str(contents: &str) -> FluxResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> FluxResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> FluxResult<String> {
        Ok(toml::to_string(self)?)
    }

    pub fn setup_name(&self) -> &str {
        &self.setup_name
    }

    pub fn species(&self) -> &[SpeciesTag] {
        &self.species
    }

    pub fn spectral_grid(&self) -> &SpectralGrid {
        &self.spectral_grid
    }

    pub fn surface_reflectivity(&self) -> FloatValue {
        self.surface_reflectivity
    }

    /// Summary of everything a lookup table depends on
    ///
    /// Two configurations with the same fingerprint can share a table.
    pub fn lookup_table_fingerprint(&self) -> String {
        let species: Vec<&str> = self.species.iter().map(|s| s.as_str()).collect();
        let grid = &self.spectral_grid;
        format!(
            "species=[{}];n_freq={};f_min={:e};f_max={:e}",
            species.join("|"),
            grid.len(),
            grid.frequency().first().copied().unwrap_or(FloatValue::NAN),
            grid.frequency().last().copied().unwrap_or(FloatValue::NAN),
        )
    }
}

impl Default for SimulationConfig {
    /// The reference longwave setup
    fn default() -> Self {
        let species = DEFAULT_SPECIES.iter().map(|s| SpeciesTag(s.to_string())).collect();
        let wavenumber = linspace(
            DEFAULT_WAVENUMBER_START,
            DEFAULT_WAVENUMBER_STOP,
            DEFAULT_WAVENUMBER_COUNT,
        );
        let frequency = wavenumber.iter().map(|&w| wavenumber_to_frequency(w)).collect();
        Self {
            setup_name: DEFAULT_SETUP_NAME.to_string(),
            species,
            spectral_grid: SpectralGrid {
                wavenumber,
                frequency,
            },
            surface_reflectivity: DEFAULT_SURFACE_REFLECTIVITY,
        }
    }
}

/// What happens when a single-profile solve fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the run and return the error
    #[default]
    Abort,
    /// Fill the cell with NaN, record it in the run report and continue
    SkipCell,
}

/// How grid points are scheduled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    /// Solve columns on the rayon thread pool
    ///
    /// Results are written in grid order. When a column aborts the run, columns
    /// later in grid order that have not started yet are not solved, and the
    /// error reported is the same one a sequential run would return.
    Parallel,
}

/// Options controlling the grid loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    pub index_stride: IndexStride,
    pub failure_policy: FailurePolicy,
    pub execution: ExecutionMode,
    /// Surface altitudes below this (m) are raised to it
    pub surface_altitude_floor: FloatValue,
    /// Log a progress line every this many grid points (0 disables)
    pub progress_interval: usize,
    /// Upper bound on the lookup-table build, unbounded if unset
    pub lookup_table_timeout_secs: Option<u64>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            index_stride: IndexStride::RowMajor,
            failure_policy: FailurePolicy::Abort,
            execution: ExecutionMode::Sequential,
            surface_altitude_floor: SURFACE_ALTITUDE_FLOOR,
            progress_interval: 100,
            lookup_table_timeout_secs: None,
        }
    }
}

impl RunOptions {
    pub fn from_toml_str(contents: &str) -> FluxResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn lookup_table_timeout(&self) -> Option<Duration> {
        self.lookup_table_timeout_secs.map(Duration::from_secs)
    }
}
