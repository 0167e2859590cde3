//! Runtime settings.
//!
//! Settings are loaded with Figment from (in order of precedence):
//! 1. Environment variables prefixed with `SPECSCAN_`
//! 2. A TOML configuration file (default: `config/specscan.toml`)
//! 3. Built-in defaults, so a missing file still yields a working setup.
//!
//! # Example
//!
//! ```text
//! SPECSCAN_APPLICATION_LOG_LEVEL=debug
//! SPECSCAN_PATHS_DATA_DIR=/data/spectrometer
//! ```

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kinematics::{CrystalConfig, D_SI440, R_CRYSTAL_MM};

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    Load(#[from] figment::Error),
    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Top-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub paths: PathSettings,
    pub session: SessionSettings,
    pub crystal: CrystalSettings,
    pub simulation: SimulationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    /// Application name used in logs.
    pub name: String,
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Persisted axis registry.
    pub registry_file: PathBuf,
    /// Root of the scan data tree.
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Session opened at startup.
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrystalSettings {
    /// Analyzer lattice spacing at startup, Å.
    pub lattice_spacing: f64,
    /// Analyzer bending radius, mm.
    pub curvature_radius: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Simulated stage speed, units per second.
    pub stage_speed: f64,
    /// Number of simulated detectors (0 = motion-only dry runs).
    pub detectors: usize,
    /// MCA length of each simulated detector.
    pub detector_channels: usize,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: "specscan".into(),
            log_level: "info".into(),
        }
    }
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            registry_file: PathBuf::from("config/stages.json"),
            data_dir: PathBuf::from("data"),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            name: "default".into(),
        }
    }
}

impl Default for CrystalSettings {
    fn default() -> Self {
        Self {
            lattice_spacing: D_SI440,
            curvature_radius: R_CRYSTAL_MM,
        }
    }
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            stage_speed: 250.0,
            detectors: 1,
            detector_channels: 1024,
        }
    }
}

impl Settings {
    /// Load from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config/specscan.toml")
    }

    /// Load from a specific file path, merged over the built-in defaults and
    /// under `SPECSCAN_` environment overrides.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings: Self = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SPECSCAN_").split("_"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check the values that pass parsing but can still be nonsense.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }
        if self.crystal.lattice_spacing <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "Invalid lattice_spacing {}. Must be positive",
                self.crystal.lattice_spacing
            )));
        }
        if self.crystal.curvature_radius <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "Invalid curvature_radius {}. Must be positive",
                self.crystal.curvature_radius
            )));
        }
        if self.simulation.stage_speed <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "Invalid stage_speed {}. Must be positive",
                self.simulation.stage_speed
            )));
        }
        Ok(())
    }

    /// The crystal the registry starts with.
    pub fn crystal(&self) -> CrystalConfig {
        CrystalConfig {
            lattice_spacing: self.crystal.lattice_spacing,
            curvature_radius: self.crystal.curvature_radius,
        }
    }
}
