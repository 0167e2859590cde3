//! Durable axis registry: the sole store of axis configuration and state.
//!
//! The registry loads the flat list of axis records at startup, builds one
//! handle per axis (wiring the derived energy axis to its fan-out stages and
//! the shared crystal), and writes the full list back after every successful
//! move, set or home. Writes are atomic: a temporary file is written and
//! renamed over the target, so a crash never leaves a half-written registry.
//! The file is owned by exactly one live process.
//!
//! All lookups go through [`AxisRegistry::find`]; nothing is injected into
//! ambient scope. The list order is preserved and defines the iteration
//! order reported by `wall`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::axis::{Axis, AxisHandle, EnergyAxis, PhysicalAxis, SharedCrystal, VirtualAxis};
use crate::error::{ControlError, Result};
use crate::hardware::MotionController;
use crate::kinematics::CrystalConfig;

/// Registry name under which the analyzer crystal is addressable (`set dspace …`).
pub const CRYSTAL_DEVICE_NAME: &str = "dspace";

/// Stages driven by the derived energy axis, in fan-out order.
const ENERGY_FANOUT: [&str; 3] = ["srcx", "detx", "srcr"];

/// Which kind of stage an axis record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AxisKind {
    Physical,
    Virtual,
    DerivedEnergy,
}

/// One persisted axis record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisConfig {
    /// Unique name within the registry.
    pub uname: String,
    pub kind: AxisKind,
    /// Controller model, e.g. "C-863.11".
    pub controller_ref: String,
    /// Stage model, e.g. "M-414.3PD".
    pub stage_ref: String,
    /// Controller channel address (USB serial number).
    pub serial_ref: String,
    /// Closed-loop velocity applied at startup, units per second.
    #[serde(default)]
    pub velocity: Option<f64>,
    /// Calibration offset added to the raw encoder reading.
    #[serde(default)]
    pub offset: f64,
    /// Last known logical position.
    #[serde(default)]
    pub last_position: f64,
    /// Whether the stage has a trustworthy absolute encoder.
    #[serde(default)]
    pub referenced: bool,
}

/// What a registry name resolves to.
#[derive(Clone)]
pub enum Device {
    Axis(AxisHandle),
    Crystal(SharedCrystal),
}

pub struct AxisRegistry {
    path: PathBuf,
    names: Vec<String>,
    axes: Vec<AxisHandle>,
    crystal: SharedCrystal,
}

impl AxisRegistry {
    /// Load the registry file (creating it with the default stage set if
    /// missing), build handles, wire the energy axis and push configured
    /// velocities to the controller.
    pub async fn initialize(
        path: impl Into<PathBuf>,
        controller: Arc<dyn MotionController>,
        crystal: CrystalConfig,
    ) -> Result<Self> {
        let path = path.into();
        let configs = if path.exists() {
            Self::load(&path)?
        } else {
            info!(path = %path.display(), "no registry file, writing default stage set");
            let configs = default_configs();
            Self::write_configs(&path, &configs)?;
            configs
        };
        Self::from_configs(path, configs, controller, crystal).await
    }

    /// Build a registry from in-memory records (used by tests and by
    /// `initialize`).
    pub async fn from_configs(
        path: PathBuf,
        configs: Vec<AxisConfig>,
        controller: Arc<dyn MotionController>,
        crystal: CrystalConfig,
    ) -> Result<Self> {
        let names: Vec<String> = configs.iter().map(|c| c.uname.clone()).collect();
        for (i, name) in names.iter().enumerate() {
            if name == CRYSTAL_DEVICE_NAME {
                return Err(ControlError::Registry(format!(
                    "axis name '{name}' collides with the crystal device"
                )));
            }
            if names[..i].contains(name) {
                return Err(ControlError::Registry(format!(
                    "duplicate axis name '{name}'"
                )));
            }
        }

        let crystal = Arc::new(Mutex::new(crystal));

        // Physical and virtual axes first; energy axes are wired afterwards
        // so their fan-out stages already exist.
        let mut slots: Vec<Option<AxisHandle>> = Vec::with_capacity(configs.len());
        let mut energy_slots: Vec<(usize, AxisConfig)> = Vec::new();
        for cfg in configs {
            match cfg.kind {
                AxisKind::Physical => {
                    let mut stage = PhysicalAxis::new(cfg, controller.clone());
                    stage.apply_velocity().await?;
                    slots.push(Some(Axis::Physical(stage).into_handle()));
                }
                AxisKind::Virtual => {
                    slots.push(Some(Axis::Virtual(VirtualAxis::new(cfg)).into_handle()));
                }
                AxisKind::DerivedEnergy => {
                    energy_slots.push((slots.len(), cfg));
                    slots.push(None);
                }
            }
        }

        for (slot, cfg) in energy_slots {
            let lookup = |stage_name: &str| -> Result<AxisHandle> {
                names
                    .iter()
                    .position(|n| n == stage_name)
                    .and_then(|i| slots[i].clone())
                    .ok_or_else(|| {
                        ControlError::Registry(format!(
                            "energy axis '{}' requires stage '{stage_name}'",
                            cfg.uname
                        ))
                    })
            };
            let srcx = lookup(ENERGY_FANOUT[0])?;
            let detx = lookup(ENERGY_FANOUT[1])?;
            let srcr = lookup(ENERGY_FANOUT[2])?;
            slots[slot] = Some(
                Axis::Energy(EnergyAxis::new(cfg, crystal.clone(), srcx, detx, srcr)).into_handle(),
            );
        }

        let axes: Vec<AxisHandle> = slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| ControlError::Registry("unresolved axis slot".into()))?;

        Ok(Self {
            path,
            names,
            axes,
            crystal,
        })
    }

    /// Read and parse the persisted records.
    pub fn load(path: &Path) -> Result<Vec<AxisConfig>> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| ControlError::Registry(format!("cannot parse {}: {e}", path.display())))
    }

    /// Atomically persist the records: write a temporary, then rename.
    pub fn write_configs(path: &Path, configs: &[AxisConfig]) -> Result<()> {
        let text = serde_json::to_string_pretty(configs)
            .map_err(|e| ControlError::Registry(format!("cannot serialize registry: {e}")))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Snapshot every axis and write the full registry back.
    pub async fn save_state(&self) -> Result<()> {
        let mut configs = Vec::with_capacity(self.axes.len());
        for handle in &self.axes {
            configs.push(handle.lock().await.snapshot());
        }
        Self::write_configs(&self.path, &configs)
    }

    /// Exact, case-sensitive name lookup.
    pub fn find(&self, uname: &str) -> Result<Device> {
        if uname == CRYSTAL_DEVICE_NAME {
            return Ok(Device::Crystal(self.crystal.clone()));
        }
        self.names
            .iter()
            .position(|n| n == uname)
            .map(|i| Device::Axis(self.axes[i].clone()))
            .ok_or_else(|| ControlError::UnknownDevice(uname.to_string()))
    }

    /// Lookup that must resolve to an axis.
    pub fn find_axis(&self, uname: &str) -> Result<AxisHandle> {
        match self.find(uname)? {
            Device::Axis(handle) => Ok(handle),
            Device::Crystal(_) => Err(ControlError::TypeMismatch {
                device: uname.to_string(),
                expected: "a motor axis",
            }),
        }
    }

    /// Axis names in registry (and `wall`) order.
    pub fn axis_names(&self) -> &[String] {
        &self.names
    }

    /// Axis handles in registry order.
    pub fn axes(&self) -> &[AxisHandle] {
        &self.axes
    }

    pub fn crystal(&self) -> SharedCrystal {
        self.crystal.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The instrument's stage set, used when no registry file exists yet.
pub fn default_configs() -> Vec<AxisConfig> {
    fn stage(
        uname: &str,
        controller_ref: &str,
        stage_ref: &str,
        serial_ref: &str,
        last_position: f64,
        referenced: bool,
    ) -> AxisConfig {
        AxisConfig {
            uname: uname.into(),
            kind: AxisKind::Physical,
            controller_ref: controller_ref.into(),
            stage_ref: stage_ref.into(),
            serial_ref: serial_ref.into(),
            velocity: None,
            offset: 0.0,
            last_position,
            referenced,
        }
    }

    let mut configs = vec![
        stage("srcr", "C-863.11", "M-061.DG", "0021550017", 0.0, true),
        stage("srcx", "C-863.11", "M-414.3PD", "0195500269", 150.0, true),
        stage("detx", "C-863.11", "M-414.3PD", "0195500299", 150.0, true),
        stage("cryy", "C-663.11", "M-404.42S", "0020550162", 50.0, true),
        stage("cryz", "C-663.11", "M-404.42S", "0020550164", 50.0, true),
        stage("cryr", "C-663.11", "64439200", "0020550169", 0.0, true),
        // goniometer tilt has no reference switch
        stage("cryt", "C-663.11", "65409200-0000", "0021550047", 0.0, false),
    ];
    configs.push(AxisConfig {
        uname: "energy".into(),
        kind: AxisKind::DerivedEnergy,
        controller_ref: String::new(),
        stage_ref: String::new(),
        serial_ref: String::new(),
        velocity: None,
        offset: 0.0,
        last_position: 0.0,
        referenced: false,
    });
    configs.push(AxisConfig {
        uname: "dummy".into(),
        kind: AxisKind::Virtual,
        controller_ref: String::new(),
        stage_ref: String::new(),
        serial_ref: String::new(),
        velocity: None,
        offset: 0.0,
        last_position: 0.0,
        referenced: false,
    });
    configs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::MockController;

    #[test]
    fn test_configs_round_trip_losslessly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stages.json");

        let mut configs = default_configs();
        configs[1].offset = -0.25;
        configs[1].velocity = Some(5.0);
        configs[6].referenced = false;

        AxisRegistry::write_configs(&path, &configs).unwrap();
        let loaded = AxisRegistry::load(&path).unwrap();
        assert_eq!(loaded, configs);

        // save of the reloaded list reproduces the file byte-for-byte
        AxisRegistry::write_configs(&path, &loaded).unwrap();
        assert_eq!(AxisRegistry::load(&path).unwrap(), configs);
    }

    #[tokio::test]
    async fn test_duplicate_names_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut configs = default_configs();
        configs[0].uname = "srcx".into();

        let result = AxisRegistry::from_configs(
            dir.path().join("stages.json"),
            configs,
            Arc::new(MockController::new()),
            CrystalConfig::default(),
        )
        .await;
        assert!(matches!(result, Err(ControlError::Registry(_))));
    }

    #[tokio::test]
    async fn test_find_resolves_axes_and_crystal() {
        let dir = tempfile::tempdir().unwrap();
        let registry = AxisRegistry::from_configs(
            dir.path().join("stages.json"),
            default_configs(),
            Arc::new(MockController::new()),
            CrystalConfig::default(),
        )
        .await
        .unwrap();

        assert!(matches!(registry.find("srcx"), Ok(Device::Axis(_))));
        assert!(matches!(
            registry.find(CRYSTAL_DEVICE_NAME),
            Ok(Device::Crystal(_))
        ));
        assert!(matches!(
            registry.find("sampl"),
            Err(ControlError::UnknownDevice(_))
        ));
        assert!(matches!(
            registry.find_axis(CRYSTAL_DEVICE_NAME),
            Err(ControlError::TypeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_energy_axis_requires_fanout_stages() {
        let dir = tempfile::tempdir().unwrap();
        let configs: Vec<AxisConfig> = default_configs()
            .into_iter()
            .filter(|c| c.uname != "srcr")
            .collect();

        let result = AxisRegistry::from_configs(
            dir.path().join("stages.json"),
            configs,
            Arc::new(MockController::new()),
            CrystalConfig::default(),
        )
        .await;
        assert!(matches!(result, Err(ControlError::Registry(_))));
    }
}
