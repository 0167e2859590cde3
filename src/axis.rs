//! The axis abstraction: one motion interface over three kinds of stage.
//!
//! - [`PhysicalAxis`] wraps one motion-controller channel. Moves are issued
//!   as relative deltas against the queried position, so they stay correct
//!   for stages that were never referenced.
//! - [`VirtualAxis`] is pure bookkeeping; its stored position is
//!   authoritative and no controller is consulted.
//! - [`EnergyAxis`] is derived: a move converts the requested energy into
//!   encoder targets for the three stages it controls and fans out to them
//!   in a fixed order.
//!
//! The closed [`Axis`] sum type replaces runtime type inspection with
//! pattern matching; operations that only make sense for one kind fail with
//! a typed error for the others.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{ControlError, Result};
use crate::hardware::MotionController;
use crate::kinematics::{self, CrystalConfig};
use crate::registry::AxisConfig;

/// Shared, lockable handle to one axis.
pub type AxisHandle = Arc<Mutex<Axis>>;
/// Shared, lockable handle to the analyzer crystal parameters.
pub type SharedCrystal = Arc<Mutex<CrystalConfig>>;

/// Result of a homing request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HomeOutcome {
    /// The reference move completed; the logical position after homing.
    Homed(f64),
    /// Nothing was done, with the reason.
    Skipped(&'static str),
}

/// A stage driven through a motion-controller channel.
pub struct PhysicalAxis {
    cfg: AxisConfig,
    controller: Arc<dyn MotionController>,
    faulted: bool,
}

impl PhysicalAxis {
    pub fn new(cfg: AxisConfig, controller: Arc<dyn MotionController>) -> Self {
        Self {
            cfg,
            controller,
            faulted: false,
        }
    }

    fn channel(&self) -> &str {
        &self.cfg.serial_ref
    }

    /// Mark the axis unusable and wrap the underlying fault.
    fn fault(&mut self, source: anyhow::Error) -> ControlError {
        self.faulted = true;
        ControlError::hardware(self.cfg.uname.clone(), source)
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.faulted {
            return Err(ControlError::hardware(
                self.cfg.uname.clone(),
                anyhow::anyhow!("axis is faulted after an earlier controller error; reinitialize"),
            ));
        }
        Ok(())
    }

    /// Logical position: encoder reading plus the calibration offset.
    pub async fn query_position(&mut self) -> Result<f64> {
        self.ensure_usable()?;
        let encoder = match self.controller.query_position(self.channel()).await {
            Ok(value) => value,
            Err(err) => return Err(self.fault(err)),
        };
        let position = encoder + self.cfg.offset;
        self.cfg.last_position = position;
        Ok(position)
    }

    /// Move to an absolute logical target via a relative controller move,
    /// blocking until the stage is on-target.
    pub async fn move_absolute(&mut self, target: f64) -> Result<()> {
        let current = self.query_position().await?;
        let delta = target - current;
        if let Err(err) = self.controller.move_relative(self.channel(), delta).await {
            return Err(self.fault(err));
        }
        self.cfg.last_position = target;
        Ok(())
    }

    /// Drive to the hardware reference switch and refresh the position.
    pub async fn home(&mut self) -> Result<f64> {
        self.ensure_usable()?;
        let encoder = match self.controller.home(self.channel()).await {
            Ok(value) => value,
            Err(err) => return Err(self.fault(err)),
        };
        let position = encoder + self.cfg.offset;
        self.cfg.last_position = position;
        Ok(position)
    }

    /// Redefine the calibration offset so the current encoder reading maps
    /// to `value`. No physical motion. Referenced axes are absolute and may
    /// not be remapped.
    pub async fn set_position(&mut self, value: f64) -> Result<()> {
        if self.cfg.referenced {
            return Err(ControlError::Unsupported {
                device: self.cfg.uname.clone(),
                reason: "a referenced axis reads an absolute encoder; its position cannot be \
                         redefined"
                    .into(),
            });
        }
        self.ensure_usable()?;
        let encoder = match self.controller.query_position(self.channel()).await {
            Ok(v) => v,
            Err(err) => return Err(self.fault(err)),
        };
        self.cfg.offset = value - encoder;
        self.cfg.last_position = value;
        Ok(())
    }

    /// Push the configured velocity to the controller, if any.
    pub async fn apply_velocity(&mut self) -> Result<()> {
        if let Some(velocity) = self.cfg.velocity {
            if let Err(err) = self.controller.set_velocity(self.channel(), velocity).await {
                return Err(self.fault(err));
            }
        }
        Ok(())
    }
}

/// A purely virtual stage; its stored position is authoritative.
pub struct VirtualAxis {
    cfg: AxisConfig,
}

impl VirtualAxis {
    pub fn new(cfg: AxisConfig) -> Self {
        Self { cfg }
    }
}

/// The derived energy axis: no encoder of its own, drives three stages.
pub struct EnergyAxis {
    cfg: AxisConfig,
    crystal: SharedCrystal,
    srcx: AxisHandle,
    detx: AxisHandle,
    srcr: AxisHandle,
}

impl EnergyAxis {
    /// The crystal parameters and the three stages are injected here; the
    /// energy axis never resolves them by name at move time.
    pub fn new(
        cfg: AxisConfig,
        crystal: SharedCrystal,
        srcx: AxisHandle,
        detx: AxisHandle,
        srcr: AxisHandle,
    ) -> Self {
        Self {
            cfg,
            crystal,
            srcx,
            detx,
            srcr,
        }
    }

    /// Fan an energy move out to the three stages, in fixed order: source
    /// translation, detector translation, source rotation. The recorded
    /// energy position changes only when all three moves land.
    pub async fn move_absolute(&mut self, energy_kev: f64) -> Result<()> {
        let targets = {
            let crystal = self.crystal.lock().await;
            kinematics::energy_to_targets(energy_kev, &crystal)?
        };
        Self::move_stage(&self.srcx, targets.srcx_mm).await?;
        Self::move_stage(&self.detx, targets.detx_mm).await?;
        Self::move_stage(&self.srcr, targets.srcr_deg).await?;
        self.cfg.last_position = energy_kev;
        Ok(())
    }

    /// Calibrate the three stages so their logical readings match the
    /// geometry for `energy_kev`, then record it as the current energy.
    pub async fn set_position(&mut self, energy_kev: f64) -> Result<()> {
        let targets = {
            let crystal = self.crystal.lock().await;
            kinematics::energy_to_targets(energy_kev, &crystal)?
        };
        Self::set_stage(&self.srcx, targets.srcx_mm).await?;
        Self::set_stage(&self.detx, targets.detx_mm).await?;
        Self::set_stage(&self.srcr, targets.srcr_deg).await?;
        self.cfg.last_position = energy_kev;
        Ok(())
    }

    async fn move_stage(handle: &AxisHandle, encoder_target: f64) -> Result<()> {
        let mut axis = handle.lock().await;
        // calibration offset applied on top of the encoder target
        let target = encoder_target + axis.config().offset;
        match &mut *axis {
            Axis::Physical(stage) => stage.move_absolute(target).await,
            other => Err(ControlError::TypeMismatch {
                device: other.uname().to_string(),
                expected: "a physical stage behind the energy axis",
            }),
        }
    }

    async fn set_stage(handle: &AxisHandle, value: f64) -> Result<()> {
        let mut axis = handle.lock().await;
        match &mut *axis {
            Axis::Physical(stage) => stage.set_position(value).await,
            other => Err(ControlError::TypeMismatch {
                device: other.uname().to_string(),
                expected: "a physical stage behind the energy axis",
            }),
        }
    }
}

/// Closed sum of the three axis kinds.
pub enum Axis {
    Physical(PhysicalAxis),
    Virtual(VirtualAxis),
    Energy(EnergyAxis),
}

impl Axis {
    pub fn into_handle(self) -> AxisHandle {
        Arc::new(Mutex::new(self))
    }

    pub fn config(&self) -> &AxisConfig {
        match self {
            Axis::Physical(a) => &a.cfg,
            Axis::Virtual(a) => &a.cfg,
            Axis::Energy(a) => &a.cfg,
        }
    }

    pub fn uname(&self) -> &str {
        &self.config().uname
    }

    pub fn referenced(&self) -> bool {
        self.config().referenced
    }

    pub fn is_physical(&self) -> bool {
        matches!(self, Axis::Physical(_))
    }

    pub fn last_position(&self) -> f64 {
        self.config().last_position
    }

    /// Copy of the persistable configuration and runtime state.
    pub fn snapshot(&self) -> AxisConfig {
        self.config().clone()
    }

    /// Current logical position. Physical axes ask the controller; virtual
    /// and energy axes answer from their recorded position (the energy axis
    /// never queries hardware, to stay consistent with its fan-out stages).
    pub async fn query_position(&mut self) -> Result<f64> {
        match self {
            Axis::Physical(a) => a.query_position().await,
            Axis::Virtual(a) => Ok(a.cfg.last_position),
            Axis::Energy(a) => Ok(a.cfg.last_position),
        }
    }

    /// Blocking absolute move.
    pub async fn move_absolute(&mut self, target: f64) -> Result<()> {
        match self {
            Axis::Physical(a) => a.move_absolute(target).await,
            Axis::Virtual(a) => {
                a.cfg.last_position = target;
                Ok(())
            }
            Axis::Energy(a) => a.move_absolute(target).await,
        }
    }

    /// Redefine the current position without physical motion.
    pub async fn set_position(&mut self, value: f64) -> Result<()> {
        match self {
            Axis::Physical(a) => a.set_position(value).await,
            Axis::Virtual(a) => {
                a.cfg.last_position = value;
                Ok(())
            }
            Axis::Energy(a) => a.set_position(value).await,
        }
    }

    /// Home the axis if it has a reference switch. The caller is responsible
    /// for the confirmation policy around unreferenced stages.
    pub async fn home(&mut self) -> Result<HomeOutcome> {
        match self {
            Axis::Physical(a) => a.home().await.map(HomeOutcome::Homed),
            Axis::Virtual(_) | Axis::Energy(_) => {
                Ok(HomeOutcome::Skipped("no hardware reference switch"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::MockController;
    use crate::registry::{AxisConfig, AxisKind};

    fn physical_cfg(uname: &str, referenced: bool) -> AxisConfig {
        AxisConfig {
            uname: uname.to_string(),
            kind: AxisKind::Physical,
            controller_ref: "C-863.11".into(),
            stage_ref: "M-414.3PD".into(),
            serial_ref: format!("sn-{uname}"),
            velocity: None,
            offset: 0.0,
            last_position: 0.0,
            referenced,
        }
    }

    #[tokio::test]
    async fn test_query_applies_offset() {
        let controller = Arc::new(MockController::new());
        controller.set_encoder("sn-srcx", 100.0).await;

        let mut cfg = physical_cfg("srcx", true);
        cfg.offset = 2.5;
        let mut axis = PhysicalAxis::new(cfg, controller);

        assert_eq!(axis.query_position().await.unwrap(), 102.5);
        assert_eq!(axis.cfg.last_position, 102.5);
    }

    #[tokio::test]
    async fn test_move_is_issued_relative() {
        let controller = Arc::new(MockController::new());
        controller.set_encoder("sn-srcx", 10.0).await;

        let mut cfg = physical_cfg("srcx", true);
        cfg.offset = 5.0;
        let mut axis = PhysicalAxis::new(cfg, controller.clone());

        // logical 15.0 now; moving to logical 40.0 is a +25.0 encoder delta
        axis.move_absolute(40.0).await.unwrap();
        assert_eq!(controller.encoder("sn-srcx").await, 35.0);
        assert_eq!(axis.cfg.last_position, 40.0);
    }

    #[tokio::test]
    async fn test_fault_marks_axis_unusable() {
        let controller = Arc::new(MockController::new());
        controller.fail_channel("sn-srcx").await;

        let mut axis = PhysicalAxis::new(physical_cfg("srcx", true), controller.clone());
        assert!(axis.move_absolute(1.0).await.is_err());

        // clearing the simulated fault is not enough; the axis stays down
        controller.clear_failure("sn-srcx").await;
        assert!(matches!(
            axis.move_absolute(1.0).await,
            Err(ControlError::Hardware { .. })
        ));
    }

    #[tokio::test]
    async fn test_set_position_redefines_offset_only() {
        let controller = Arc::new(MockController::new());
        controller.set_encoder("sn-cryt", 7.0).await;

        let mut axis = PhysicalAxis::new(physical_cfg("cryt", false), controller.clone());
        axis.set_position(42.0).await.unwrap();

        assert_eq!(axis.cfg.offset, 35.0);
        assert_eq!(axis.query_position().await.unwrap(), 42.0);
        assert_eq!(controller.move_count().await, 0);
    }

    #[tokio::test]
    async fn test_set_position_rejected_for_referenced_axis() {
        let controller = Arc::new(MockController::new());
        let mut axis = PhysicalAxis::new(physical_cfg("srcx", true), controller);

        assert!(matches!(
            axis.set_position(42.0).await,
            Err(ControlError::Unsupported { .. })
        ));
    }

    #[tokio::test]
    async fn test_virtual_axis_is_pure_bookkeeping() {
        let cfg = AxisConfig {
            uname: "dummy".into(),
            kind: AxisKind::Virtual,
            controller_ref: String::new(),
            stage_ref: String::new(),
            serial_ref: String::new(),
            velocity: None,
            offset: 0.0,
            last_position: 1.5,
            referenced: false,
        };
        let mut axis = Axis::Virtual(VirtualAxis::new(cfg));

        assert_eq!(axis.query_position().await.unwrap(), 1.5);
        axis.move_absolute(-3.0).await.unwrap();
        assert_eq!(axis.query_position().await.unwrap(), -3.0);
        assert!(matches!(
            axis.home().await.unwrap(),
            HomeOutcome::Skipped(_)
        ));
    }
}
