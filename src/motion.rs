//! Sequential multi-axis motion with registry write-back.
//!
//! The coordinator is the single entry point for user-level moves. Batches
//! are validated all-or-nothing before the first axis moves, then executed
//! strictly sequentially in argument order (the energy fan-out relies on
//! this ordering). On the first hardware error the remaining moves are
//! skipped and the error surfaces; axes that already moved keep their new
//! positions. There is no automatic rollback.
//!
//! Every successful move, set or home writes the full registry back to disk.

use std::sync::Arc;

use tracing::{error, info};

use crate::axis::{Axis, HomeOutcome};
use crate::error::{ControlError, Result};
use crate::registry::{AxisRegistry, Device};

pub struct MotionCoordinator {
    registry: Arc<AxisRegistry>,
}

impl MotionCoordinator {
    pub fn new(registry: Arc<AxisRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<AxisRegistry> {
        &self.registry
    }

    /// Current logical positions of the named axes, in the given order.
    pub async fn positions(&self, names: &[String]) -> Result<Vec<(String, f64)>> {
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let handle = self.registry.find_axis(name)?;
            let position = handle.lock().await.query_position().await?;
            out.push((name.clone(), position));
        }
        Ok(out)
    }

    /// Positions of every registered axis, in registry order.
    pub async fn all_positions(&self) -> Result<Vec<(String, f64)>> {
        let mut out = Vec::with_capacity(self.registry.axes().len());
        for handle in self.registry.axes() {
            let mut axis = handle.lock().await;
            let position = axis.query_position().await?;
            out.push((axis.uname().to_string(), position));
        }
        Ok(out)
    }

    /// Absolute moves, sequential in the given order.
    pub async fn move_absolute(&self, pairs: &[(String, f64)]) -> Result<()> {
        // every name must resolve before any axis moves
        let mut resolved = Vec::with_capacity(pairs.len());
        for (name, target) in pairs {
            resolved.push((self.registry.find_axis(name)?, *target));
        }

        let mut outcome = Ok(());
        for (handle, target) in resolved {
            let mut axis = handle.lock().await;
            info!(axis = axis.uname(), target, "moving");
            if let Err(err) = axis.move_absolute(target).await {
                outcome = Err(err);
                break;
            }
        }

        // positions reached so far are persisted even when the batch aborts
        self.persist(outcome).await
    }

    /// Relative moves: resolve each axis's current position, then delegate.
    pub async fn move_relative(&self, pairs: &[(String, f64)]) -> Result<()> {
        let mut absolute = Vec::with_capacity(pairs.len());
        for (name, delta) in pairs {
            let handle = self.registry.find_axis(name)?;
            let current = handle.lock().await.query_position().await?;
            absolute.push((name.clone(), current + delta));
        }
        self.move_absolute(&absolute).await
    }

    /// Redefine a device's position (axis calibration or crystal lattice).
    /// No physical motion is commanded.
    pub async fn set_position(&self, name: &str, value: f64) -> Result<()> {
        match self.registry.find(name)? {
            Device::Crystal(crystal) => {
                crystal.lock().await.lattice_spacing = value;
                info!(lattice_spacing = value, "crystal lattice redefined");
            }
            Device::Axis(handle) => {
                handle.lock().await.set_position(value).await?;
                info!(axis = name, value, "position redefined");
            }
        }
        self.persist(Ok(())).await
    }

    /// Home one axis. Unreferenced stages home only when the caller has
    /// confirmed the request (they can collide with hard stops).
    pub async fn home(&self, name: &str, confirmed: bool) -> Result<HomeOutcome> {
        let handle = self.registry.find_axis(name)?;
        let mut axis = handle.lock().await;

        if let Axis::Physical(_) = &*axis {
            if !axis.referenced() && !confirmed {
                return Ok(HomeOutcome::Skipped(
                    "unreferenced axis; homing not confirmed",
                ));
            }
        }

        let outcome = axis.home().await?;
        drop(axis);

        if matches!(outcome, HomeOutcome::Homed(_)) {
            self.persist(Ok(())).await?;
        }
        Ok(outcome)
    }

    /// Write the registry back, preferring an earlier motion error over a
    /// save failure (an unwritable registry is still reported).
    async fn persist(&self, outcome: Result<()>) -> Result<()> {
        match (outcome, self.registry.save_state().await) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(save_err)) => Err(save_err),
            (Err(motion_err), Ok(())) => Err(motion_err),
            (Err(motion_err), Err(save_err)) => {
                error!(error = %save_err, "registry save failed while handling a motion error");
                Err(motion_err)
            }
        }
    }
}
