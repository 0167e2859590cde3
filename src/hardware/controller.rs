//! Vendor motion-controller seam.
//!
//! Hardware-agnostic interface to a multi-channel motion controller.
//! Implementations handle protocol-specific details (GCS over USB, RS-232,
//! etc.). Channels are addressed by the serial reference stored in each
//! axis configuration.

use anyhow::Result;
use async_trait::async_trait;

/// Interface to a vendor motion controller.
///
/// All moves are relative and block until the controller reports on-target;
/// the axis layer converts absolute logical targets into relative deltas so
/// that moves stay correct even for stages that were never referenced.
#[async_trait]
pub trait MotionController: Send + Sync {
    /// Issue a relative move and wait until the channel is on-target.
    async fn move_relative(&self, channel: &str, delta: f64) -> Result<()>;

    /// Read the current encoder position of a channel.
    async fn query_position(&self, channel: &str) -> Result<f64>;

    /// Drive a channel to its hardware reference switch and wait for it.
    /// Returns the encoder position after the reference move.
    async fn home(&self, channel: &str) -> Result<f64>;

    /// Apply a closed-loop velocity setting, in units per second.
    async fn set_velocity(&self, channel: &str, velocity: f64) -> Result<()>;

    /// Whether the controller is ready to accept commands.
    async fn is_ready(&self) -> Result<bool>;
}
