//! Spectroscopy detector seam.
//!
//! Interface to a pulse-processing detector channel: arm it, dwell, stop,
//! read back the spectrum and count-rate statistics. The acquisition trigger
//! fans a common dwell time out to every connected detector concurrently.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One detector's readout after a timed acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorReading {
    /// Detector identifier.
    pub detector: String,
    /// MCA spectrum, counts per channel.
    pub spectrum: Vec<u64>,
    /// Input count rate, counts per second.
    pub input_count_rate: f64,
    /// Output count rate, counts per second.
    pub output_count_rate: f64,
    /// Real time the run lasted, seconds.
    pub elapsed_s: f64,
}

/// Interface to a spectroscopy detector.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Detector identifier, unique among connected detectors.
    fn uname(&self) -> &str;

    /// Whether the detector is connected and enabled for acquisition.
    fn connected(&self) -> bool;

    /// Start a run.
    async fn start(&self) -> Result<()>;

    /// Stop the current run.
    async fn stop(&self) -> Result<()>;

    /// Read back spectrum and statistics of the last run.
    async fn readout(&self) -> Result<DetectorReading>;

    /// Timed acquisition: start a run, dwell, stop, read out.
    async fn acquire(&self, dwell: Duration) -> Result<DetectorReading> {
        self.start().await?;
        tokio::time::sleep(dwell).await;
        self.stop().await?;
        self.readout().await
    }
}
