//! Mock Hardware Implementations
//!
//! Provides simulated hardware devices for testing without physical hardware.
//! All mock devices use async-safe operations (tokio::time::sleep, not
//! std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockController` - Simulated multi-channel motion controller
//! - `MockDetector` - Simulated spectroscopy detector with random spectra
//!
//! Both support failure injection so tests can exercise the hardware-fault
//! paths without real hardware.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use rand::Rng;
use tokio::sync::RwLock;
use tokio::time::sleep;

use crate::hardware::controller::MotionController;
use crate::hardware::detector::{Detector, DetectorReading};

// =============================================================================
// MockController - Simulated Motion Controller
// =============================================================================

/// Mock motion controller with realistic timing.
///
/// Move duration scales with distance; a short settling delay follows every
/// move. Channels spring into existence at encoder position 0.0 on first use.
pub struct MockController {
    encoders: RwLock<HashMap<String, f64>>,
    /// Every completed relative move, in issue order: (channel, new encoder).
    move_log: RwLock<Vec<(String, f64)>>,
    failing: RwLock<HashSet<String>>,
    speed_units_per_sec: f64,
    settle: Duration,
}

impl MockController {
    /// Create a controller with test-friendly timing (fast moves).
    pub fn new() -> Self {
        Self::with_speed(2000.0)
    }

    /// Create a controller with a custom motion speed, units per second.
    pub fn with_speed(speed_units_per_sec: f64) -> Self {
        Self {
            encoders: RwLock::new(HashMap::new()),
            move_log: RwLock::new(Vec::new()),
            failing: RwLock::new(HashSet::new()),
            speed_units_per_sec,
            settle: Duration::from_millis(1),
        }
    }

    /// Preset a channel's encoder position.
    pub async fn set_encoder(&self, channel: &str, value: f64) {
        self.encoders.write().await.insert(channel.to_string(), value);
    }

    /// Current encoder position of a channel (0.0 if never touched).
    pub async fn encoder(&self, channel: &str) -> f64 {
        self.encoders.read().await.get(channel).copied().unwrap_or(0.0)
    }

    /// Make every call on `channel` fail until cleared.
    pub async fn fail_channel(&self, channel: &str) {
        self.failing.write().await.insert(channel.to_string());
    }

    /// Clear an injected failure.
    pub async fn clear_failure(&self, channel: &str) {
        self.failing.write().await.remove(channel);
    }

    /// Completed moves in issue order: (channel, encoder position reached).
    pub async fn move_log(&self) -> Vec<(String, f64)> {
        self.move_log.read().await.clone()
    }

    /// Number of completed moves across all channels.
    pub async fn move_count(&self) -> usize {
        self.move_log.read().await.len()
    }

    async fn check_channel(&self, channel: &str) -> Result<()> {
        if self.failing.read().await.contains(channel) {
            bail!("simulated controller fault on channel {channel}");
        }
        Ok(())
    }
}

impl Default for MockController {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MotionController for MockController {
    async fn move_relative(&self, channel: &str, delta: f64) -> Result<()> {
        self.check_channel(channel).await?;

        let travel_ms = (delta.abs() / self.speed_units_per_sec * 1000.0) as u64;
        sleep(Duration::from_millis(travel_ms) + self.settle).await;

        let mut encoders = self.encoders.write().await;
        let position = encoders.entry(channel.to_string()).or_insert(0.0);
        *position += delta;
        let reached = *position;
        drop(encoders);

        self.move_log.write().await.push((channel.to_string(), reached));
        Ok(())
    }

    async fn query_position(&self, channel: &str) -> Result<f64> {
        self.check_channel(channel).await?;
        Ok(self.encoder(channel).await)
    }

    async fn home(&self, channel: &str) -> Result<f64> {
        self.check_channel(channel).await?;
        sleep(self.settle).await;
        self.encoders.write().await.insert(channel.to_string(), 0.0);
        Ok(0.0)
    }

    async fn set_velocity(&self, channel: &str, _velocity: f64) -> Result<()> {
        self.check_channel(channel).await
    }

    async fn is_ready(&self) -> Result<bool> {
        Ok(true)
    }
}

// =============================================================================
// MockDetector - Simulated Spectroscopy Detector
// =============================================================================

/// Mock detector producing random spectra.
///
/// `readout_latency` models the per-run processing time after the dwell and
/// lets tests distinguish barrier joins from sequential acquisition.
pub struct MockDetector {
    uname: String,
    channels: usize,
    connected: bool,
    readout_latency: Duration,
    running: RwLock<bool>,
    started_at: RwLock<Option<tokio::time::Instant>>,
    elapsed_s: RwLock<f64>,
    fail_next: RwLock<bool>,
}

impl MockDetector {
    /// Create a connected detector with the given MCA length.
    pub fn new(uname: impl Into<String>, channels: usize) -> Self {
        Self {
            uname: uname.into(),
            channels,
            connected: true,
            readout_latency: Duration::ZERO,
            running: RwLock::new(false),
            started_at: RwLock::new(None),
            elapsed_s: RwLock::new(0.0),
            fail_next: RwLock::new(false),
        }
    }

    /// Add a fixed per-run readout latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.readout_latency = latency;
        self
    }

    /// Create a detector that reports as disconnected.
    pub fn disconnected(uname: impl Into<String>) -> Self {
        let mut detector = Self::new(uname, 0);
        detector.connected = false;
        detector
    }

    /// Make the next run fail at readout.
    pub async fn fail_next(&self) {
        *self.fail_next.write().await = true;
    }
}

#[async_trait]
impl Detector for MockDetector {
    fn uname(&self) -> &str {
        &self.uname
    }

    fn connected(&self) -> bool {
        self.connected
    }

    async fn start(&self) -> Result<()> {
        if *self.running.read().await {
            bail!("detector {} already running", self.uname);
        }
        *self.running.write().await = true;
        *self.started_at.write().await = Some(tokio::time::Instant::now());
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let started = self.started_at.write().await.take();
        if let Some(at) = started {
            *self.elapsed_s.write().await = at.elapsed().as_secs_f64();
        }
        *self.running.write().await = false;
        Ok(())
    }

    async fn readout(&self) -> Result<DetectorReading> {
        sleep(self.readout_latency).await;

        if *self.fail_next.read().await {
            *self.fail_next.write().await = false;
            bail!("simulated readout failure on {}", self.uname);
        }

        let elapsed_s = *self.elapsed_s.read().await;
        let spectrum: Vec<u64> = {
            let mut rng = rand::thread_rng();
            (0..self.channels).map(|_| rng.gen_range(0..100)).collect()
        };
        let events: u64 = spectrum.iter().sum();
        let output_count_rate = if elapsed_s > 0.0 {
            events as f64 / elapsed_s
        } else {
            0.0
        };

        Ok(DetectorReading {
            detector: self.uname.clone(),
            spectrum,
            // a few percent dead-time loss
            input_count_rate: output_count_rate * 1.03,
            output_count_rate,
            elapsed_s,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_controller_relative_moves() {
        let controller = MockController::new();

        controller.move_relative("ch0", 5.0).await.unwrap();
        assert_eq!(controller.query_position("ch0").await.unwrap(), 5.0);

        controller.move_relative("ch0", -2.0).await.unwrap();
        assert_eq!(controller.query_position("ch0").await.unwrap(), 3.0);

        assert_eq!(controller.move_count().await, 2);
    }

    #[tokio::test]
    async fn test_mock_controller_failure_injection() {
        let controller = MockController::new();
        controller.fail_channel("ch1").await;

        assert!(controller.move_relative("ch1", 1.0).await.is_err());
        assert!(controller.query_position("ch1").await.is_err());

        controller.clear_failure("ch1").await;
        assert!(controller.move_relative("ch1", 1.0).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_controller_home_resets_encoder() {
        let controller = MockController::new();
        controller.set_encoder("ch0", 42.0).await;

        assert_eq!(controller.home("ch0").await.unwrap(), 0.0);
        assert_eq!(controller.encoder("ch0").await, 0.0);
    }

    #[tokio::test]
    async fn test_mock_detector_acquire() {
        let detector = MockDetector::new("det00", 256);

        let reading = detector.acquire(Duration::from_millis(20)).await.unwrap();
        assert_eq!(reading.detector, "det00");
        assert_eq!(reading.spectrum.len(), 256);
        assert!(reading.elapsed_s >= 0.02);
        assert!(reading.input_count_rate >= reading.output_count_rate);
    }

    #[tokio::test]
    async fn test_mock_detector_failure() {
        let detector = MockDetector::new("det00", 64);
        detector.fail_next().await;

        assert!(detector.acquire(Duration::from_millis(1)).await.is_err());
        // next run recovers
        assert!(detector.acquire(Duration::from_millis(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let detector = MockDetector::new("det00", 64);
        detector.start().await.unwrap();
        assert!(detector.start().await.is_err());
        detector.stop().await.unwrap();
    }
}
