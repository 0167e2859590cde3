//! Concurrent detector triggering.
//!
//! The only concurrency in the control path lives here: one task per
//! connected detector, all started together so their dwell windows align in
//! wall-clock time, then a barrier join. Total acquisition time is bounded
//! by the slowest detector, not the sum. With no detector connected the
//! trigger degrades to a plain timed wait, which keeps motion-only dry runs
//! working.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::hardware::{Detector, DetectorReading};

/// Per-detector result of one triggered acquisition.
///
/// A failing detector is reported here instead of discarding the readings
/// the other detectors collected in the same dwell window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DetectorOutcome {
    Reading(DetectorReading),
    Failed { detector: String, message: String },
}

impl DetectorOutcome {
    pub fn reading(&self) -> Option<&DetectorReading> {
        match self {
            DetectorOutcome::Reading(reading) => Some(reading),
            DetectorOutcome::Failed { .. } => None,
        }
    }
}

/// Grace period past the dwell before a hung detector is given up on.
const READOUT_GRACE: Duration = Duration::from_secs(30);

/// Fans a common dwell time out to every connected detector.
pub struct AcquisitionTrigger {
    detectors: Vec<Arc<dyn Detector>>,
}

impl AcquisitionTrigger {
    pub fn new(detectors: Vec<Arc<dyn Detector>>) -> Self {
        Self { detectors }
    }

    /// A trigger with no detectors; every acquisition is a timed wait.
    pub fn disconnected() -> Self {
        Self::new(Vec::new())
    }

    /// Number of connected detectors.
    pub fn connected_count(&self) -> usize {
        self.detectors.iter().filter(|d| d.connected()).count()
    }

    /// Acquire for `dwell` on all connected detectors simultaneously and
    /// wait for the slowest one.
    pub async fn acquire(&self, dwell: Duration) -> Vec<DetectorOutcome> {
        let enabled: Vec<Arc<dyn Detector>> = self
            .detectors
            .iter()
            .filter(|d| d.connected())
            .cloned()
            .collect();

        if enabled.is_empty() {
            tokio::time::sleep(dwell).await;
            return Vec::new();
        }

        let tasks: Vec<_> = enabled
            .into_iter()
            .map(|detector| {
                tokio::spawn(async move {
                    let name = detector.uname().to_string();
                    let result =
                        match tokio::time::timeout(dwell + READOUT_GRACE, detector.acquire(dwell))
                            .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(anyhow::anyhow!(
                                "no readout within {:?} past the dwell",
                                READOUT_GRACE
                            )),
                        };
                    (name, result)
                })
            })
            .collect();

        let mut outcomes = Vec::with_capacity(tasks.len());
        for (index, joined) in futures::future::join_all(tasks).await.into_iter().enumerate() {
            match joined {
                Ok((_, Ok(reading))) => outcomes.push(DetectorOutcome::Reading(reading)),
                Ok((name, Err(err))) => {
                    warn!(detector = %name, error = %err, "detector acquisition failed");
                    outcomes.push(DetectorOutcome::Failed {
                        detector: name,
                        message: err.to_string(),
                    });
                }
                Err(join_err) => {
                    warn!(task = index, error = %join_err, "detector task aborted");
                    outcomes.push(DetectorOutcome::Failed {
                        detector: format!("task-{index}"),
                        message: join_err.to_string(),
                    });
                }
            }
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::MockDetector;
    use std::time::Instant;

    #[tokio::test]
    async fn test_no_detector_degrades_to_timed_wait() {
        let trigger = AcquisitionTrigger::disconnected();

        let started = Instant::now();
        let outcomes = trigger.acquire(Duration::from_millis(40)).await;

        assert!(outcomes.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_disconnected_detectors_are_skipped() {
        let trigger = AcquisitionTrigger::new(vec![
            Arc::new(MockDetector::new("det00", 64)),
            Arc::new(MockDetector::disconnected("det01")),
        ]);
        assert_eq!(trigger.connected_count(), 1);

        let outcomes = trigger.acquire(Duration::from_millis(5)).await;
        assert_eq!(outcomes.len(), 1);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_discard_the_rest() {
        let failing = Arc::new(MockDetector::new("det00", 64));
        failing.fail_next().await;
        let trigger = AcquisitionTrigger::new(vec![
            failing,
            Arc::new(MockDetector::new("det01", 64)),
        ]);

        let outcomes = trigger.acquire(Duration::from_millis(5)).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().any(|o| o.reading().is_some()));
        assert!(outcomes.iter().any(|o| o.reading().is_none()));
    }
}
