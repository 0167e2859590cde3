//! Scan orchestration: a stepping state machine over motion and acquisition.
//!
//! Four primitives: absolute and relative 1-D scans, absolute and relative
//! 2-D meshes. Each is a strict interleave of blocking moves and triggered
//! acquisitions: `Idle → Moving → Acquiring → Moving → … → Idle`, or
//! `Aborted` when a move or acquisition fails. Mesh ordering is a hard
//! contract: the outer axis is the slow one and advances only between
//! complete inner sweeps.
//!
//! Stepping uses absolute targets (`start + i·step`) rather than accumulated
//! relative moves, so floating-point error cannot drift the grid.
//!
//! Cancellation is cooperative: the flag is checked between points, never
//! mid-move, and relative scans still return to their origin when the
//! cancellation arrived during the main loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::acquisition::AcquisitionTrigger;
use crate::error::{ControlError, Result};
use crate::motion::MotionCoordinator;
use crate::recorder::{PointRecord, ScanRecorder};
use crate::session::ScanSession;

/// One scan request.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanSpec {
    Absolute1D {
        axis: String,
        start: f64,
        end: f64,
        n_steps: u32,
        dwell_s: f64,
    },
    Relative1D {
        axis: String,
        r_start: f64,
        r_end: f64,
        n_steps: u32,
        dwell_s: f64,
    },
    Absolute2D {
        outer: String,
        outer_start: f64,
        outer_end: f64,
        outer_steps: u32,
        inner: String,
        inner_start: f64,
        inner_end: f64,
        inner_steps: u32,
        dwell_s: f64,
    },
    Relative2D {
        outer: String,
        outer_r_start: f64,
        outer_r_end: f64,
        outer_steps: u32,
        inner: String,
        inner_r_start: f64,
        inner_r_end: f64,
        inner_steps: u32,
        dwell_s: f64,
    },
}

impl ScanSpec {
    /// Check the structural invariants before anything moves.
    pub fn validate(&self) -> Result<()> {
        let (steps, dwell_s) = match self {
            ScanSpec::Absolute1D {
                n_steps, dwell_s, ..
            }
            | ScanSpec::Relative1D {
                n_steps, dwell_s, ..
            } => (vec![*n_steps], *dwell_s),
            ScanSpec::Absolute2D {
                outer,
                inner,
                outer_steps,
                inner_steps,
                dwell_s,
                ..
            }
            | ScanSpec::Relative2D {
                outer,
                inner,
                outer_steps,
                inner_steps,
                dwell_s,
                ..
            } => {
                if outer == inner {
                    return Err(ControlError::Syntax(
                        "mesh requires two different axes".into(),
                    ));
                }
                (vec![*outer_steps, *inner_steps], *dwell_s)
            }
        };
        if steps.iter().any(|&n| n < 1) {
            return Err(ControlError::Syntax("nsteps must be at least 1".into()));
        }
        if !dwell_s.is_finite() || dwell_s <= 0.0 {
            return Err(ControlError::Syntax(
                "acquisition time must be strictly positive".into(),
            ));
        }
        Ok(())
    }

    /// The command line this spec originated from, forwarded with every
    /// point record.
    pub fn command_line(&self) -> String {
        match self {
            ScanSpec::Absolute1D {
                axis,
                start,
                end,
                n_steps,
                dwell_s,
            } => format!("ascan {axis} {start} {end} {n_steps} {dwell_s}"),
            ScanSpec::Relative1D {
                axis,
                r_start,
                r_end,
                n_steps,
                dwell_s,
            } => format!("dscan {axis} {r_start} {r_end} {n_steps} {dwell_s}"),
            ScanSpec::Absolute2D {
                outer,
                outer_start,
                outer_end,
                outer_steps,
                inner,
                inner_start,
                inner_end,
                inner_steps,
                dwell_s,
            } => format!(
                "mesh {outer} {outer_start} {outer_end} {outer_steps} \
                 {inner} {inner_start} {inner_end} {inner_steps} {dwell_s}"
            ),
            ScanSpec::Relative2D {
                outer,
                outer_r_start,
                outer_r_end,
                outer_steps,
                inner,
                inner_r_start,
                inner_r_end,
                inner_steps,
                dwell_s,
            } => format!(
                "dmesh {outer} {outer_r_start} {outer_r_end} {outer_steps} \
                 {inner} {inner_r_start} {inner_r_end} {inner_steps} {dwell_s}"
            ),
        }
    }
}

/// Where the engine currently is in its stepping cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Moving,
    Acquiring,
    Aborted,
}

/// How a scan ended on the non-fault path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Completed { points: u32 },
    Cancelled { points: u32 },
}

pub struct ScanEngine {
    motion: MotionCoordinator,
    trigger: AcquisitionTrigger,
    session: ScanSession,
    cancel: Arc<AtomicBool>,
    state: ScanState,
}

impl ScanEngine {
    pub fn new(motion: MotionCoordinator, trigger: AcquisitionTrigger, session: ScanSession) -> Self {
        Self {
            motion,
            trigger,
            session,
            cancel: Arc::new(AtomicBool::new(false)),
            state: ScanState::Idle,
        }
    }

    /// Shared flag a caller can set to stop the scan after the current
    /// move/acquire pair.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn session(&self) -> &ScanSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut ScanSession {
        &mut self.session
    }

    pub fn motion(&self) -> &MotionCoordinator {
        &self.motion
    }

    /// Run one scan to completion, cancellation or abort. The session's
    /// scan index is consumed exactly once in every case, so a retry never
    /// lands in the same storage unit.
    pub async fn run(
        &mut self,
        spec: ScanSpec,
        recorder: &mut dyn ScanRecorder,
    ) -> Result<ScanOutcome> {
        spec.validate()?;
        self.cancel.store(false, Ordering::SeqCst);

        let scan_index = self.session.scan_index();
        info!(scan = scan_index, command = %spec.command_line(), "scan started");

        let result = self.dispatch(&spec, recorder).await;
        self.session.advance();

        match &result {
            Ok(outcome) => {
                self.state = ScanState::Idle;
                info!(scan = scan_index, ?outcome, "scan finished");
            }
            Err(err) => {
                self.state = ScanState::Aborted;
                warn!(scan = scan_index, error = %err, "scan aborted");
            }
        }
        result
    }

    async fn dispatch(
        &mut self,
        spec: &ScanSpec,
        recorder: &mut dyn ScanRecorder,
    ) -> Result<ScanOutcome> {
        let command = spec.command_line();
        match spec {
            ScanSpec::Absolute1D {
                axis,
                start,
                end,
                n_steps,
                dwell_s,
            } => {
                self.scan_1d(axis, *start, *end, *n_steps, *dwell_s, &command, recorder)
                    .await
            }
            ScanSpec::Relative1D {
                axis,
                r_start,
                r_end,
                n_steps,
                dwell_s,
            } => {
                let origin = self.current_position(axis).await?;
                let outcome = self
                    .scan_1d(
                        axis,
                        origin + r_start,
                        origin + r_end,
                        *n_steps,
                        *dwell_s,
                        &command,
                        recorder,
                    )
                    .await?;
                // back to the pre-scan position; skipped when the scan faulted
                self.state = ScanState::Moving;
                self.motion
                    .move_absolute(&[(axis.clone(), origin)])
                    .await?;
                Ok(outcome)
            }
            ScanSpec::Absolute2D {
                outer,
                outer_start,
                outer_end,
                outer_steps,
                inner,
                inner_start,
                inner_end,
                inner_steps,
                dwell_s,
            } => {
                self.scan_2d(
                    outer,
                    *outer_start,
                    *outer_end,
                    *outer_steps,
                    inner,
                    *inner_start,
                    *inner_end,
                    *inner_steps,
                    *dwell_s,
                    &command,
                    recorder,
                )
                .await
            }
            ScanSpec::Relative2D {
                outer,
                outer_r_start,
                outer_r_end,
                outer_steps,
                inner,
                inner_r_start,
                inner_r_end,
                inner_steps,
                dwell_s,
            } => {
                let outer_origin = self.current_position(outer).await?;
                let inner_origin = self.current_position(inner).await?;
                let outcome = self
                    .scan_2d(
                        outer,
                        outer_origin + outer_r_start,
                        outer_origin + outer_r_end,
                        *outer_steps,
                        inner,
                        inner_origin + inner_r_start,
                        inner_origin + inner_r_end,
                        *inner_steps,
                        *dwell_s,
                        &command,
                        recorder,
                    )
                    .await?;
                self.state = ScanState::Moving;
                self.motion
                    .move_absolute(&[
                        (outer.clone(), outer_origin),
                        (inner.clone(), inner_origin),
                    ])
                    .await?;
                Ok(outcome)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn scan_1d(
        &mut self,
        axis: &str,
        start: f64,
        end: f64,
        n_steps: u32,
        dwell_s: f64,
        command: &str,
        recorder: &mut dyn ScanRecorder,
    ) -> Result<ScanOutcome> {
        let step = (end - start) / f64::from(n_steps);
        let mut points = 0u32;

        for i in 0..=n_steps {
            let target = start + f64::from(i) * step;
            self.state = ScanState::Moving;
            self.motion
                .move_absolute(&[(axis.to_string(), target)])
                .await?;

            self.state = ScanState::Acquiring;
            let position = self.current_position(axis).await?;
            self.record_point(command, (axis, position), (axis, position), dwell_s, recorder)
                .await?;
            points += 1;
            info!(point = i, last = n_steps, position, "scan point");

            if i < n_steps && self.cancel.load(Ordering::SeqCst) {
                info!("cancellation requested; stopping after the current point");
                return Ok(ScanOutcome::Cancelled { points });
            }
        }
        Ok(ScanOutcome::Completed { points })
    }

    #[allow(clippy::too_many_arguments)]
    async fn scan_2d(
        &mut self,
        outer: &str,
        outer_start: f64,
        outer_end: f64,
        outer_steps: u32,
        inner: &str,
        inner_start: f64,
        inner_end: f64,
        inner_steps: u32,
        dwell_s: f64,
        command: &str,
        recorder: &mut dyn ScanRecorder,
    ) -> Result<ScanOutcome> {
        let outer_step = (outer_end - outer_start) / f64::from(outer_steps);
        let inner_step = (inner_end - inner_start) / f64::from(inner_steps);
        let mut points = 0u32;

        self.state = ScanState::Moving;
        self.motion
            .move_absolute(&[
                (outer.to_string(), outer_start),
                (inner.to_string(), inner_start),
            ])
            .await?;

        for i in 0..=outer_steps {
            for j in 0..=inner_steps {
                self.state = ScanState::Acquiring;
                let outer_position = self.current_position(outer).await?;
                let inner_position = self.current_position(inner).await?;
                self.record_point(
                    command,
                    (outer, outer_position),
                    (inner, inner_position),
                    dwell_s,
                    recorder,
                )
                .await?;
                points += 1;
                info!(outer_point = i, inner_point = j, "scan point");

                let last_point = i == outer_steps && j == inner_steps;
                if !last_point && self.cancel.load(Ordering::SeqCst) {
                    info!("cancellation requested; stopping after the current point");
                    return Ok(ScanOutcome::Cancelled { points });
                }

                if j < inner_steps {
                    self.state = ScanState::Moving;
                    self.motion
                        .move_absolute(&[(
                            inner.to_string(),
                            inner_start + f64::from(j + 1) * inner_step,
                        )])
                        .await?;
                } else if i < outer_steps {
                    // the outer axis advances only between complete inner sweeps
                    self.state = ScanState::Moving;
                    self.motion
                        .move_absolute(&[
                            (outer.to_string(), outer_start + f64::from(i + 1) * outer_step),
                            (inner.to_string(), inner_start),
                        ])
                        .await?;
                }
            }
        }
        Ok(ScanOutcome::Completed { points })
    }

    async fn current_position(&self, axis: &str) -> Result<f64> {
        let handle = self.motion.registry().find_axis(axis)?;
        let position = handle.lock().await.query_position().await?;
        Ok(position)
    }

    async fn record_point(
        &mut self,
        command: &str,
        outer: (&str, f64),
        inner: (&str, f64),
        dwell_s: f64,
        recorder: &mut dyn ScanRecorder,
    ) -> Result<()> {
        let readings = self.trigger.acquire(Duration::from_secs_f64(dwell_s)).await;
        let record = PointRecord {
            command: command.to_string(),
            outer_axis: outer.0.to_string(),
            outer_position: outer.1,
            inner_axis: inner.0.to_string(),
            inner_position: inner.1,
            dwell_s,
            readings,
            timestamp: Utc::now(),
        };
        recorder
            .append(self.session.scan_index(), &record)
            .await
            .map_err(|err| ControlError::Recorder(err.to_string()))
    }
}
