//! Custom error types for the control core.
//!
//! This module defines the primary error type, `ControlError`, for the whole
//! application. Using the `thiserror` crate, it separates the expected,
//! recoverable domain violations (unreachable energy, out-of-range geometry,
//! bad command syntax) from hardware faults, which render the affected axis
//! unusable until it is reinitialized.
//!
//! ## Error Hierarchy
//!
//! - **`Syntax`**: wrong argument count or shape at the command boundary.
//!   Printed and recovered locally; the console keeps running.
//! - **`UnknownDevice`**: a name that does not resolve in the registry.
//! - **`UnreachableEnergy`** / **`OutOfRange`**: kinematics domain/range
//!   violations. No hardware is touched when these are raised.
//! - **`TypeMismatch`**: an entity of the wrong kind was passed to an
//!   operation (e.g. the crystal where an axis is required).
//! - **`Unsupported`**: the operation is valid for the device kind but
//!   disallowed by policy (e.g. redefining a referenced axis).
//! - **`Hardware`**: a controller call failed. The axis is marked faulted;
//!   other axes and the process are unaffected, but an in-flight scan aborts.
//! - **`Registry`** / **`Io`**: persistence problems. Fatal at startup and
//!   shutdown, reported before exit.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type Result<T> = std::result::Result<T, ControlError>;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Unknown device <{0}>")]
    UnknownDevice(String),

    #[error("unreachable energy for this crystal (sin theta = {sin_theta:.4})")]
    UnreachableEnergy { sin_theta: f64 },

    #[error(
        "crystal distance {distance_mm:.2} mm outside the safe window \
         ({min_mm:.0}, {max_mm:.0}) mm: collision potential"
    )]
    OutOfRange {
        distance_mm: f64,
        min_mm: f64,
        max_mm: f64,
    },

    #[error("'{device}' cannot be used here: expected {expected}")]
    TypeMismatch {
        device: String,
        expected: &'static str,
    },

    #[error("operation not allowed on '{device}': {reason}")]
    Unsupported { device: String, reason: String },

    #[error("hardware fault on axis '{axis}': {source}")]
    Hardware {
        axis: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("recorder error: {0}")]
    Recorder(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControlError {
    /// Wrap a failed controller call for the named axis.
    pub fn hardware(axis: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Hardware {
            axis: axis.into(),
            source,
        }
    }
}
