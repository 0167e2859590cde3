//! Hardware collaborator seams.
//!
//! The control core never talks to vendor libraries directly; it consumes the
//! two traits defined here. Real deployments implement them against the
//! vendor motion-controller and detector SDKs; this crate ships simulated
//! implementations in [`mock`] so the whole command surface can be exercised
//! without hardware.

pub mod controller;
pub mod detector;
pub mod mock;

pub use controller::MotionController;
pub use detector::{Detector, DetectorReading};
pub use mock::{MockController, MockDetector};
