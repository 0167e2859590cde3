//! Bragg-geometry kinematics for the derived energy axis.
//!
//! Pure functions mapping photon energy to encoder targets for the source
//! translation, detector translation and source rotation stages, plus the
//! reverse estimate used for diagnostics. All validation happens here, before
//! any hardware is touched: an energy outside the crystal's diffraction
//! domain or a crystal distance outside the mechanically safe window fails
//! without moving an axis.

use serde::{Deserialize, Serialize};

use crate::error::{ControlError, Result};

/// Planck constant times speed of light, in keV·Å.
pub const HC_KEV_ANGSTROM: f64 = 12.398;

/// Lattice spacing of the Si(440) analyzer reflection, in Å.
pub const D_SI440: f64 = 0.960;
/// Lattice spacing of the Si(331) analyzer reflection, in Å.
pub const D_SI331: f64 = 1.246;
/// Bending radius of the analyzer crystal, in mm.
pub const R_CRYSTAL_MM: f64 = 500.0;

/// Encoder zero of the source carriage relative to the crystal pole, in mm.
pub const SOURCE_CARRIAGE_ZERO_MM: f64 = 366.0;
/// The detector carriage rides this far beyond the source carriage, in mm.
pub const DETECTOR_CARRIAGE_GAP_MM: f64 = 27.0;

/// Mechanically safe source-to-crystal distance window (open interval), in mm.
/// Outside it the carriages can collide with the crystal tower or each other.
pub const DISTANCE_MIN_MM: f64 = 95.0;
pub const DISTANCE_MAX_MM: f64 = 366.0;

/// Analyzer crystal parameters consulted by the energy axis.
///
/// A mutable singleton at runtime, shared by reference with the energy axis
/// and mutated only by the explicit `set` operation on the crystal device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrystalConfig {
    /// Lattice spacing in Å.
    pub lattice_spacing: f64,
    /// Bending radius in mm.
    pub curvature_radius: f64,
}

impl Default for CrystalConfig {
    fn default() -> Self {
        Self {
            lattice_spacing: D_SI440,
            curvature_radius: R_CRYSTAL_MM,
        }
    }
}

impl CrystalConfig {
    /// Name of the recognized preset matching the current lattice spacing.
    pub fn preset_name(&self) -> Option<&'static str> {
        if self.lattice_spacing == D_SI440 {
            Some("Si(440)")
        } else if self.lattice_spacing == D_SI331 {
            Some("Si(331)")
        } else {
            None
        }
    }
}

/// Encoder targets for one energy, before per-axis calibration offsets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyTargets {
    /// Source translation target, mm.
    pub srcx_mm: f64,
    /// Detector translation target, mm.
    pub detx_mm: f64,
    /// Source rotation target, degrees.
    pub srcr_deg: f64,
    /// Source-to-crystal distance; twice this is the source-detector throw.
    pub half_distance_mm: f64,
}

/// Compute the encoder targets that put the spectrometer at `energy_kev`.
///
/// Fails with [`ControlError::UnreachableEnergy`] when the Bragg condition
/// has no solution for this crystal, and with [`ControlError::OutOfRange`]
/// when the resulting carriage distance would leave the safe window. The
/// bounds check operates on the offset-free geometry; the energy axis applies
/// each stage's calibration offset to the returned targets afterwards.
pub fn energy_to_targets(energy_kev: f64, crystal: &CrystalConfig) -> Result<EnergyTargets> {
    let sin_theta = HC_KEV_ANGSTROM / (2.0 * energy_kev * crystal.lattice_spacing);
    if sin_theta.is_nan() || sin_theta <= -1.0 || sin_theta >= 1.0 {
        return Err(ControlError::UnreachableEnergy { sin_theta });
    }

    let theta_rad = sin_theta.asin();
    let srcr_deg = theta_rad.to_degrees() - 90.0;
    let distance_mm = crystal.curvature_radius / theta_rad.tan();
    let srcx_mm = SOURCE_CARRIAGE_ZERO_MM - distance_mm;
    let detx_mm = srcx_mm + DETECTOR_CARRIAGE_GAP_MM;

    if distance_mm <= DISTANCE_MIN_MM || distance_mm >= DISTANCE_MAX_MM {
        return Err(ControlError::OutOfRange {
            distance_mm,
            min_mm: DISTANCE_MIN_MM,
            max_mm: DISTANCE_MAX_MM,
        });
    }

    Ok(EnergyTargets {
        srcx_mm,
        detx_mm,
        srcr_deg,
        half_distance_mm: distance_mm,
    })
}

/// Estimate the energy from a source-translation encoder position.
///
/// Diagnostic only: the estimate ignores the source rotation and the physical
/// crystal position, so it is the inverse of [`energy_to_targets`] under
/// ideal alignment.
pub fn position_to_energy(srcx_mm: f64, crystal: &CrystalConfig) -> f64 {
    let distance_mm = SOURCE_CARRIAGE_ZERO_MM - srcx_mm;
    let theta_rad = (crystal.curvature_radius / distance_mm).atan();
    HC_KEV_ANGSTROM / (2.0 * theta_rad.sin() * crystal.lattice_spacing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reachable_energy_targets() {
        let crystal = CrystalConfig::default();
        let targets = energy_to_targets(7.0, &crystal).unwrap();

        assert!(targets.half_distance_mm > DISTANCE_MIN_MM);
        assert!(targets.half_distance_mm < DISTANCE_MAX_MM);
        assert!((targets.detx_mm - targets.srcx_mm - DETECTOR_CARRIAGE_GAP_MM).abs() < 1e-12);
        // Bragg angle below 90 degrees means a negative rotation target
        assert!(targets.srcr_deg < 0.0);
    }

    #[test]
    fn test_inverse_consistency() {
        let crystal = CrystalConfig::default();
        for energy in [6.6, 6.9, 7.2, 7.5, 7.9] {
            let targets = energy_to_targets(energy, &crystal).unwrap();
            let recovered = position_to_energy(targets.srcx_mm, &crystal);
            assert!(
                (recovered - energy).abs() < 1e-9,
                "energy {energy} recovered as {recovered}"
            );
        }
    }

    #[test]
    fn test_unreachable_energy() {
        let crystal = CrystalConfig::default();
        // sin(theta) = 12.398 / (2 * 5.0 * 0.960) > 1
        match energy_to_targets(5.0, &crystal) {
            Err(ControlError::UnreachableEnergy { sin_theta }) => assert!(sin_theta >= 1.0),
            other => panic!("expected UnreachableEnergy, got {other:?}"),
        }
    }

    #[test]
    fn test_distance_out_of_range() {
        let crystal = CrystalConfig::default();
        // 20 keV puts the source carriage far beyond the rail
        assert!(matches!(
            energy_to_targets(20.0, &crystal),
            Err(ControlError::OutOfRange { .. })
        ));
        // 6.5 keV pushes the carriage into the crystal tower
        assert!(matches!(
            energy_to_targets(6.5, &crystal),
            Err(ControlError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_preset_names() {
        let mut crystal = CrystalConfig::default();
        assert_eq!(crystal.preset_name(), Some("Si(440)"));
        crystal.lattice_spacing = D_SI331;
        assert_eq!(crystal.preset_name(), Some("Si(331)"));
        crystal.lattice_spacing = 1.0;
        assert_eq!(crystal.preset_name(), None);
    }
}
