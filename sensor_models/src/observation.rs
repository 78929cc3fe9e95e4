//! Observation models: H matrix and R matrix per sensor modality.
//!
//! # State layout
//! Tracks carry x = [px, py, vx, vy] relative to the ego vehicle, so every
//! model here is linear:
//! - **Position only**: z = [px, py], H is the constant 2×4 selector
//! - **Position + velocity**: z = [px, py, vx, vy], H = I₄
//!
//! The two modalities differ only in their noise: a camera resolves the
//! lateral position well and the range poorly, a radar the other way round.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

pub type DMat = DMatrix<f64>;
pub type DVec = DVector<f64>;

/// Dimension of the track state vector these models observe.
pub const STATE_DIM: usize = 4;

/// Trait for a detection observation model.
pub trait ObservationModel {
    /// Observation matrix H for a detection with or without measured velocity.
    fn h_matrix(&self, with_velocity: bool) -> DMat {
        if with_velocity {
            DMatrix::identity(4, STATE_DIM)
        } else {
            DMatrix::from_row_slice(2, STATE_DIM, &[
                1., 0., 0., 0.,
                0., 1., 0., 0.,
            ])
        }
    }

    /// Per-axis standard deviations [x, y, vx, vy].
    fn sigmas(&self) -> [f64; 4];

    /// Measurement noise covariance R
    fn r_matrix(&self, with_velocity: bool) -> DMat {
        let s = self.sigmas();
        let dim = measurement_dim(with_velocity);
        DMatrix::from_diagonal(&DVector::from_iterator(
            dim,
            s.iter().take(dim).map(|sigma| sigma * sigma),
        ))
    }
}

/// Length of z for a detection.
pub fn measurement_dim(with_velocity: bool) -> usize {
    if with_velocity {
        4
    } else {
        2
    }
}

// ---------------------------------------------------------------------------
// Vision
// ---------------------------------------------------------------------------

/// Camera detections: tight lateral, loose longitudinal.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionObservation {
    /// Longitudinal position std dev (meters)
    pub sigma_x: f64,
    /// Lateral position std dev (meters)
    pub sigma_y: f64,
    /// Velocity std dev (m/s), both axes
    pub sigma_v: f64,
}

impl Default for VisionObservation {
    fn default() -> Self {
        Self {
            sigma_x: 2.0,
            sigma_y: 0.3,
            sigma_v: 2.0,
        }
    }
}

impl ObservationModel for VisionObservation {
    fn sigmas(&self) -> [f64; 4] {
        [self.sigma_x, self.sigma_y, self.sigma_v, self.sigma_v]
    }
}

// ---------------------------------------------------------------------------
// Radar
// ---------------------------------------------------------------------------

/// Radar detections: accurate range and range rate, coarse azimuth.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarObservation {
    /// Longitudinal position std dev (meters)
    pub sigma_x: f64,
    /// Lateral position std dev (meters)
    pub sigma_y: f64,
    /// Longitudinal velocity std dev (m/s)
    pub sigma_vx: f64,
    /// Lateral velocity std dev (m/s)
    pub sigma_vy: f64,
}

impl Default for RadarObservation {
    fn default() -> Self {
        Self {
            sigma_x: 0.5,
            sigma_y: 1.0,
            sigma_vx: 0.3,
            sigma_vy: 1.5,
        }
    }
}

impl ObservationModel for RadarObservation {
    fn sigmas(&self) -> [f64; 4] {
        [self.sigma_x, self.sigma_y, self.sigma_vx, self.sigma_vy]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn position_only_h_shape() {
        let model = VisionObservation::default();
        let h = model.h_matrix(false);
        assert_eq!((h.nrows(), h.ncols()), (2, STATE_DIM));
        assert_eq!(h[(0, 0)], 1.0);
        assert_eq!(h[(1, 1)], 1.0);
        assert_eq!(h[(0, 2)], 0.0);
    }

    #[test]
    fn full_h_is_identity() {
        let model = RadarObservation::default();
        assert_eq!(model.h_matrix(true), DMatrix::identity(4, 4));
    }

    #[test]
    fn modalities_weight_axes_differently() {
        let vision = VisionObservation::default().r_matrix(false);
        let radar = RadarObservation::default().r_matrix(false);
        // camera trusts lateral more, radar trusts range more
        assert!(vision[(1, 1)] < radar[(1, 1)]);
        assert!(radar[(0, 0)] < vision[(0, 0)]);
        assert_abs_diff_eq!(radar[(0, 0)], 0.25, epsilon = 1e-12);
    }
}
