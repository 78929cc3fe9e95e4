//! Kalman filter: predict and update steps.
//!
//! # Design choices
//! - A **linear KF** with a constant-velocity (CV) motion model.
//! - All math is done in `f64` via `nalgebra`.
//! - The `KalmanFilter` trait keeps the motion model swappable.
//!
//! ## State vector
//! x = [px, py, vx, vy]ᵀ relative to the ego vehicle (dynamics frame)
//!
//! ## CV Transition model
//! F = I₄ + dt * [[0₂ I₂]; [0₂ 0₂]]
//!
//! ## Process noise Q
//! Discrete white noise acceleration (DWNA), one block per axis.

use crate::error::FilterError;
use crate::types::{DMat, DVec, StateCov, StateVec};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Trait for a Kalman filter model (predict + update).
pub trait KalmanFilter {
    /// Predict state and covariance forward by `dt` seconds.
    fn predict(&self, state: &StateVec, cov: &StateCov, dt: f64) -> (StateVec, StateCov);

    /// Update state and covariance given an observation `z`, observation
    /// matrix `H` and measurement noise `R`.
    fn update(
        &self,
        state: &StateVec,
        cov: &StateCov,
        z: &DVec,
        h: &DMat,
        r: &DMat,
    ) -> Result<KfUpdateResult, FilterError>;
}

/// Result of a KF update step.
#[derive(Clone, Debug)]
pub struct KfUpdateResult {
    pub state: StateVec,
    pub cov: StateCov,
}

/// Force exact symmetry, P ← (P + Pᵀ)/2.
pub fn symmetrize(cov: &StateCov) -> StateCov {
    (cov + cov.transpose()) * 0.5
}

// ---------------------------------------------------------------------------
// Constant Velocity model
// ---------------------------------------------------------------------------

/// Configuration for the CV Kalman filter.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CvKfConfig {
    /// Acceleration noise std dev (m/s²). Higher = more manoeuvring allowed.
    pub process_noise_std: f64,
}

impl Default for CvKfConfig {
    fn default() -> Self {
        Self {
            process_noise_std: 2.0,
        }
    }
}

/// Constant-Velocity Kalman filter (4-state, linear).
#[derive(Clone, Debug)]
pub struct CvKalmanFilter {
    pub config: CvKfConfig,
}

impl CvKalmanFilter {
    pub fn new(config: CvKfConfig) -> Self {
        Self { config }
    }

    /// Build state transition matrix F for timestep dt.
    pub fn transition_matrix(dt: f64) -> StateCov {
        let mut f = StateCov::identity();
        f[(0, 2)] = dt;
        f[(1, 3)] = dt;
        f
    }

    /// Q_pos = q·dt⁴/4, Q_pos_vel = q·dt³/2, Q_vel = q·dt²
    fn process_noise(dt: f64, q_std: f64) -> StateCov {
        let q = q_std * q_std;
        let dt2 = dt * dt;
        let dt3 = dt2 * dt;
        let dt4 = dt3 * dt;

        let mut qm = StateCov::zeros();
        for i in 0..2usize {
            qm[(i, i)] = q * dt4 / 4.0;
            qm[(i + 2, i + 2)] = q * dt2;
            qm[(i, i + 2)] = q * dt3 / 2.0;
            qm[(i + 2, i)] = q * dt3 / 2.0;
        }
        qm
    }
}

impl KalmanFilter for CvKalmanFilter {
    fn predict(&self, state: &StateVec, cov: &StateCov, dt: f64) -> (StateVec, StateCov) {
        let f = Self::transition_matrix(dt);
        let q = Self::process_noise(dt, self.config.process_noise_std);
        let predicted_state = f * state;
        let predicted_cov = symmetrize(&(f * cov * f.transpose() + q));
        (predicted_state, predicted_cov)
    }

    fn update(
        &self,
        state: &StateVec,
        cov: &StateCov,
        z: &DVec,
        h: &DMat,
        r: &DMat,
    ) -> Result<KfUpdateResult, FilterError> {
        if z.len() != h.nrows() || h.ncols() != 4 {
            return Err(FilterError::DimensionMismatch {
                z: z.len(),
                h: h.nrows(),
            });
        }
        let x_dyn = DVec::from_iterator(4, state.iter().copied());
        let p_dyn = DMat::from_fn(4, 4, |r, c| cov[(r, c)]);

        // ν = z − H·x
        let innovation = z - h * &x_dyn;

        // S = H·P·Hᵀ + R
        let s = h * &p_dyn * h.transpose() + r;

        // K = P·Hᵀ·S⁻¹
        let s_inv = s
            .lu()
            .try_inverse()
            .ok_or(FilterError::SingularInnovation)?;
        let k = &p_dyn * h.transpose() * &s_inv;

        let state_update = &k * &innovation;
        let new_state = StateVec::from_fn(|r, _| state[r] + state_update[r]);

        // Joseph form P' = (I−KH)·P·(I−KH)ᵀ + K·R·Kᵀ
        let i_kh = DMat::identity(4, 4) - &k * h;
        let new_p_dyn = &i_kh * &p_dyn * i_kh.transpose() + &k * r * k.transpose();
        let new_cov = symmetrize(&StateCov::from_fn(|r, c| new_p_dyn[(r, c)]));

        Ok(KfUpdateResult {
            state: new_state,
            cov: new_cov,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn predict_constant_velocity() {
        let kf = CvKalmanFilter::new(CvKfConfig::default());
        // Object at (0,0) moving at (10,0) m/s
        let state = StateVec::new(0.0, 0.0, 10.0, 0.0);
        let cov = StateCov::identity();

        let (pred_state, pred_cov) = kf.predict(&state, &cov, 1.0);
        assert_abs_diff_eq!(pred_state[0], 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pred_state[2], 10.0, epsilon = 1e-9);
        assert!(pred_cov[(0, 0)] > cov[(0, 0)], "prediction grows uncertainty");
    }

    #[test]
    fn update_reduces_uncertainty() {
        let kf = CvKalmanFilter::new(CvKfConfig::default());
        let state = StateVec::new(40.0, 1.0, -2.0, 0.0);
        let cov = StateCov::identity() * 100.0;

        let h = DMat::from_row_slice(2, 4, &[1., 0., 0., 0., 0., 1., 0., 0.]);
        let r = DMat::from_diagonal(&DVec::from_vec(vec![4.0, 0.09]));
        let z = DVec::from_vec(vec![41.0, 1.2]);

        let res = kf.update(&state, &cov, &z, &h, &r).unwrap();
        assert!(res.cov.trace() < cov.trace(), "update should reduce uncertainty");
        assert!(res.state[0] > 40.0 && res.state[0] < 41.0);
        assert_abs_diff_eq!(res.cov, res.cov.transpose(), epsilon = 0.0);
    }

    #[test]
    fn singular_innovation_is_an_error() {
        let kf = CvKalmanFilter::new(CvKfConfig::default());
        let state = StateVec::zeros();
        let cov = StateCov::zeros();
        let h = DMat::from_row_slice(2, 4, &[1., 0., 0., 0., 0., 1., 0., 0.]);
        let r = DMat::zeros(2, 2);
        let z = DVec::from_vec(vec![1.0, 1.0]);
        assert_eq!(
            kf.update(&state, &cov, &z, &h, &r).unwrap_err(),
            FilterError::SingularInnovation
        );
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let kf = CvKalmanFilter::new(CvKfConfig::default());
        let h = DMat::from_row_slice(2, 4, &[1., 0., 0., 0., 0., 1., 0., 0.]);
        let r = DMat::identity(2, 2);
        let z = DVec::from_vec(vec![1.0, 1.0, 0.0, 0.0]);
        assert!(matches!(
            kf.update(&StateVec::zeros(), &StateCov::identity(), &z, &h, &r),
            Err(FilterError::DimensionMismatch { z: 4, h: 2 })
        ));
    }
}
