//! Mahalanobis gating: determines whether a detection is "close enough"
//! to a predicted track to be considered as a potential association.
//!
//! # Gating criterion
//! d²(z, track) = νᵀ S⁻¹ ν  where ν = z − H·x̂_pred,  S = H·P_pred·Hᵀ + R
//!
//! Accept if d² < χ²(p, dof) for confidence level p.
//!
//! # Gate threshold table
//! dof=2 (position only):     χ²(0.99, 2) ≈ 9.21
//! dof=4 (position+velocity): χ²(0.99, 4) ≈ 13.28

use crate::types::{DMat, DVec, StateCov, StateVec};

/// Pre-computed χ² gate thresholds indexed by dimension [1..=4].
/// Value at index `d` is χ²(0.99, d).
pub const CHI2_99: [f64; 5] = [0.0, 6.63, 9.21, 11.34, 13.28];

/// Result of a gate check for one (track, detection) pair.
#[derive(Clone, Debug)]
pub struct GateResult {
    /// Mahalanobis distance squared
    pub d2: f64,
    /// True if d² < gate threshold
    pub passes: bool,
}

/// Check whether detection `z` passes the Mahalanobis gate for a predicted
/// track state `(state, cov)` using observation matrix `H` and measurement
/// noise `R`.
pub fn mahalanobis_gate(
    state: &StateVec,
    cov: &StateCov,
    z: &DVec,
    h: &DMat,
    r: &DMat,
    gate_threshold: f64,
) -> GateResult {
    let x_dyn = DVec::from_iterator(4, state.iter().copied());
    let innovation = z - h * x_dyn;

    let p_dyn = DMat::from_fn(4, 4, |r, c| cov[(r, c)]);
    let s = h * &p_dyn * h.transpose() + r;

    let d2 = match s.lu().try_inverse() {
        Some(s_inv) => innovation.dot(&(&s_inv * &innovation)),
        None => f64::INFINITY, // degenerate, reject
    };

    GateResult {
        d2,
        passes: d2 < gate_threshold,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    fn position_h() -> DMat {
        DMat::from_row_slice(2, 4, &[1., 0., 0., 0., 0., 1., 0., 0.])
    }

    fn simple_r(sigma: f64) -> DMat {
        DMat::from_diagonal(&DVector::from_vec(vec![sigma * sigma, sigma * sigma]))
    }

    #[test]
    fn point_inside_gate() {
        let state = StateVec::new(30.0, 0.5, -2.0, 0.0);
        let cov = StateCov::identity() * 4.0;
        // Measurement right at prediction → d² ≈ 0
        let z = DVector::from_vec(vec![30.0, 0.5]);
        let res = mahalanobis_gate(&state, &cov, &z, &position_h(), &simple_r(1.0), CHI2_99[2]);
        assert!(res.passes, "point at track location must pass gate");
        assert!(res.d2 < 1e-9);
    }

    #[test]
    fn point_outside_gate() {
        let state = StateVec::zeros();
        let cov = StateCov::identity() * 0.01;
        let z = DVector::from_vec(vec![50.0, 5.0]);
        let res = mahalanobis_gate(&state, &cov, &z, &position_h(), &simple_r(0.1), CHI2_99[2]);
        assert!(!res.passes, "distant point must fail gate");
    }

    #[test]
    fn velocity_disagreement_fails_full_gate() {
        let state = StateVec::new(30.0, 0.0, 0.0, 0.0);
        let cov = StateCov::identity() * 0.1;
        let h = DMat::identity(4, 4);
        let r = DMat::identity(4, 4) * 0.1;
        // same position, 10 m/s off in velocity
        let z = DVector::from_vec(vec![30.0, 0.0, 10.0, 0.0]);
        let res = mahalanobis_gate(&state, &cov, &z, &h, &r, CHI2_99[4]);
        assert!(!res.passes);
    }
}
