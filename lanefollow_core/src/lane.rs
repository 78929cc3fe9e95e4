//! Lane estimator: centreline, deviation, relative yaw and curvature preview.
//!
//! All inputs are in the dynamics convention (y right), so the left boundary
//! normally sits at negative lateral offset.
//!
//! # Centreline policy
//! - both boundaries valid → coefficient-wise mean
//! - one boundary valid    → that boundary shifted by the nominal half-width
//! - none valid            → hold the last valid estimate, flag degraded

use crate::types::{EgoState, LaneBoundaryMeasurement, LanePolynomial};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneEstimatorConfig {
    /// Lane width assumed when it cannot be measured (m)
    pub nominal_lane_width: f64,
}

impl Default for LaneEstimatorConfig {
    fn default() -> Self {
        Self {
            nominal_lane_width: 3.6,
        }
    }
}

/// Lane geometry relative to the ego vehicle for one cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LaneGeometryEstimate {
    /// Ego position minus centreline position, perpendicular to the lane (m)
    pub lateral_deviation: f64,
    /// Ego heading minus lane heading (rad)
    pub relative_yaw: f64,
    /// Curvature at each prediction step (1/m)
    pub curvature_preview: Vec<f64>,
    /// Centreline polynomial used for the above
    pub centerline: LanePolynomial,
    /// Half of the lane width (m)
    pub half_width: f64,
}

impl LaneGeometryEstimate {
    /// Straight lane, ego centred.
    pub fn straight(horizon: usize, half_width: f64) -> Self {
        Self {
            lateral_deviation: 0.0,
            relative_yaw: 0.0,
            curvature_preview: vec![0.0; horizon],
            centerline: LanePolynomial::default(),
            half_width,
        }
    }

    /// Signed lateral offset of a point from the centreline.
    pub fn lateral_offset_of(&self, x: f64, y: f64) -> f64 {
        y - self.centerline.lateral_at(x)
    }

    /// True if the point lies between the lane boundaries.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.lateral_offset_of(x, y).abs() <= self.half_width
    }
}

/// Estimator output: the geometry plus whether it was held from a past cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct LaneEstimate {
    pub geometry: LaneGeometryEstimate,
    pub degraded: bool,
}

pub struct LaneEstimator {
    config: LaneEstimatorConfig,
    horizon: usize,
    sample_time: f64,
    last_valid: Option<LaneGeometryEstimate>,
}

impl LaneEstimator {
    pub fn new(config: LaneEstimatorConfig, horizon: usize, sample_time: f64) -> Self {
        Self {
            config,
            horizon,
            sample_time,
            last_valid: None,
        }
    }

    fn nominal_half_width(&self) -> f64 {
        self.config.nominal_lane_width / 2.0
    }

    /// Estimate the lane for the current cycle.
    pub fn estimate(
        &mut self,
        left: &LaneBoundaryMeasurement,
        right: &LaneBoundaryMeasurement,
        ego: &EgoState,
    ) -> LaneEstimate {
        let Some((centerline, half_width, range)) = self.centerline(left, right) else {
            warn!("no valid lane boundary, holding last estimate");
            let geometry = self.last_valid.clone().unwrap_or_else(|| {
                LaneGeometryEstimate::straight(self.horizon, self.nominal_half_width())
            });
            return LaneEstimate {
                geometry,
                degraded: true,
            };
        };

        let heading = centerline.slope_at(0.0).atan();
        let lateral_deviation = -centerline.lateral_at(0.0) * heading.cos();
        let relative_yaw = -heading;

        // Constant-speed preview; the far end of the sensor range is held.
        let step = ego.velocity.max(0.0) * self.sample_time;
        let lo = range[0].max(0.0);
        let hi = range[1].max(lo);
        let curvature_preview = (0..self.horizon)
            .map(|k| centerline.curvature_at((step * k as f64).clamp(lo, hi)))
            .collect();

        let geometry = LaneGeometryEstimate {
            lateral_deviation,
            relative_yaw,
            curvature_preview,
            centerline,
            half_width,
        };
        self.last_valid = Some(geometry.clone());
        LaneEstimate {
            geometry,
            degraded: false,
        }
    }

    /// Centreline, half-width and valid range from whichever boundaries are valid.
    fn centerline(
        &self,
        left: &LaneBoundaryMeasurement,
        right: &LaneBoundaryMeasurement,
    ) -> Option<(LanePolynomial, f64, [f64; 2])> {
        let nominal = self.nominal_half_width();
        match (left.valid, right.valid) {
            (true, true) => {
                let measured =
                    (right.polynomial.lateral_offset - left.polynomial.lateral_offset) / 2.0;
                let half_width = if measured > 0.0 { measured } else { nominal };
                let range = [
                    left.range[0].max(right.range[0]),
                    left.range[1].min(right.range[1]),
                ];
                Some((left.polynomial.average(&right.polynomial), half_width, range))
            }
            (true, false) => {
                let mut c = left.polynomial;
                c.lateral_offset += nominal;
                Some((c, nominal, left.range))
            }
            (false, true) => {
                let mut c = right.polynomial;
                c.lateral_offset -= nominal;
                Some((c, nominal, right.range))
            }
            (false, false) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn boundary(offset: f64, heading: f64, curvature: f64) -> LaneBoundaryMeasurement {
        LaneBoundaryMeasurement {
            polynomial: LanePolynomial {
                curvature,
                curvature_derivative: 0.0,
                heading,
                lateral_offset: offset,
            },
            valid: true,
            range: [0.0, 60.0],
        }
    }

    fn ego(v: f64) -> EgoState {
        EgoState {
            velocity: v,
            ..Default::default()
        }
    }

    #[test]
    fn both_boundaries_average_to_centreline() {
        let mut est = LaneEstimator::new(LaneEstimatorConfig::default(), 10, 0.1);
        // lane centre 0.4 m to the right of the ego
        let out = est.estimate(&boundary(-1.4, 0.0, 0.0), &boundary(2.2, 0.0, 0.0), &ego(20.0));
        assert!(!out.degraded);
        assert_abs_diff_eq!(out.geometry.lateral_deviation, -0.4, epsilon = 1e-12);
        assert_abs_diff_eq!(out.geometry.half_width, 1.8, epsilon = 1e-12);
        assert_eq!(out.geometry.curvature_preview.len(), 10);
    }

    #[test]
    fn relative_yaw_opposes_lane_heading() {
        let mut est = LaneEstimator::new(LaneEstimatorConfig::default(), 5, 0.1);
        let out = est.estimate(&boundary(-1.8, 0.02, 0.0), &boundary(1.8, 0.02, 0.0), &ego(15.0));
        assert_abs_diff_eq!(out.geometry.relative_yaw, -(0.02f64).atan(), epsilon = 1e-12);
    }

    #[test]
    fn single_boundary_is_offset_by_half_width() {
        let mut est = LaneEstimator::new(LaneEstimatorConfig::default(), 5, 0.1);
        let out = est.estimate(
            &boundary(-1.5, 0.0, 0.0),
            &LaneBoundaryMeasurement::invalid(),
            &ego(10.0),
        );
        assert!(!out.degraded);
        // centre at -1.5 + 1.8 = 0.3 → ego is 0.3 m left of it
        assert_abs_diff_eq!(out.geometry.lateral_deviation, -0.3, epsilon = 1e-12);

        let out = est.estimate(
            &LaneBoundaryMeasurement::invalid(),
            &boundary(1.5, 0.0, 0.0),
            &ego(10.0),
        );
        assert_abs_diff_eq!(out.geometry.lateral_deviation, 0.3, epsilon = 1e-12);
    }

    #[test]
    fn invalid_boundaries_hold_last_estimate() {
        let mut est = LaneEstimator::new(LaneEstimatorConfig::default(), 8, 0.1);
        let good = est.estimate(&boundary(-1.6, 0.01, 0.001), &boundary(2.0, 0.01, 0.001), &ego(20.0));
        let none = LaneBoundaryMeasurement::invalid();
        let held1 = est.estimate(&none, &none, &ego(25.0));
        let held2 = est.estimate(&none, &none, &ego(5.0));
        assert!(held1.degraded && held2.degraded);
        assert_eq!(held1.geometry, good.geometry);
        assert_eq!(held1.geometry, held2.geometry);
    }

    #[test]
    fn invalid_from_start_is_straight_and_stable() {
        let mut est = LaneEstimator::new(LaneEstimatorConfig::default(), 4, 0.1);
        let none = LaneBoundaryMeasurement::invalid();
        let a = est.estimate(&none, &none, &ego(20.0));
        let b = est.estimate(&none, &none, &ego(20.0));
        assert_eq!(a, b);
        assert_eq!(a.geometry.curvature_preview, vec![0.0; 4]);
    }

    #[test]
    fn preview_samples_along_travel_and_holds_at_range_end() {
        let mut est = LaneEstimator::new(LaneEstimatorConfig::default(), 6, 0.5);
        let mut left = boundary(-1.8, 0.0, 0.001);
        let mut right = boundary(1.8, 0.0, 0.001);
        left.polynomial.curvature_derivative = 1e-4;
        right.polynomial.curvature_derivative = 1e-4;
        left.range = [0.0, 25.0];
        right.range = [0.0, 40.0];
        // 20 m/s * 0.5 s = 10 m per step; range ends at 25 m
        let out = est.estimate(&left, &right, &ego(20.0));
        let k = &out.geometry.curvature_preview;
        assert_abs_diff_eq!(k[0], 0.001, epsilon = 1e-12);
        assert_abs_diff_eq!(k[1], 0.001 + 1e-4 * 10.0, epsilon = 1e-12);
        assert_abs_diff_eq!(k[2], 0.001 + 1e-4 * 20.0, epsilon = 1e-12);
        assert_abs_diff_eq!(k[3], 0.001 + 1e-4 * 25.0, epsilon = 1e-12);
        assert_abs_diff_eq!(k[5], k[3], epsilon = 1e-12);
    }

    #[test]
    fn contains_uses_centreline_and_half_width() {
        let g = LaneGeometryEstimate::straight(3, 1.8);
        assert!(g.contains(30.0, 1.0));
        assert!(!g.contains(30.0, -2.5));
    }
}
