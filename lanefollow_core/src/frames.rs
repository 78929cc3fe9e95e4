//! Coordinate normalizer between the perception and vehicle-dynamics conventions.
//!
//! | | perception | dynamics |
//! |---|---|---|
//! | origin | sensor mount | centre of gravity |
//! | x | forward | forward |
//! | y | left | right |
//! | heading / curvature | counter-clockwise + | clockwise + |
//!
//! Incoming lane boundaries and detections are mapped into the dynamics
//! convention once per cycle; track positions go back the other way when they
//! are handed to display collaborators.

use crate::types::{Detection, LaneBoundaryMeasurement, LanePolynomial};
use serde::{Deserialize, Serialize};

/// Where the perception origin sits, expressed in the perception convention.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Distance from the CG forward to the perception origin (m)
    pub sensor_offset_x: f64,
    /// Lateral offset of the perception origin from the CG, left positive (m)
    pub sensor_offset_y: f64,
}

/// Stateless transform between the two conventions.
#[derive(Clone, Debug, Default)]
pub struct CoordinateNormalizer {
    config: FrameConfig,
}

impl CoordinateNormalizer {
    pub fn new(config: FrameConfig) -> Self {
        Self { config }
    }

    // -- points and velocities ----------------------------------------------

    pub fn point_to_dynamics(&self, p: [f64; 2]) -> [f64; 2] {
        [
            p[0] + self.config.sensor_offset_x,
            -(p[1] + self.config.sensor_offset_y),
        ]
    }

    pub fn point_to_perception(&self, p: [f64; 2]) -> [f64; 2] {
        [
            p[0] - self.config.sensor_offset_x,
            -p[1] - self.config.sensor_offset_y,
        ]
    }

    /// Velocities are free vectors: only the y axis flips.
    pub fn velocity_flip(v: [f64; 2]) -> [f64; 2] {
        [v[0], -v[1]]
    }

    // -- lane polynomials ----------------------------------------------------

    /// y_d(x) = −(y_p(x − ox) + oy)
    pub fn polynomial_to_dynamics(&self, p: &LanePolynomial) -> LanePolynomial {
        let mut q = p.shifted(-self.config.sensor_offset_x).negated();
        q.lateral_offset -= self.config.sensor_offset_y;
        q
    }

    pub fn boundary_to_dynamics(&self, m: &LaneBoundaryMeasurement) -> LaneBoundaryMeasurement {
        LaneBoundaryMeasurement {
            polynomial: self.polynomial_to_dynamics(&m.polynomial),
            valid: m.valid,
            range: [
                m.range[0] + self.config.sensor_offset_x,
                m.range[1] + self.config.sensor_offset_x,
            ],
        }
    }

    // -- detections and tracks -----------------------------------------------

    pub fn detection_to_dynamics(&self, det: &Detection) -> Detection {
        Detection {
            position: self.point_to_dynamics(det.position),
            velocity: det.velocity.map(Self::velocity_flip),
            ..det.clone()
        }
    }

    pub fn detections_to_dynamics(&self, dets: &[Detection]) -> Vec<Detection> {
        dets.iter().map(|d| self.detection_to_dynamics(d)).collect()
    }

    /// Track position and velocity mapped back for display.
    pub fn motion_to_perception(
        &self,
        position: [f64; 2],
        velocity: [f64; 2],
    ) -> ([f64; 2], [f64; 2]) {
        (self.point_to_perception(position), Self::velocity_flip(velocity))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
