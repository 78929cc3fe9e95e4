//! Fundamental types used across the entire workspace.

use nalgebra::{DMatrix, DVector, Matrix4, Vector4};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Scalar type: use f64 throughout for numerical precision in Kalman filter.
// ---------------------------------------------------------------------------

/// Track state vector relative to the ego vehicle: [px, py, vx, vy]
pub type StateVec = Vector4<f64>;

/// 4×4 state covariance matrix
pub type StateCov = Matrix4<f64>;

/// Generic dynamic-size vector (used for measurement innovation)
pub type DVec = DVector<f64>;

/// Generic dynamic-size matrix (used for H, R, S)
pub type DMat = DMatrix<f64>;

// ---------------------------------------------------------------------------
// Identifier types
// ---------------------------------------------------------------------------

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TrackId(pub u64);

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SensorId(pub u32);

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct DetectionId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

impl fmt::Display for DetectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Which kind of sensor produced a detection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorModality {
    Vision,
    Radar,
}

/// A single object detection reported by a vision or radar sensor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(default)]
    pub id: DetectionId,
    pub sensor_id: SensorId,
    pub modality: SensorModality,
    /// Measurement timestamp (seconds, same clock as the cycle time)
    pub timestamp: f64,
    /// Measured position [x, y] (meters)
    pub position: [f64; 2],
    /// Measured velocity [vx, vy] relative to the ego vehicle, if the sensor reports it
    #[serde(default)]
    pub velocity: Option<[f64; 2]>,
}

impl Detection {
    pub fn has_velocity(&self) -> bool {
        self.velocity.is_some()
    }

    /// Observation vector z: [x, y] or [x, y, vx, vy].
    pub fn observation(&self) -> DVec {
        match self.velocity {
            Some(v) => DVec::from_vec(vec![self.position[0], self.position[1], v[0], v[1]]),
            None => DVec::from_vec(vec![self.position[0], self.position[1]]),
        }
    }
}

// ---------------------------------------------------------------------------
// Ego kinematics
// ---------------------------------------------------------------------------

/// Ego vehicle feedback, refreshed every cycle (dynamics convention).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EgoState {
    /// Longitudinal velocity (m/s)
    pub velocity: f64,
    /// Longitudinal acceleration (m/s²)
    pub acceleration: f64,
    /// Yaw rate (rad/s)
    pub yaw_rate: f64,
    /// Front wheel steering angle (rad)
    pub steering_angle: f64,
}

// ---------------------------------------------------------------------------
// Lane boundaries
// ---------------------------------------------------------------------------

/// Clothoid-style boundary polynomial
/// y(x) = lateral_offset + heading·x + curvature·x²/2 + curvature_derivative·x³/6
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanePolynomial {
    pub curvature: f64,
    pub curvature_derivative: f64,
    pub heading: f64,
    pub lateral_offset: f64,
}

impl LanePolynomial {
    /// Lateral position y(x)
    pub fn lateral_at(&self, x: f64) -> f64 {
        self.lateral_offset
            + self.heading * x
            + self.curvature * x * x / 2.0
            + self.curvature_derivative * x * x * x / 6.0
    }

    /// Slope dy/dx at x
    pub fn slope_at(&self, x: f64) -> f64 {
        self.heading + self.curvature * x + self.curvature_derivative * x * x / 2.0
    }

    /// Curvature d²y/dx² at x
    pub fn curvature_at(&self, x: f64) -> f64 {
        self.curvature + self.curvature_derivative * x
    }

    /// The same curve re-expanded about `x = dx`, i.e. q(x) = p(x + dx).
    pub fn shifted(&self, dx: f64) -> Self {
        Self {
            curvature: self.curvature_at(dx),
            curvature_derivative: self.curvature_derivative,
            heading: self.slope_at(dx),
            lateral_offset: self.lateral_at(dx),
        }
    }

    /// Mirror about the x axis.
    pub fn negated(&self) -> Self {
        Self {
            curvature: -self.curvature,
            curvature_derivative: -self.curvature_derivative,
            heading: -self.heading,
            lateral_offset: -self.lateral_offset,
        }
    }

    /// Coefficient-wise mean of two polynomials.
    pub fn average(&self, other: &Self) -> Self {
        Self {
            curvature: (self.curvature + other.curvature) / 2.0,
            curvature_derivative: (self.curvature_derivative + other.curvature_derivative) / 2.0,
            heading: (self.heading + other.heading) / 2.0,
            lateral_offset: (self.lateral_offset + other.lateral_offset) / 2.0,
        }
    }
}

/// One lane boundary as reported by the lane sensor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneBoundaryMeasurement {
    pub polynomial: LanePolynomial,
    pub valid: bool,
    /// Valid longitudinal range [start, end] (meters)
    pub range: [f64; 2],
}

impl LaneBoundaryMeasurement {
    pub fn invalid() -> Self {
        Self::default()
    }
}
