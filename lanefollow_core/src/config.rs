//! System configuration: loaded once, validated, then immutable for the run.
//!
//! Every field has a default so a configuration file only needs to name what
//! it changes.

use crate::{
    error::ConfigError, frames::FrameConfig, lane::LaneEstimatorConfig, tracker::TrackerConfig,
};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Quadratic cost weights.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CostWeights {
    pub lateral_deviation: f64,
    pub relative_yaw: f64,
    pub velocity: f64,
    pub acceleration: f64,
    pub steering: f64,
    pub acceleration_rate: f64,
    pub steering_rate: f64,
    /// Quadratic penalty on the spacing slack
    pub spacing_slack: f64,
    /// Linear penalty on the spacing slack
    pub spacing_slack_linear: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            lateral_deviation: 1.0,
            relative_yaw: 0.5,
            velocity: 0.5,
            acceleration: 0.05,
            steering: 1.0,
            acceleration_rate: 0.1,
            steering_rate: 5.0,
            spacing_slack: 1e4,
            spacing_slack_linear: 1e3,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorLimits {
    /// Symmetric front wheel steering bound (rad)
    pub steering_max: f64,
    /// Maximum deceleration, negative (m/s²)
    pub accel_min: f64,
    /// Maximum acceleration (m/s²)
    pub accel_max: f64,
}

impl Default for ActuatorLimits {
    fn default() -> Self {
        Self {
            steering_max: 0.26,
            accel_min: -3.0,
            accel_max: 2.0,
        }
    }
}

impl ActuatorLimits {
    pub fn clamp_acceleration(&self, a: f64) -> f64 {
        a.clamp(self.accel_min, self.accel_max)
    }

    pub fn clamp_steering(&self, d: f64) -> f64 {
        d.clamp(-self.steering_max, self.steering_max)
    }
}

/// Safe following distance policy: d_safe = min_standoff + time_gap·v
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SpacingPolicy {
    pub enabled: bool,
    /// Time gap (s)
    pub time_gap: f64,
    /// Minimum standoff distance (m)
    pub min_standoff: f64,
}

impl Default for SpacingPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            time_gap: 1.5,
            min_standoff: 10.0,
        }
    }
}

/// Linear bicycle model parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleParams {
    /// Total mass (kg)
    pub mass: f64,
    /// Yaw moment of inertia (kg·m²)
    pub yaw_inertia: f64,
    /// CG to front axle (m)
    pub lf: f64,
    /// CG to rear axle (m)
    pub lr: f64,
    /// Front cornering stiffness per tyre (N/rad)
    pub cf: f64,
    /// Rear cornering stiffness per tyre (N/rad)
    pub cr: f64,
    /// First-order lag between commanded and achieved acceleration (s)
    pub accel_time_constant: f64,
}

impl Default for VehicleParams {
    fn default() -> Self {
        Self {
            mass: 1575.0,
            yaw_inertia: 2875.0,
            lf: 1.2,
            lr: 1.6,
            cf: 19000.0,
            cr: 33000.0,
            accel_time_constant: 0.5,
        }
    }
}

/// What the controller emits when the QP cannot be used.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailSafePolicy {
    /// Repeat the previous command
    HoldPrevious,
    /// Ramp acceleration down toward maximum deceleration, hold steering
    DecelerationRamp {
        /// m/s³
        ramp_rate: f64,
    },
}

impl Default for FailSafePolicy {
    fn default() -> Self {
        FailSafePolicy::DecelerationRamp { ramp_rate: 5.0 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub max_iterations: u32,
    pub eps_abs: f64,
    pub eps_rel: f64,
    /// Wall-clock budget for one solve (s)
    pub time_budget: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iterations: 4000,
            eps_abs: 1e-5,
            eps_rel: 1e-5,
            time_budget: 0.05,
        }
    }
}

impl SolverSettings {
    pub fn budget(&self) -> Duration {
        Duration::from_secs_f64(self.time_budget)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Control period (s)
    pub sample_time: f64,
    pub prediction_horizon: usize,
    pub control_horizon: usize,
    pub weights: CostWeights,
    pub limits: ActuatorLimits,
    pub spacing: SpacingPolicy,
    pub vehicle: VehicleParams,
    /// Driver-set velocity used when the cycle input carries none (m/s)
    pub default_set_velocity: f64,
    /// The model is linearised at no less than this speed (m/s)
    pub min_linearization_speed: f64,
    pub fail_safe: FailSafePolicy,
    pub solver: SolverSettings,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            sample_time: 0.1,
            prediction_horizon: 30,
            control_horizon: 5,
            weights: CostWeights::default(),
            limits: ActuatorLimits::default(),
            spacing: SpacingPolicy::default(),
            vehicle: VehicleParams::default(),
            default_set_velocity: 20.0,
            min_linearization_speed: 1.0,
            fail_safe: FailSafePolicy::default(),
            solver: SolverSettings::default(),
        }
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidParameter {
            name,
            requirement: "finite and > 0",
            value,
        })
    }
}

fn non_negative(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidParameter {
            name,
            requirement: "finite and >= 0",
            value,
        })
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sample_time.is_finite() && self.sample_time > 0.0) {
            return Err(ConfigError::NonPositiveSampleTime(self.sample_time));
        }
        if self.prediction_horizon == 0
            || self.control_horizon == 0
            || self.control_horizon > self.prediction_horizon
        {
            return Err(ConfigError::InvalidHorizon {
                prediction: self.prediction_horizon,
                control: self.control_horizon,
            });
        }

        let l = &self.limits;
        if !(l.steering_max.is_finite() && l.steering_max > 0.0) {
            return Err(ConfigError::InvertedLimits {
                name: "steering",
                min: -l.steering_max,
                max: l.steering_max,
            });
        }
        if !(l.accel_min.is_finite() && l.accel_max.is_finite())
            || l.accel_min >= 0.0
            || l.accel_max <= 0.0
        {
            return Err(ConfigError::InvertedLimits {
                name: "acceleration",
                min: l.accel_min,
                max: l.accel_max,
            });
        }

        if self.spacing.enabled {
            positive("spacing.time_gap", self.spacing.time_gap)?;
        }
        non_negative("spacing.min_standoff", self.spacing.min_standoff)?;

        let v = &self.vehicle;
        positive("vehicle.mass", v.mass)?;
        positive("vehicle.yaw_inertia", v.yaw_inertia)?;
        positive("vehicle.lf", v.lf)?;
        positive("vehicle.lr", v.lr)?;
        positive("vehicle.cf", v.cf)?;
        positive("vehicle.cr", v.cr)?;
        positive("vehicle.accel_time_constant", v.accel_time_constant)?;

        let w = &self.weights;
        for (name, value) in [
            ("weights.lateral_deviation", w.lateral_deviation),
            ("weights.relative_yaw", w.relative_yaw),
            ("weights.velocity", w.velocity),
            ("weights.acceleration", w.acceleration),
            ("weights.steering", w.steering),
            ("weights.acceleration_rate", w.acceleration_rate),
            ("weights.steering_rate", w.steering_rate),
            ("weights.spacing_slack", w.spacing_slack),
            ("weights.spacing_slack_linear", w.spacing_slack_linear),
        ] {
            non_negative(name, value)?;
        }

        non_negative("default_set_velocity", self.default_set_velocity)?;
        positive("min_linearization_speed", self.min_linearization_speed)?;
        if let FailSafePolicy::DecelerationRamp { ramp_rate } = self.fail_safe {
            positive("fail_safe.ramp_rate", ramp_rate)?;
        }
        positive("solver.time_budget", self.solver.time_budget)?;
        positive("solver.eps_abs", self.solver.eps_abs)?;
        positive("solver.eps_rel", self.solver.eps_rel)?;
        if self.solver.max_iterations == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "solver.max_iterations",
                requirement: ">= 1",
                value: 0.0,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

/// Everything the core needs at initialisation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub controller: ControllerConfig,
    pub lane: LaneEstimatorConfig,
    pub tracker: TrackerConfig,
    pub frames: FrameConfig,
}

impl SystemConfig {
    /// Parse and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.controller.validate()?;
        positive("lane.nominal_lane_width", self.lane.nominal_lane_width)?;

        let t = &self.tracker;
        positive("tracker.gate_threshold_position", t.gate_threshold_position)?;
        positive("tracker.gate_threshold_full", t.gate_threshold_full)?;
        non_negative("tracker.stale_tolerance", t.stale_tolerance)?;
        non_negative("tracker.kf_config.process_noise_std", t.kf_config.process_noise_std)?;
        let tm = &t.track_manager_config;
        if tm.confirm_m == 0 || tm.confirm_m > tm.confirm_n {
            return Err(ConfigError::InvalidConfirmation {
                m: tm.confirm_m,
                n: tm.confirm_n,
            });
        }
        for (name, limit) in [
            ("tracker.miss_limit_tentative", tm.miss_limit_tentative),
            ("tracker.miss_limit_confirmed", tm.miss_limit_confirmed),
        ] {
            if limit == 0 {
                return Err(ConfigError::InvalidParameter {
                    name,
                    requirement: ">= 1",
                    value: 0.0,
                });
            }
        }
        positive("tracker.max_position_variance", tm.max_position_variance)?;
        positive("tracker.init_vel_std", tm.init_vel_std)?;
        for (name, sigma) in [
            ("tracker.vision.sigma_x", t.vision.sigma_x),
            ("tracker.vision.sigma_y", t.vision.sigma_y),
            ("tracker.vision.sigma_v", t.vision.sigma_v),
            ("tracker.radar.sigma_x", t.radar.sigma_x),
            ("tracker.radar.sigma_y", t.radar.sigma_y),
            ("tracker.radar.sigma_vx", t.radar.sigma_vx),
            ("tracker.radar.sigma_vy", t.radar.sigma_vy),
        ] {
            positive(name, sigma)?;
        }
        Ok(())
    }
}
