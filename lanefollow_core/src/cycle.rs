//! Per-cycle driver: wires the five components together in a fixed order.
//!
//! normaliser → lane estimator → tracker (+ lane assignment) → MIO selector
//! → controller
//!
//! Cross-cycle state lives in the components themselves (track set, last
//! valid lane estimate, controller warm start). Everything else a caller
//! wants to observe about the run goes through [`CycleContext`].

use crate::{
    config::SystemConfig,
    error::ConfigError,
    frames::CoordinateNormalizer,
    lane::{LaneEstimator, LaneGeometryEstimate},
    mio::{select_mio, MioMeasurement},
    mpc::{ControlOutput, ControllerInput, MpcController, QpSolver},
    track::TrackSnapshot,
    tracker::Tracker,
    types::{Detection, EgoState, LaneBoundaryMeasurement},
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Inputs for one cycle. Lane boundaries and detections are in the
/// perception convention; ego feedback is in the dynamics convention.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CycleInput {
    /// Cycle timestamp (s)
    pub time: f64,
    #[serde(default)]
    pub ego: EgoState,
    /// Live driver-set velocity; the configured default applies when absent
    #[serde(default)]
    pub set_velocity: Option<f64>,
    #[serde(default)]
    pub left_lane: LaneBoundaryMeasurement,
    #[serde(default)]
    pub right_lane: LaneBoundaryMeasurement,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

/// Everything produced in one cycle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CycleOutput {
    pub cycle: u64,
    pub time: f64,
    pub control: ControlOutput,
    pub lane: LaneGeometryEstimate,
    pub mio: Option<MioMeasurement>,
    /// Live tracks, perception convention
    pub tracks: Vec<TrackSnapshot>,
    pub degraded_lane: bool,
    pub degraded_detections: bool,
    /// Cycle took longer than the sample time
    pub timing_overrun: bool,
    pub elapsed_us: u64,
}

/// Explicit run context handed to the driver.
#[derive(Clone, Debug, Default)]
pub struct CycleContext {
    /// Cycles completed so far
    pub cycle: u64,
    /// Set to end the run after the current cycle
    pub stop_requested: bool,
    /// Cycles that raised a controller fault
    pub fault_count: u64,
    /// Cycles that overran the sample time
    pub overrun_count: u64,
}

impl CycleContext {
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }
}

/// Producer of per-cycle inputs, plus the collision stop signal.
pub trait CycleSource {
    fn next_input(&mut self) -> Option<CycleInput>;

    /// True once the collision-detection collaborator reports a collision.
    fn collision_detected(&self) -> bool {
        false
    }
}

/// The full lane-following core.
pub struct LaneFollowingSystem {
    config: SystemConfig,
    normalizer: CoordinateNormalizer,
    lane_estimator: LaneEstimator,
    tracker: Tracker,
    controller: MpcController,
}

impl LaneFollowingSystem {
    /// Validate `config` and build every component. Refuses to start on an
    /// invalid configuration.
    pub fn new(config: SystemConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let controller = MpcController::new(config.controller.clone())?;
        Ok(Self::assemble(config, controller))
    }

    /// Same as [`Self::new`] with an injected QP backend.
    pub fn with_solver(
        config: SystemConfig,
        solver: Box<dyn QpSolver>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let controller = MpcController::with_solver(config.controller.clone(), solver)?;
        Ok(Self::assemble(config, controller))
    }

    fn assemble(config: SystemConfig, controller: MpcController) -> Self {
        let c = &config.controller;
        Self {
            normalizer: CoordinateNormalizer::new(config.frames.clone()),
            lane_estimator: LaneEstimator::new(
                config.lane.clone(),
                c.prediction_horizon,
                c.sample_time,
            ),
            tracker: Tracker::new(config.tracker.clone(), c.sample_time),
            controller,
            config,
        }
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Run one complete cycle.
    pub fn step(&mut self, input: &CycleInput, ctx: &mut CycleContext) -> CycleOutput {
        let start = Instant::now();

        // Perception side → dynamics convention
        let left = self.normalizer.boundary_to_dynamics(&input.left_lane);
        let right = self.normalizer.boundary_to_dynamics(&input.right_lane);
        let detections = self.normalizer.detections_to_dynamics(&input.detections);

        let lane = self.lane_estimator.estimate(&left, &right, &input.ego);

        let tracking = self.tracker.update(&detections, input.time);
        self.tracker.assign_lanes(&lane.geometry);

        let mio = select_mio(self.tracker.tracks(), &lane.geometry).map(|m| m.measurement());

        let set_velocity = input
            .set_velocity
            .unwrap_or(self.config.controller.default_set_velocity);
        let control = self.controller.step(&ControllerInput {
            ego: &input.ego,
            lane: &lane.geometry,
            mio,
            set_velocity,
            degraded: lane.degraded || tracking.degraded,
        });

        let tracks = self
            .tracker
            .tracks()
            .iter()
            .map(|t| {
                let (position, velocity) = self
                    .normalizer
                    .motion_to_perception(t.position(), t.velocity());
                TrackSnapshot {
                    id: t.id,
                    status: t.status,
                    position,
                    velocity,
                    position_std: t.position_std(),
                    age: t.age,
                    in_ego_lane: t.in_ego_lane,
                }
            })
            .collect();

        let elapsed = start.elapsed();
        let timing_overrun = elapsed.as_secs_f64() > self.config.controller.sample_time;
        if timing_overrun {
            ctx.overrun_count += 1;
            warn!(
                cycle = ctx.cycle,
                elapsed_us = elapsed.as_micros() as u64,
                "cycle overran the sample time"
            );
        }
        if control.fault.is_some() {
            ctx.fault_count += 1;
        }
        debug!(
            cycle = ctx.cycle,
            acceleration = control.acceleration,
            steering = control.steering,
            mode = ?control.mode,
            mio = ?mio.map(|m| m.track_id),
            "cycle complete"
        );

        let output = CycleOutput {
            cycle: ctx.cycle,
            time: input.time,
            control,
            lane: lane.geometry,
            mio,
            tracks,
            degraded_lane: lane.degraded,
            degraded_detections: tracking.degraded,
            timing_overrun,
            elapsed_us: elapsed.as_micros() as u64,
        };
        ctx.cycle += 1;
        output
    }

    /// Drive cycles from `source` until it runs dry, a stop is requested or
    /// a collision is reported. Returns the number of cycles run.
    pub fn run<S, F>(&mut self, source: &mut S, ctx: &mut CycleContext, mut sink: F) -> u64
    where
        S: CycleSource,
        F: FnMut(CycleOutput),
    {
        let first = ctx.cycle;
        while !ctx.stop_requested {
            let Some(input) = source.next_input() else {
                break;
            };
            sink(self.step(&input, ctx));
            if source.collision_detected() {
                info!(cycle = ctx.cycle, "collision reported, stopping");
                ctx.request_stop();
            }
        }
        info!(
            cycles = ctx.cycle - first,
            faults = ctx.fault_count,
            overruns = ctx.overrun_count,
            "run finished"
        );
        ctx.cycle - first
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::SolveError,
        mpc::{ControlMode, ControllerFault, QpProblem},
        types::{DVec, DetectionId, LanePolynomial, SensorId, SensorModality, TrackId},
    };
    use approx::assert_abs_diff_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use std::collections::{HashSet, VecDeque};

    const TS: f64 = 0.1;

    fn config() -> SystemConfig {
        let mut cfg = SystemConfig::default();
        cfg.controller.solver.time_budget = 10.0;
        cfg
    }

    fn lane(offset: f64) -> LaneBoundaryMeasurement {
        LaneBoundaryMeasurement {
            polynomial: LanePolynomial {
                lateral_offset: offset,
                ..Default::default()
            },
            valid: true,
            range: [0.0, 80.0],
        }
    }

    fn straight_input(time: f64, v: f64) -> CycleInput {
        CycleInput {
            time,
            ego: EgoState {
                velocity: v,
                ..Default::default()
            },
            set_velocity: Some(v),
            // perception convention: left boundary at +y
            left_lane: lane(1.8),
            right_lane: lane(-1.8),
            detections: Vec::new(),
        }
    }

    fn radar(id: u64, time: f64, x: f64, vx: f64) -> Detection {
        Detection {
            id: DetectionId(id),
            sensor_id: SensorId(1),
            modality: SensorModality::Radar,
            timestamp: time,
            position: [x, 0.0],
            velocity: Some([vx, 0.0]),
        }
    }

    struct ScriptedSource {
        frames: VecDeque<CycleInput>,
        collision_after: Option<usize>,
        served: usize,
    }

    impl CycleSource for ScriptedSource {
        fn next_input(&mut self) -> Option<CycleInput> {
            let next = self.frames.pop_front();
            if next.is_some() {
                self.served += 1;
            }
            next
        }

        fn collision_detected(&self) -> bool {
            self.collision_after.is_some_and(|n| self.served >= n)
        }
    }

    struct FailingSolver;

    impl QpSolver for FailingSolver {
        fn solve(&mut self, _: &QpProblem) -> Result<DVec, SolveError> {
            Err(SolveError::Infeasible)
        }
    }

    #[test]
    fn invalid_config_refuses_to_start() {
        let mut cfg = config();
        cfg.controller.sample_time = -0.1;
        assert!(LaneFollowingSystem::new(cfg).is_err());
    }

    #[test]
    fn cruise_on_straight_empty_road() {
        let mut sys = LaneFollowingSystem::new(config()).unwrap();
        let mut ctx = CycleContext::default();
        for k in 0..5 {
            let out = sys.step(&straight_input(k as f64 * TS, 20.0), &mut ctx);
            assert_eq!(out.control.fault, None);
            assert_eq!(out.control.mode, ControlMode::VelocityTracking);
            assert_abs_diff_eq!(out.control.acceleration, 0.0, epsilon = 1e-3);
            assert_abs_diff_eq!(out.control.steering, 0.0, epsilon = 1e-3);
            assert!(out.mio.is_none());
            assert!(!out.degraded_lane);
        }
        assert_eq!(ctx.cycle, 5);
    }

    #[test]
    fn closing_lead_triggers_spacing_control() {
        let mut sys = LaneFollowingSystem::new(config()).unwrap();
        let mut ctx = CycleContext::default();
        let mut first_mio_cycle = None;
        let mut braking_cycle = None;
        for k in 0..6u64 {
            let t = k as f64 * TS;
            let mut input = straight_input(t, 20.0);
            input.detections = vec![radar(k, t, 25.0 - 5.0 * t, -5.0)];
            let out = sys.step(&input, &mut ctx);
            if out.mio.is_some() && first_mio_cycle.is_none() {
                first_mio_cycle = Some(k);
            }
            if out.control.mode == ControlMode::SpacingControl
                && out.control.acceleration < 0.0
                && out.control.fault.is_none()
            {
                braking_cycle.get_or_insert(k);
            }
        }
        let first = first_mio_cycle.expect("lead must become the MIO");
        let brake = braking_cycle.expect("spacing control must brake");
        assert!(brake <= first + 1);
    }

    #[test]
    fn short_lived_detection_never_becomes_mio() {
        let mut sys = LaneFollowingSystem::new(config()).unwrap();
        let mut ctx = CycleContext::default();
        for k in 0..8u64 {
            let t = k as f64 * TS;
            let mut input = straight_input(t, 20.0);
            if k < 2 {
                input.detections = vec![radar(k, t, 30.0, 0.0)];
            }
            let out = sys.step(&input, &mut ctx);
            assert!(out.mio.is_none());
            assert!(out
                .tracks
                .iter()
                .all(|t| t.status != crate::track::TrackStatus::Confirmed));
        }
        assert!(sys.tracker().tracks().is_empty());
    }

    #[test]
    fn solver_failure_applies_fail_safe_and_counts_fault() {
        let mut sys = LaneFollowingSystem::with_solver(config(), Box::new(FailingSolver)).unwrap();
        let mut ctx = CycleContext::default();
        let mut input = straight_input(0.0, 20.0);
        input.ego.acceleration = 1.0;
        let out = sys.step(&input, &mut ctx);
        assert_eq!(out.control.fault, Some(ControllerFault::Infeasible));
        // default ramp 5 m/s³ over 0.1 s
        assert_abs_diff_eq!(out.control.acceleration, 0.5, epsilon = 1e-12);
        assert_eq!(ctx.fault_count, 1);
    }

    #[test]
    fn invalid_lanes_hold_identical_estimate() {
        let mut sys = LaneFollowingSystem::new(config()).unwrap();
        let mut ctx = CycleContext::default();
        let mut input = straight_input(0.0, 20.0);
        input.left_lane = lane(1.5);
        input.right_lane = lane(-2.1);
        let good = sys.step(&input, &mut ctx);

        input.left_lane = LaneBoundaryMeasurement::invalid();
        input.right_lane = LaneBoundaryMeasurement::invalid();
        let a = sys.step(&input, &mut ctx);
        let b = sys.step(&input, &mut ctx);
        assert!(a.degraded_lane && b.degraded_lane);
        assert!(a.control.degraded);
        assert_eq!(a.lane, b.lane);
        assert_eq!(a.lane, good.lane);
    }

    #[test]
    fn commands_stay_within_actuator_limits() {
        let cfg = config();
        let limits = cfg.controller.limits.clone();
        let mut sys = LaneFollowingSystem::new(cfg).unwrap();
        let mut ctx = CycleContext::default();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut next_det = 0u64;
        let mut faults = 0;
        let mut clean_spacing_cycles = 0;
        for k in 0..60 {
            let t = k as f64 * TS;
            let v = rng.gen_range(0.0..35.0);
            let mut input = straight_input(t, v);
            input.ego.yaw_rate = rng.gen_range(-0.2..0.2);
            input.set_velocity = Some(rng.gen_range(0.0..35.0));
            input.left_lane.polynomial.lateral_offset = rng.gen_range(0.5..3.5);
            input.left_lane.polynomial.heading = rng.gen_range(-0.1..0.1);
            input.left_lane.polynomial.curvature = rng.gen_range(-0.01..0.01);
            input.right_lane = input.left_lane;
            input.right_lane.polynomial.lateral_offset -= 3.6;
            input.right_lane.valid = rng.gen_bool(0.8);
            // steady lead 30 m ahead, plus clutter
            input.detections.push(radar(10_000 + k, t, 30.0, 0.0));
            for _ in 0..rng.gen_range(0..4) {
                input.detections.push(radar(
                    next_det,
                    t,
                    rng.gen_range(5.0..80.0),
                    rng.gen_range(-15.0..5.0),
                ));
                next_det += 1;
            }
            let out = sys.step(&input, &mut ctx);
            let c = &out.control;
            assert!(c.acceleration >= limits.accel_min && c.acceleration <= limits.accel_max);
            assert!(c.steering.abs() <= limits.steering_max);
            if c.fault.is_some() {
                faults += 1;
            } else if c.mode == ControlMode::SpacingControl {
                clean_spacing_cycles += 1;
                let d_min = sys.config().controller.spacing.min_standoff;
                assert!(c.predicted_gap.iter().all(|&g| g >= d_min - 1e-2));
            }
        }
        assert!(faults <= 3, "{faults} faulted cycles");
        assert!(clean_spacing_cycles > 0);
    }

    #[test]
    fn confirmed_tracks_bounded_and_ids_never_reused() {
        let mut sys = LaneFollowingSystem::new(config()).unwrap();
        let mut ctx = CycleContext::default();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut seen_detections = HashSet::new();
        let mut alive: HashSet<TrackId> = HashSet::new();
        let mut retired: HashSet<TrackId> = HashSet::new();
        for k in 0..40u64 {
            let t = k as f64 * TS;
            let mut input = straight_input(t, 20.0);
            for j in 0..rng.gen_range(0..3u64) {
                let id = k * 10 + j;
                seen_detections.insert(id);
                input.detections.push(radar(id, t, rng.gen_range(10.0..60.0), 0.0));
            }
            let out = sys.step(&input, &mut ctx);
            let confirmed = out
                .tracks
                .iter()
                .filter(|t| t.status == crate::track::TrackStatus::Confirmed)
                .count();
            assert!(confirmed <= seen_detections.len());

            let current: HashSet<TrackId> = out.tracks.iter().map(|t| t.id).collect();
            assert!(current.is_disjoint(&retired), "track id reused");
            retired.extend(alive.difference(&current).copied());
            alive = current;
        }
    }

    #[test]
    fn run_stops_cleanly_on_collision() {
        let mut sys = LaneFollowingSystem::new(config()).unwrap();
        let mut ctx = CycleContext::default();
        let mut source = ScriptedSource {
            frames: (0..10).map(|k| straight_input(k as f64 * TS, 20.0)).collect(),
            collision_after: Some(4),
            served: 0,
        };
        let mut outputs = Vec::new();
        let cycles = sys.run(&mut source, &mut ctx, |o| outputs.push(o));
        assert_eq!(cycles, 4);
        assert_eq!(outputs.len(), 4);
        assert!(ctx.stop_requested);
        assert_eq!(source.frames.len(), 6);
    }

    #[test]
    fn run_drains_source_without_collision() {
        let mut sys = LaneFollowingSystem::new(config()).unwrap();
        let mut ctx = CycleContext::default();
        let mut source = ScriptedSource {
            frames: (0..3).map(|k| straight_input(k as f64 * TS, 20.0)).collect(),
            collision_after: None,
            served: 0,
        };
        let cycles = sys.run(&mut source, &mut ctx, |_| {});
        assert_eq!(cycles, 3);
        assert!(!ctx.stop_requested);
    }
}
