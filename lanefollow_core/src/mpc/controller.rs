//! Adaptive MPC: builds the condensed QP each cycle and applies the first move.
//!
//! # Decision vector
//! z = [u_0, …, u_{nc−1}, ε], u_j = [a_cmd, δ]. Moves after the control
//! horizon repeat u_{nc−1}. ε ≥ 0 softens the time-gap spacing rows
//! gap_k − t_gap·vx_k + ε ≥ d_min.
//!
//! # Prediction
//! X_k = F_k + G_k·U with F_k = A·F_{k−1} + E·d_{k−1} and
//! G_k = A·G_{k−1} + B placed at the block of move min(k−1, nc−1).

use super::model::{
    self, PredictionModel, ACCEL, CURVATURE, E1, E2, GAP, LEAD_VELOCITY, ND, NU, NX, STEER, VX,
};
use super::qp::{OsqpSolver, QpProblem, QpSolver};
use crate::config::{ControllerConfig, FailSafePolicy};
use crate::error::{ConfigError, SolveError};
use crate::lane::LaneGeometryEstimate;
use crate::mio::MioMeasurement;
use crate::types::{DMat, DVec, EgoState};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Tolerance on the hard spacing check (m).
const SPACING_TOLERANCE: f64 = 1e-2;

/// Which target velocity is binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    VelocityTracking,
    SpacingControl,
}

/// Raised for the external monitoring collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerFault {
    /// QP has no feasible point
    Infeasible,
    /// QP did not converge within the iteration or time budget
    Timeout,
    /// Predicted gap fell below the minimum standoff
    SpacingViolation,
    /// Any other solver failure
    SolverError,
}

impl From<&SolveError> for ControllerFault {
    fn from(e: &SolveError) -> Self {
        match e {
            SolveError::Infeasible => ControllerFault::Infeasible,
            SolveError::MaxIterations { .. } | SolveError::Timeout { .. } => {
                ControllerFault::Timeout
            }
            SolveError::Setup(_) | SolveError::Other(_) => ControllerFault::SolverError,
        }
    }
}

/// Everything the controller reads in one cycle.
#[derive(Clone, Debug)]
pub struct ControllerInput<'a> {
    pub ego: &'a EgoState,
    pub lane: &'a LaneGeometryEstimate,
    pub mio: Option<MioMeasurement>,
    /// Driver-set velocity (m/s)
    pub set_velocity: f64,
    /// Perception ran on a fallback this cycle
    pub degraded: bool,
}

/// Command for the actuation collaborator, plus diagnostics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControlOutput {
    /// m/s²
    pub acceleration: f64,
    /// Front wheel angle (rad)
    pub steering: f64,
    pub mode: ControlMode,
    pub fault: Option<ControllerFault>,
    /// Velocity reference the cost tracked this cycle (m/s)
    pub target_velocity: f64,
    /// Predicted gap to the MIO over the horizon, empty without an MIO
    pub predicted_gap: Vec<f64>,
    pub degraded: bool,
}

/// Spacing-policy velocity for the current gap and lead speed.
pub fn spacing_velocity(config: &ControllerConfig, ego_velocity: f64, mio: &MioMeasurement) -> f64 {
    let s = &config.spacing;
    let lead_velocity = ego_velocity + mio.relative_velocity;
    let safe_distance = s.min_standoff + s.time_gap * ego_velocity;
    lead_velocity + (mio.distance - safe_distance) / s.time_gap
}

/// Target velocity and mode: the lower of set and spacing velocity binds.
pub fn target_velocity(
    config: &ControllerConfig,
    ego_velocity: f64,
    set_velocity: f64,
    mio: Option<&MioMeasurement>,
) -> (f64, ControlMode) {
    match mio {
        Some(m) if config.spacing.enabled => {
            let v_spacing = spacing_velocity(config, ego_velocity, m);
            if v_spacing < set_velocity {
                (v_spacing.max(0.0), ControlMode::SpacingControl)
            } else {
                (set_velocity, ControlMode::VelocityTracking)
            }
        }
        _ => (set_velocity, ControlMode::VelocityTracking),
    }
}

/// Condensed prediction: rows of F (NX per step) and G (NX × NU·nc per step).
struct Prediction {
    f: Vec<DVec>,
    g: Vec<DMat>,
}

impl Prediction {
    fn build(
        model: &PredictionModel,
        x0: &DVec,
        disturbances: &[DVec],
        control_horizon: usize,
    ) -> Self {
        let nv = NU * control_horizon;
        let mut f = Vec::with_capacity(disturbances.len());
        let mut g = Vec::with_capacity(disturbances.len());
        let mut f_prev = x0.clone();
        let mut g_prev = DMat::zeros(NX, nv);
        for (k, d) in disturbances.iter().enumerate() {
            let f_k = &model.a * &f_prev + &model.e * d;
            let mut g_k = &model.a * &g_prev;
            let block = k.min(control_horizon - 1) * NU;
            let mut col = g_k.view_mut((0, block), (NX, NU));
            col += &model.b;
            f.push(f_k.clone());
            g.push(g_k.clone());
            f_prev = f_k;
            g_prev = g_k;
        }
        Self { f, g }
    }

    /// Predicted value of state `s` at every step for inputs `u`.
    fn trajectory(&self, s: usize, u: &DVec) -> Vec<f64> {
        self.f
            .iter()
            .zip(&self.g)
            .map(|(f, g)| f[s] + g.row(s).dot(&u.transpose()))
            .collect()
    }
}

/// Receding-horizon controller with retained warm-start state.
pub struct MpcController {
    config: ControllerConfig,
    solver: Box<dyn QpSolver>,
    previous: Option<[f64; 2]>,
    last_solution: Option<DVec>,
}

impl MpcController {
    /// Controller on the OSQP backend. Rejects an invalid configuration.
    pub fn new(config: ControllerConfig) -> Result<Self, ConfigError> {
        let solver = Box::new(OsqpSolver::new(config.solver.clone()));
        Self::with_solver(config, solver)
    }

    /// Controller driven by an injected QP backend.
    pub fn with_solver(
        config: ControllerConfig,
        solver: Box<dyn QpSolver>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            solver,
            previous: None,
            last_solution: None,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Compute this cycle's command.
    pub fn step(&mut self, input: &ControllerInput) -> ControlOutput {
        let cfg = &self.config;
        let p = cfg.prediction_horizon;
        let nc = cfg.control_horizon;
        let ego = input.ego;
        let previous = self
            .previous
            .unwrap_or([ego.acceleration, ego.steering_angle]);

        let (v_ref, mode) =
            target_velocity(cfg, ego.velocity, input.set_velocity, input.mio.as_ref());
        if input.degraded {
            warn!("controller running on degraded perception");
        }

        let preview = curvature_preview(&input.lane.curvature_preview, p);
        let model = model::relinearize(ego, preview[0], cfg);

        let lead_velocity = input
            .mio
            .map(|m| ego.velocity + m.relative_velocity)
            .unwrap_or(ego.velocity);
        let gap0 = input.mio.map(|m| m.distance).unwrap_or(0.0);
        let x0 = model::initial_state(
            ego,
            input.lane.lateral_deviation,
            input.lane.relative_yaw,
            gap0,
        );
        let disturbances: Vec<DVec> = preview
            .iter()
            .map(|&kappa| {
                let mut d = DVec::zeros(ND);
                d[CURVATURE] = kappa;
                d[LEAD_VELOCITY] = lead_velocity;
                d
            })
            .collect();
        let prediction = Prediction::build(&model, &x0, &disturbances, nc);

        // Spacing rows and the hard standoff check only apply with the policy on.
        let with_spacing = input.mio.is_some() && cfg.spacing.enabled;
        let problem = self.build_qp(
            &prediction,
            v_ref,
            model.steady_state_steering,
            previous,
            with_spacing,
        );

        let solution = match self.solver.solve(&problem) {
            Ok(z) => z,
            Err(e) => {
                let fault = ControllerFault::from(&e);
                warn!(error = %e, ?fault, "qp solve failed, applying fail-safe");
                let [acceleration, steering] = self.fail_safe(previous);
                self.previous = Some([acceleration, steering]);
                self.last_solution = None;
                return ControlOutput {
                    acceleration,
                    steering,
                    mode,
                    fault: Some(fault),
                    target_velocity: v_ref,
                    predicted_gap: Vec::new(),
                    degraded: input.degraded,
                };
            }
        };

        let u = solution.rows(0, NU * nc).into_owned();
        let mut acceleration = self.config.limits.clamp_acceleration(u[ACCEL]);
        let steering = self.config.limits.clamp_steering(u[STEER]);
        let mut fault = None;

        let predicted_gap = if input.mio.is_some() {
            prediction.trajectory(GAP, &u)
        } else {
            Vec::new()
        };
        let d_min = self.config.spacing.min_standoff;
        let worst_gap = predicted_gap.iter().copied().reduce(f64::min);
        if let Some(worst) = worst_gap.filter(|_| with_spacing) {
            if worst < d_min - SPACING_TOLERANCE {
                warn!(
                    predicted_gap = worst,
                    min_standoff = d_min,
                    "spacing violation, maximum deceleration"
                );
                acceleration = self.config.limits.accel_min;
                fault = Some(ControllerFault::SpacingViolation);
            }
        }

        debug!(
            acceleration,
            steering,
            ?mode,
            target_velocity = v_ref,
            "mpc step"
        );
        self.previous = Some([acceleration, steering]);
        self.last_solution = Some(solution);
        ControlOutput {
            acceleration,
            steering,
            mode,
            fault,
            target_velocity: v_ref,
            predicted_gap,
            degraded: input.degraded,
        }
    }

    /// Fail-safe command from the previous one.
    fn fail_safe(&self, previous: [f64; 2]) -> [f64; 2] {
        let limits = &self.config.limits;
        let [prev_accel, prev_steer] = previous;
        let acceleration = match self.config.fail_safe {
            FailSafePolicy::HoldPrevious => prev_accel,
            FailSafePolicy::DecelerationRamp { ramp_rate } => {
                (prev_accel - ramp_rate * self.config.sample_time).max(limits.accel_min)
            }
        };
        [
            limits.clamp_acceleration(acceleration),
            limits.clamp_steering(prev_steer),
        ]
    }

    /// Last solution shifted one move ahead, or a feed-forward seed.
    fn warm_start(&self, n_vars: usize, seed: [f64; 2]) -> DVec {
        let nc = self.config.control_horizon;
        let mut z = DVec::zeros(n_vars);
        match &self.last_solution {
            Some(last) if last.len() == n_vars => {
                for j in 0..nc {
                    let src = (j + 1).min(nc - 1) * NU;
                    z[j * NU + ACCEL] = last[src + ACCEL];
                    z[j * NU + STEER] = last[src + STEER];
                }
            }
            _ => {
                for j in 0..nc {
                    z[j * NU + ACCEL] = seed[ACCEL];
                    z[j * NU + STEER] = seed[STEER];
                }
            }
        }
        z
    }

    fn build_qp(
        &self,
        prediction: &Prediction,
        v_ref: f64,
        steer_ff: f64,
        previous: [f64; 2],
        with_spacing: bool,
    ) -> QpProblem {
        let cfg = &self.config;
        let w = &cfg.weights;
        let nc = cfg.control_horizon;
        let nv = NU * nc;
        let slack = nv;
        let n = nv + 1;

        let mut p = DMat::zeros(n, n);
        let mut q = DVec::zeros(n);

        // Tracking: Σ w·(g·U + f − r)²
        for (f, g) in prediction.f.iter().zip(&prediction.g) {
            for (s, weight, reference) in [
                (E1, w.lateral_deviation, 0.0),
                (E2, w.relative_yaw, 0.0),
                (VX, w.velocity, v_ref),
            ] {
                let row = g.row(s);
                let residual = f[s] - reference;
                let mut block = p.view_mut((0, 0), (nv, nv));
                block += row.transpose() * row * (2.0 * weight);
                let mut lin = q.rows_mut(0, nv);
                lin += row.transpose() * (2.0 * weight * residual);
            }
        }

        // Effort about the feed-forward point, and move rates.
        for j in 0..nc {
            let ia = j * NU + ACCEL;
            let is = j * NU + STEER;
            p[(ia, ia)] += 2.0 * w.acceleration;
            p[(is, is)] += 2.0 * w.steering;
            q[is] -= 2.0 * w.steering * steer_ff;

            for (idx, rate) in [(ia, w.acceleration_rate), (is, w.steering_rate)] {
                p[(idx, idx)] += 2.0 * rate;
                if j == 0 {
                    let prev = if idx == ia { previous[ACCEL] } else { previous[STEER] };
                    q[idx] -= 2.0 * rate * prev;
                } else {
                    let before = idx - NU;
                    p[(before, before)] += 2.0 * rate;
                    p[(idx, before)] -= 2.0 * rate;
                    p[(before, idx)] -= 2.0 * rate;
                }
            }
        }

        p[(slack, slack)] += 2.0 * w.spacing_slack;
        q[slack] += w.spacing_slack_linear;

        // Constraints: input bounds, slack ≥ 0, then spacing rows.
        let spacing_rows = if with_spacing { prediction.f.len() } else { 0 };
        let m = nv + 1 + spacing_rows;
        let mut a = DMat::zeros(m, n);
        let mut l = DVec::zeros(m);
        let mut u = DVec::zeros(m);
        let limits = &cfg.limits;
        for j in 0..nc {
            let ia = j * NU + ACCEL;
            let is = j * NU + STEER;
            a[(ia, ia)] = 1.0;
            l[ia] = limits.accel_min;
            u[ia] = limits.accel_max;
            a[(is, is)] = 1.0;
            l[is] = -limits.steering_max;
            u[is] = limits.steering_max;
        }
        a[(nv, slack)] = 1.0;
        l[nv] = 0.0;
        u[nv] = f64::INFINITY;

        if with_spacing {
            let t_gap = cfg.spacing.time_gap;
            let d_min = cfg.spacing.min_standoff;
            for (k, (f, g)) in prediction.f.iter().zip(&prediction.g).enumerate() {
                let r = nv + 1 + k;
                let coeffs = g.row(GAP) - g.row(VX) * t_gap;
                a.view_mut((r, 0), (1, nv)).copy_from(&coeffs);
                a[(r, slack)] = 1.0;
                l[r] = d_min - (f[GAP] - t_gap * f[VX]);
                u[r] = f64::INFINITY;
            }
        }

        let warm_start = Some(self.warm_start(n, [previous[ACCEL], steer_ff]));
        QpProblem {
            p,
            q,
            a,
            l,
            u,
            warm_start,
        }
    }
}

/// Preview of exactly `horizon` values, holding the last one (or zero).
fn curvature_preview(preview: &[f64], horizon: usize) -> Vec<f64> {
    let last = preview.last().copied().unwrap_or(0.0);
    (0..horizon)
        .map(|k| preview.get(k).copied().unwrap_or(last))
        .collect()
}
