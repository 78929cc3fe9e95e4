//! Linear prediction model, rebuilt every cycle around the current speed.
//!
//! States x = [vy, r, e1, e2, vx, ax, gap], inputs u = [a_cmd, δ],
//! measured disturbances d = [κ, v_lead].
//!
//! Lateral: dynamic bicycle with lane-relative errors
//!   vy' = a11·vy + a12·r + b1·δ
//!   r'  = a21·vy + a22·r + b2·δ
//!   e1' = vy + v·e2
//!   e2' = r − v·κ
//! Longitudinal: first-order acceleration lag and the gap to the lead
//!   vx' = ax,  ax' = (a_cmd − ax)/τ,  gap' = v_lead − vx
//!
//! Discretised with a zero-order hold through the matrix exponential of the
//! augmented system.

use crate::config::{ControllerConfig, VehicleParams};
use crate::types::{DMat, DVec, EgoState};

pub const NX: usize = 7;
pub const NU: usize = 2;
pub const ND: usize = 2;

pub const VY: usize = 0;
pub const YAW_RATE: usize = 1;
pub const E1: usize = 2;
pub const E2: usize = 3;
pub const VX: usize = 4;
pub const AX: usize = 5;
pub const GAP: usize = 6;

pub const ACCEL: usize = 0;
pub const STEER: usize = 1;

pub const CURVATURE: usize = 0;
pub const LEAD_VELOCITY: usize = 1;

/// Discrete model x⁺ = A·x + B·u + E·d for one sample time.
#[derive(Clone, Debug)]
pub struct PredictionModel {
    pub a: DMat,
    pub b: DMat,
    pub e: DMat,
    /// Speed the lateral dynamics were linearised at (m/s)
    pub linearization_speed: f64,
    /// Steering that holds the vehicle on a path of the given curvature (rad)
    pub steady_state_steering: f64,
}

/// Continuous-time (A, B, E) at speed `v`.
pub fn continuous(params: &VehicleParams, v: f64) -> (DMat, DMat, DMat) {
    let VehicleParams {
        mass: m,
        yaw_inertia: iz,
        lf,
        lr,
        cf,
        cr,
        accel_time_constant: tau,
    } = *params;

    let mut a = DMat::zeros(NX, NX);
    let mut b = DMat::zeros(NX, NU);
    let mut e = DMat::zeros(NX, ND);

    a[(VY, VY)] = -(2.0 * cf + 2.0 * cr) / (m * v);
    a[(VY, YAW_RATE)] = -v - (2.0 * cf * lf - 2.0 * cr * lr) / (m * v);
    a[(YAW_RATE, VY)] = -(2.0 * cf * lf - 2.0 * cr * lr) / (iz * v);
    a[(YAW_RATE, YAW_RATE)] = -(2.0 * cf * lf * lf + 2.0 * cr * lr * lr) / (iz * v);
    a[(E1, VY)] = 1.0;
    a[(E1, E2)] = v;
    a[(E2, YAW_RATE)] = 1.0;
    a[(VX, AX)] = 1.0;
    a[(AX, AX)] = -1.0 / tau;
    a[(GAP, VX)] = -1.0;

    b[(VY, STEER)] = 2.0 * cf / m;
    b[(YAW_RATE, STEER)] = 2.0 * lf * cf / iz;
    b[(AX, ACCEL)] = 1.0 / tau;

    e[(E2, CURVATURE)] = -v;
    e[(GAP, LEAD_VELOCITY)] = 1.0;

    (a, b, e)
}

/// Zero-order-hold discretisation: exp([[A B E]; [0 0 0]]·dt).
pub fn discretize(a: &DMat, b: &DMat, e: &DMat, dt: f64) -> (DMat, DMat, DMat) {
    let n = NX + NU + ND;
    let mut m = DMat::zeros(n, n);
    m.view_mut((0, 0), (NX, NX)).copy_from(a);
    m.view_mut((0, NX), (NX, NU)).copy_from(b);
    m.view_mut((0, NX + NU), (NX, ND)).copy_from(e);
    let phi = (m * dt).exp();
    (
        phi.view((0, 0), (NX, NX)).into_owned(),
        phi.view((0, NX), (NX, NU)).into_owned(),
        phi.view((0, NX + NU), (NX, ND)).into_owned(),
    )
}

/// Steering for steady cornering on curvature κ at speed v, including the
/// understeer gradient.
pub fn steady_state_steering(params: &VehicleParams, v: f64, curvature: f64) -> f64 {
    let wheelbase = params.lf + params.lr;
    let understeer = params.mass / wheelbase
        * (params.lr / (2.0 * params.cf) - params.lf / (2.0 * params.cr));
    curvature * (wheelbase + understeer * v * v)
}

/// Rebuild the discrete model around the ego's current speed.
pub fn relinearize(ego: &EgoState, curvature: f64, config: &ControllerConfig) -> PredictionModel {
    let v = ego.velocity.max(config.min_linearization_speed);
    let (a, b, e) = continuous(&config.vehicle, v);
    let (a, b, e) = discretize(&a, &b, &e, config.sample_time);
    PredictionModel {
        a,
        b,
        e,
        linearization_speed: v,
        steady_state_steering: steady_state_steering(&config.vehicle, v, curvature),
    }
}

/// Initial state vector from ego feedback and lane/MIO measurements.
pub fn initial_state(ego: &EgoState, e1: f64, e2: f64, gap: f64) -> DVec {
    let mut x = DVec::zeros(NX);
    x[YAW_RATE] = ego.yaw_rate;
    x[E1] = e1;
    x[E2] = e2;
    x[VX] = ego.velocity;
    x[AX] = ego.acceleration;
    x[GAP] = gap;
    x
}
