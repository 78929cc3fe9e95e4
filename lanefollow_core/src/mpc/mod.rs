//! Adaptive model-predictive controller.
//!
//! - [`model`]: linear prediction model, rebuilt each cycle
//! - [`qp`]: QP problem type, solver trait, OSQP backend
//! - [`controller`]: condensed QP construction, mode switch, fail-safe

pub mod controller;
pub mod model;
pub mod qp;

pub use controller::{
    spacing_velocity, target_velocity, ControlMode, ControlOutput, ControllerFault,
    ControllerInput, MpcController,
};
pub use model::{relinearize, PredictionModel};
pub use qp::{OsqpSolver, QpProblem, QpSolver};
