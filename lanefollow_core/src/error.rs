//! Error taxonomy of the core.
//!
//! Only [`ConfigError`] is fatal. Filter and solver errors are recovered inside
//! the component that hits them; solver errors surface to collaborators as a
//! [`crate::mpc::ControllerFault`] on the cycle's output.

use std::time::Duration;
use thiserror::Error;

/// Configuration rejected at initialisation. The core refuses to start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("sample time must be finite and positive, got {0}")]
    NonPositiveSampleTime(f64),
    #[error("invalid horizons: prediction {prediction}, control {control}")]
    InvalidHorizon { prediction: usize, control: usize },
    #[error("{name} limits inverted or not bracketing zero: min {min}, max {max}")]
    InvertedLimits {
        name: &'static str,
        min: f64,
        max: f64,
    },
    #[error("{name} must be {requirement}, got {value}")]
    InvalidParameter {
        name: &'static str,
        requirement: &'static str,
        value: f64,
    },
    #[error("confirmation rule needs 1 <= M <= N, got M={m} N={n}")]
    InvalidConfirmation { m: usize, n: usize },
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Numerical failure in a Kalman filter step.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FilterError {
    #[error("innovation covariance is singular")]
    SingularInnovation,
    #[error("dimension mismatch: z has {z} rows, H has {h}")]
    DimensionMismatch { z: usize, h: usize },
}

/// Failure of one QP solve.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolveError {
    #[error("solver setup failed: {0}")]
    Setup(String),
    #[error("problem is infeasible")]
    Infeasible,
    #[error("solver did not converge within {iterations} iterations")]
    MaxIterations { iterations: u32 },
    #[error("solve took {elapsed:?}, budget {budget:?}")]
    Timeout { elapsed: Duration, budget: Duration },
    #[error("solver failed: {0}")]
    Other(String),
}
