//! `lanefollow_core`: Lane-following decision and control pipeline.
//!
//! # Module layout
//! - [`types`]: Fundamental types (IDs, state vectors, detections, lane polynomials)
//! - [`frames`]: Coordinate normalizer (perception ↔ dynamics convention)
//! - [`lane`]: Lane estimator with fail-safe hold
//! - [`kf`]: Kalman filter (predict / update)
//! - [`gating`]: Mahalanobis gating
//! - [`association`]: Gated bipartite graph, greedy nearest-neighbour assignment
//! - [`track`]: Track struct and status management
//! - [`track_manager`]: Birth / confirmation / deletion logic
//! - [`tracker`]: Full tracking cycle
//! - [`mio`]: Most-important-object selection
//! - [`mpc`]: Adaptive MPC (model, QP, controller)
//! - [`config`]: System configuration and validation
//! - [`error`]: Error taxonomy
//! - [`cycle`]: Per-cycle driver and run context

pub mod association;
pub mod config;
pub mod cycle;
pub mod error;
pub mod frames;
pub mod gating;
pub mod kf;
pub mod lane;
pub mod mio;
pub mod mpc;
pub mod track;
pub mod track_manager;
pub mod tracker;
pub mod types;

pub use config::SystemConfig;
pub use cycle::{CycleContext, CycleInput, CycleOutput, CycleSource, LaneFollowingSystem};
pub use error::{ConfigError, FilterError, SolveError};
pub use lane::{LaneEstimate, LaneEstimator, LaneGeometryEstimate};
pub use mio::{select_mio, Mio, MioMeasurement};
pub use mpc::{ControlMode, ControlOutput, ControllerFault, MpcController};
pub use track::{Track, TrackSnapshot, TrackStatus};
pub use tracker::{Tracker, TrackerConfig, TrackerOutput};
pub use types::{
    Detection, DetectionId, EgoState, LaneBoundaryMeasurement, LanePolynomial, SensorId,
    SensorModality, StateCov, StateVec, TrackId,
};
