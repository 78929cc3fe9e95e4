//! `sensor_models`: Detection observation models per sensor modality.

pub mod observation;

pub use observation::{measurement_dim, ObservationModel, RadarObservation, VisionObservation};
