//! Sensor fusion tracker: the full track-update cycle for one detection batch.
//!
//! # Processing steps per cycle
//! 1. Discard stale detections; flag degraded detections if none are left
//! 2. Predict all live tracks forward by one sample time
//! 3. For each track × detection: gate check (Mahalanobis)
//! 4. Build sparse bipartite graph from gate-passing pairs
//! 5. Greedy global-nearest-neighbour assignment
//! 6. Update matched tracks (KF update), register hits
//! 7. Register misses for unmatched tracks
//! 8. Delete diverged tracks
//! 9. Birth tentative tracks for unmatched detections
//! 10. Prune deleted tracks

use crate::{
    association::{greedy_assign, BipartiteGraph},
    gating::{mahalanobis_gate, CHI2_99},
    kf::{CvKalmanFilter, CvKfConfig, KalmanFilter},
    lane::LaneGeometryEstimate,
    track::{DeletionReason, Track, TrackStatus},
    track_manager::{TrackManager, TrackManagerConfig},
    types::{DMat, Detection, DetectionId, SensorModality, TrackId},
};
use sensor_models::{ObservationModel, RadarObservation, VisionObservation};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Configuration for the tracker.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Gate threshold (χ²) for position-only detections
    pub gate_threshold_position: f64,
    /// Gate threshold (χ²) for position+velocity detections
    pub gate_threshold_full: f64,
    /// Motion model
    pub kf_config: CvKfConfig,
    /// Track management policy
    pub track_manager_config: TrackManagerConfig,
    /// Camera detection noise
    pub vision: VisionObservation,
    /// Radar detection noise
    pub radar: RadarObservation,
    /// Detections older than this relative to the cycle time are dropped (s)
    pub stale_tolerance: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            gate_threshold_position: CHI2_99[2],
            gate_threshold_full: CHI2_99[4],
            kf_config: CvKfConfig::default(),
            track_manager_config: TrackManagerConfig::default(),
            vision: VisionObservation::default(),
            radar: RadarObservation::default(),
            stale_tolerance: 0.2,
        }
    }
}

/// Summary of one tracker cycle.
#[derive(Clone, Debug, Default, Serialize)]
pub struct TrackerOutput {
    /// Tracks born this cycle
    pub births: Vec<TrackId>,
    /// Tracks confirmed this cycle
    pub confirmations: Vec<TrackId>,
    /// Tracks removed this cycle
    pub deletions: Vec<(TrackId, DeletionReason)>,
    /// Accepted (track, detection) pairs
    pub assignments: Vec<(TrackId, DetectionId)>,
    /// Detections dropped as stale
    pub stale: usize,
    /// No usable detection this cycle
    pub degraded: bool,
    /// Wall-clock time of processing
    pub total_time_us: u64,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Holds the track set, the filter and the lifecycle policy.
pub struct Tracker {
    pub config: TrackerConfig,
    tracks: Vec<Track>,
    track_manager: TrackManager,
    kf: CvKalmanFilter,
    sample_time: f64,
}

impl Tracker {
    pub fn new(config: TrackerConfig, sample_time: f64) -> Self {
        let kf = CvKalmanFilter::new(config.kf_config.clone());
        let track_manager = TrackManager::new(config.track_manager_config.clone());
        Self {
            config,
            tracks: Vec::new(),
            track_manager,
            kf,
            sample_time,
        }
    }

    /// H, R and gate threshold for one detection.
    fn observation(&self, det: &Detection) -> (DMat, DMat, f64) {
        let with_velocity = det.has_velocity();
        let model: &dyn ObservationModel = match det.modality {
            SensorModality::Vision => &self.config.vision,
            SensorModality::Radar => &self.config.radar,
        };
        let gate = if with_velocity {
            self.config.gate_threshold_full
        } else {
            self.config.gate_threshold_position
        };
        (model.h_matrix(with_velocity), model.r_matrix(with_velocity), gate)
    }

    /// Run one full tracking cycle at time `now`.
    pub fn update(&mut self, detections: &[Detection], now: f64) -> TrackerOutput {
        let start_total = Instant::now();
        let mut out = TrackerOutput::default();

        // ----------------------------------------------------------------
        // Step 1: Stale filter
        // ----------------------------------------------------------------
        let fresh: Vec<&Detection> = detections
            .iter()
            .filter(|d| now - d.timestamp <= self.config.stale_tolerance)
            .collect();
        out.stale = detections.len() - fresh.len();
        out.degraded = fresh.is_empty();
        if out.stale > 0 {
            debug!(stale = out.stale, "dropped stale detections");
        }
        if out.degraded {
            warn!(
                received = detections.len(),
                "no usable detections this cycle, coasting tracks"
            );
        }

        // ----------------------------------------------------------------
        // Step 2: Predict
        // ----------------------------------------------------------------
        for track in &mut self.tracks {
            let (state, cov) = self.kf.predict(&track.state, &track.cov, self.sample_time);
            track.state = state;
            track.cov = cov;
            track.age += 1;
        }

        // ----------------------------------------------------------------
        // Step 3-4: Gating + bipartite graph
        // ----------------------------------------------------------------
        let observations: Vec<_> = fresh.iter().map(|d| self.observation(d)).collect();
        let mut graph = BipartiteGraph::new(self.tracks.len(), fresh.len());
        for (ti, track) in self.tracks.iter().enumerate() {
            for (mi, det) in fresh.iter().enumerate() {
                let (h, r, threshold) = &observations[mi];
                let gate =
                    mahalanobis_gate(&track.state, &track.cov, &det.observation(), h, r, *threshold);
                if gate.passes {
                    graph.add_edge(ti, mi, gate.d2);
                }
            }
        }

        // ----------------------------------------------------------------
        // Step 5: Assignment
        // ----------------------------------------------------------------
        let assignment = greedy_assign(&graph);
        let mut missed_tracks = assignment.unmatched_tracks;
        let mut unmatched_meas = assignment.unmatched_meas;

        // ----------------------------------------------------------------
        // Step 6: KF update for matched pairs
        // ----------------------------------------------------------------
        for &(ti, mi) in &assignment.pairs {
            let det = fresh[mi];
            let (h, r, _) = &observations[mi];
            let track = &mut self.tracks[ti];
            match self
                .kf
                .update(&track.state, &track.cov, &det.observation(), h, r)
            {
                Ok(res) => {
                    track.state = res.state;
                    track.cov = res.cov;
                    track.last_updated = now;
                    out.assignments.push((track.id, det.id));
                    if self.track_manager.register_hit(track) {
                        debug!(track = %track.id, "track confirmed");
                        out.confirmations.push(track.id);
                    }
                }
                Err(e) => {
                    warn!(track = %track.id, detection = %det.id, error = %e, "update failed, treating as miss");
                    missed_tracks.push(ti);
                    unmatched_meas.push(mi);
                }
            }
        }

        // ----------------------------------------------------------------
        // Step 7-8: Misses and divergence
        // ----------------------------------------------------------------
        for &ti in &missed_tracks {
            self.track_manager.register_miss(&mut self.tracks[ti]);
        }
        for track in &mut self.tracks {
            if self.track_manager.check_divergence(track) {
                debug!(track = %track.id, "track diverged");
            }
        }

        // ----------------------------------------------------------------
        // Step 9: Birth tentative tracks for unmatched detections
        // ----------------------------------------------------------------
        unmatched_meas.sort_unstable();
        for mi in unmatched_meas {
            let (_, r, _) = &observations[mi];
            let track = self.track_manager.birth_track(fresh[mi], r, now);
            debug!(track = %track.id, detection = %fresh[mi].id, "track born");
            out.births.push(track.id);
            if track.status == TrackStatus::Confirmed {
                out.confirmations.push(track.id);
            }
            self.tracks.push(track);
        }

        // ----------------------------------------------------------------
        // Step 10: Prune deleted tracks
        // ----------------------------------------------------------------
        for t in TrackManager::prune_deleted(&mut self.tracks) {
            let reason = t.deletion_reason.unwrap_or(DeletionReason::Misses);
            debug!(track = %t.id, ?reason, "track deleted");
            out.deletions.push((t.id, reason));
        }

        out.total_time_us = start_total.elapsed().as_micros() as u64;
        out
    }

    /// Stamp the ego-lane flag on every track from the current lane estimate.
    pub fn assign_lanes(&mut self, lane: &LaneGeometryEstimate) {
        for track in &mut self.tracks {
            let [x, y] = track.position();
            track.in_ego_lane = lane.contains(x, y);
        }
    }

    /// All live tracks (tentative and confirmed).
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn confirmed(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(|t| t.is_confirmed())
    }

    /// Clear all tracks. The identifier counter keeps running.
    pub fn reset(&mut self) {
        self.tracks.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
