//! Track lifecycle management: birth, M-of-N confirmation, deletion.
//!
//! # Track Management Policy
//! - **Birth**: each unmatched detection spawns a tentative track.
//! - **Confirmation**: a tentative track is confirmed after M hits in the
//!   last N cycles (birth counts as a hit). Default: M=3, N=5.
//! - **Deletion**: a track is deleted once its consecutive misses reach the
//!   limit for its status, or once its position variance exceeds the bound.

use crate::{
    track::{DeletionReason, Track, TrackStatus},
    types::{DMat, Detection, StateCov, StateVec, TrackId},
};
use nalgebra::Vector4;
use serde::{Deserialize, Serialize};

/// Configuration for track management policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackManagerConfig {
    /// Hits required for confirmation
    pub confirm_m: usize,
    /// Window for M-of-N rule
    pub confirm_n: usize,
    /// Consecutive misses that delete a confirmed track
    pub miss_limit_confirmed: u32,
    /// Consecutive misses that delete a tentative track
    pub miss_limit_tentative: u32,
    /// Position variance (m²) beyond which a track is considered diverged
    pub max_position_variance: f64,
    /// Initial velocity uncertainty when the detection carries none (1σ, m/s)
    pub init_vel_std: f64,
}

impl Default for TrackManagerConfig {
    fn default() -> Self {
        Self {
            confirm_m: 3,
            confirm_n: 5,
            miss_limit_confirmed: 5,
            miss_limit_tentative: 2,
            max_position_variance: 100.0,
            init_vel_std: 10.0,
        }
    }
}

/// Owns the track-id counter and applies the lifecycle policy.
pub struct TrackManager {
    pub config: TrackManagerConfig,
    next_id: u64,
}

impl TrackManager {
    pub fn new(config: TrackManagerConfig) -> Self {
        Self { config, next_id: 0 }
    }

    /// Identifiers are handed out monotonically and never recycled.
    fn next_track_id(&mut self) -> TrackId {
        let id = TrackId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Create a new tentative track from an unmatched detection.
    /// `r` is the detection's measurement noise (2×2 or 4×4).
    pub fn birth_track(&mut self, det: &Detection, r: &DMat, current_time: f64) -> Track {
        let id = self.next_track_id();
        let [vx, vy] = det.velocity.unwrap_or([0.0, 0.0]);
        let state = StateVec::new(det.position[0], det.position[1], vx, vy);

        let vel_var = self.config.init_vel_std * self.config.init_vel_std;
        let (vvx, vvy) = if r.nrows() == 4 {
            (r[(2, 2)], r[(3, 3)])
        } else {
            (vel_var, vel_var)
        };
        let cov = StateCov::from_diagonal(&Vector4::new(r[(0, 0)], r[(1, 1)], vvx, vvy));

        let mut track = Track::new(id, state, cov, current_time);
        if self.config.confirm_m <= 1 {
            track.status = TrackStatus::Confirmed;
        }
        track
    }

    /// Call after a track received an update (hit). Returns true if the
    /// track was confirmed by this hit.
    pub fn register_hit(&self, track: &mut Track) -> bool {
        track.misses = 0;
        track.total_hits += 1;
        track.record(true, self.config.confirm_n);
        if track.status == TrackStatus::Tentative && track.window_hits() >= self.config.confirm_m
        {
            track.status = TrackStatus::Confirmed;
            return true;
        }
        false
    }

    /// Call after a track received no update (miss).
    pub fn register_miss(&self, track: &mut Track) {
        track.misses += 1;
        track.record(false, self.config.confirm_n);
        let limit = match track.status {
            TrackStatus::Tentative => self.config.miss_limit_tentative,
            TrackStatus::Confirmed => self.config.miss_limit_confirmed,
            TrackStatus::Deleted => return,
        };
        if track.misses >= limit {
            track.mark_deleted(DeletionReason::Misses);
        }
    }

    /// Delete the track if its position uncertainty exceeds the bound.
    pub fn check_divergence(&self, track: &mut Track) -> bool {
        if track.status == TrackStatus::Deleted {
            return false;
        }
        let worst = track.cov[(0, 0)].max(track.cov[(1, 1)]);
        if !worst.is_finite() || worst > self.config.max_position_variance {
            track.mark_deleted(DeletionReason::Divergence);
            return true;
        }
        false
    }

    /// Remove all deleted tracks. Returns the removed tracks.
    pub fn prune_deleted(tracks: &mut Vec<Track>) -> Vec<Track> {
        let (deleted, alive): (Vec<Track>, Vec<Track>) = tracks
            .drain(..)
            .partition(|t| t.status == TrackStatus::Deleted);
        *tracks = alive;
        deleted
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
