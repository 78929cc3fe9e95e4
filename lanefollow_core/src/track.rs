//! Track: state, covariance, status and hit/miss history.

use crate::types::{StateCov, StateVec, TrackId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Lifecycle status of a track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    /// Not yet confirmed, may be spurious
    Tentative,
    /// Confirmed: seen M times out of last N cycles
    Confirmed,
    /// Marked for removal at the end of the cycle
    Deleted,
}

/// Why a track was removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionReason {
    /// Too many consecutive missed associations
    Misses,
    /// Position uncertainty grew past the configured bound
    Divergence,
}

/// A single tracked object.
#[derive(Clone, Debug)]
pub struct Track {
    /// Unique identifier, never reused within a run
    pub id: TrackId,
    /// Estimated state [px, py, vx, vy] relative to the ego vehicle
    pub state: StateVec,
    /// State estimation covariance
    pub cov: StateCov,
    /// Lifecycle status
    pub status: TrackStatus,
    /// Hit (true) / miss (false) outcome of the most recent cycles, newest last
    pub hit_window: VecDeque<bool>,
    /// Consecutive missed update count
    pub misses: u32,
    /// Cycles since birth
    pub age: u32,
    /// Total number of updates including birth
    pub total_hits: u32,
    /// Time of last update
    pub last_updated: f64,
    /// Lies within the ego lane according to the latest lane estimate
    pub in_ego_lane: bool,
    /// Set together with `status = Deleted`
    pub deletion_reason: Option<DeletionReason>,
}

impl Track {
    /// Create a new tentative track. Birth counts as the first hit.
    pub fn new(id: TrackId, state: StateVec, cov: StateCov, birth_time: f64) -> Self {
        let mut hit_window = VecDeque::new();
        hit_window.push_back(true);
        Self {
            id,
            state,
            cov,
            status: TrackStatus::Tentative,
            hit_window,
            misses: 0,
            age: 0,
            total_hits: 1,
            last_updated: birth_time,
            in_ego_lane: false,
            deletion_reason: None,
        }
    }

    /// Record one cycle's outcome, keeping at most `window` entries.
    pub fn record(&mut self, hit: bool, window: usize) {
        self.hit_window.push_back(hit);
        while self.hit_window.len() > window {
            self.hit_window.pop_front();
        }
    }

    /// Hits inside the current window.
    pub fn window_hits(&self) -> usize {
        self.hit_window.iter().filter(|&&h| h).count()
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == TrackStatus::Confirmed
    }

    pub fn mark_deleted(&mut self, reason: DeletionReason) {
        self.status = TrackStatus::Deleted;
        self.deletion_reason = Some(reason);
    }

    pub fn position(&self) -> [f64; 2] {
        [self.state[0], self.state[1]]
    }

    pub fn velocity(&self) -> [f64; 2] {
        [self.state[2], self.state[3]]
    }

    /// Largest 1σ position uncertainty (m)
    pub fn position_std(&self) -> f64 {
        self.cov[(0, 0)].max(self.cov[(1, 1)]).max(0.0).sqrt()
    }
}

/// Read-only view of a track handed to display collaborators
/// (perception convention).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackSnapshot {
    pub id: TrackId,
    pub status: TrackStatus,
    pub position: [f64; 2],
    pub velocity: [f64; 2],
    pub position_std: f64,
    pub age: u32,
    pub in_ego_lane: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_bounded() {
        let mut t = Track::new(TrackId(0), StateVec::zeros(), StateCov::identity(), 0.0);
        for hit in [false, true, true, false, true, true] {
            t.record(hit, 4);
        }
        assert_eq!(t.hit_window.len(), 4);
        assert_eq!(t.window_hits(), 3);
    }

    #[test]
    fn position_std_uses_worst_axis() {
        let mut cov = StateCov::identity();
        cov[(1, 1)] = 9.0;
        let t = Track::new(TrackId(1), StateVec::zeros(), cov, 0.0);
        assert!((t.position_std() - 3.0).abs() < 1e-12);
    }
}
