//! Most-important-object selection.
//!
//! The MIO is the nearest confirmed track ahead of the ego vehicle whose
//! lateral offset from the estimated centreline lies within the lane
//! half-width. It is a borrow into the tracker's set, recomputed every cycle.

use crate::{lane::LaneGeometryEstimate, track::Track, types::TrackId};
use serde::{Deserialize, Serialize};

/// Borrowed reference to the selected track.
#[derive(Clone, Copy, Debug)]
pub struct Mio<'a> {
    pub track: &'a Track,
}

impl Mio<'_> {
    /// Longitudinal distance and closing velocity for the controller.
    pub fn measurement(&self) -> MioMeasurement {
        let [x, _] = self.track.position();
        let [vx, _] = self.track.velocity();
        MioMeasurement {
            track_id: self.track.id,
            distance: x,
            relative_velocity: vx,
        }
    }
}

/// What the controller needs to know about the MIO.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MioMeasurement {
    pub track_id: TrackId,
    /// Longitudinal gap to the object (m)
    pub distance: f64,
    /// Object velocity minus ego velocity (m/s); negative when closing
    pub relative_velocity: f64,
}

/// Select the MIO among `tracks`. Ties in distance go to the lower track id.
pub fn select_mio<'a>(tracks: &'a [Track], lane: &LaneGeometryEstimate) -> Option<Mio<'a>> {
    tracks
        .iter()
        .filter(|t| t.is_confirmed())
        .filter(|t| {
            let [x, y] = t.position();
            x > 0.0 && lane.contains(x, y)
        })
        .min_by(|a, b| {
            a.position()[0]
                .total_cmp(&b.position()[0])
                .then(a.id.cmp(&b.id))
        })
        .map(|track| Mio { track })
}
