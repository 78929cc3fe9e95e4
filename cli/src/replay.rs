//! Replay: recorded per-cycle input logs and the run report written back out.

use lanefollow_core::{CycleInput, CycleOutput, CycleSource};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// A full recorded input log.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReplayLog {
    #[serde(default)]
    pub name: String,
    /// Per-cycle inputs in chronological order
    pub frames: Vec<RecordedFrame>,
}

/// One cycle's inputs plus the collision-detector output for that cycle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordedFrame {
    #[serde(flatten)]
    pub input: CycleInput,
    #[serde(default)]
    pub collision: bool,
}

/// Everything written by `lanefollow run`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub name: String,
    pub cycles: u64,
    pub faults: u64,
    pub overruns: u64,
    pub stopped_on_collision: bool,
    pub outputs: Vec<CycleOutput>,
}

/// Feeds recorded frames to the driver; a frame's `collision` flag raises
/// the stop signal after that frame has been processed.
pub struct ReplaySource {
    frames: VecDeque<RecordedFrame>,
    collided: bool,
}

impl ReplaySource {
    pub fn new(log: ReplayLog) -> Self {
        Self {
            frames: log.frames.into(),
            collided: false,
        }
    }
}

impl CycleSource for ReplaySource {
    fn next_input(&mut self) -> Option<CycleInput> {
        let frame = self.frames.pop_front()?;
        self.collided |= frame.collision;
        Some(frame.input)
    }

    fn collision_detected(&self) -> bool {
        self.collided
    }
}

/// Load a replay log from a JSON file.
pub fn load_replay(path: &Path) -> anyhow::Result<ReplayLog> {
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let log: ReplayLog = serde_json::from_reader(reader)?;
    Ok(log)
}

/// Save any serializable value as pretty JSON.
pub fn save_json<T: Serialize>(value: &T, path: &Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}
