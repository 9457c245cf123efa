//! Control-to-audio command queue
//!
//! Commands are pushed from the control thread through an `rtrb` SPSC ring
//! and drained at the top of every audio block. Anything that is a plain
//! parameter value goes through the shared atomics instead; commands carry
//! the operations that mutate engine-owned state.

use rtrb::{Consumer, Producer, RingBuffer};

use crate::stretch::StretchMode;
use crate::track::BeatRepeat;
use crate::types::TrackId;

/// Queue depth. Commands are user-rate; this never fills in practice.
pub const COMMAND_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    CreateTrack,
    RemoveTrack(TrackId),
    ReorderTracks(Vec<TrackId>),

    /// Start immediately, from the loop start.
    PlayTrack(TrackId),
    /// Stop immediately and rewind.
    StopTrack(TrackId),
    /// Start at the track's next pattern start.
    ArmTrack(TrackId),
    /// Stop at the track's next pattern start.
    ArmTrackToStop(TrackId),

    SetLoopWindow { track: TrackId, start: f64, end: f64 },
    SetStretchMode { track: TrackId, mode: StretchMode },
    SetTempoOffsets { track: TrackId, bpm_offset: f64, fine_offset: f64 },

    SetStep { track: TrackId, measure: usize, step: usize, active: bool },
    SetStepVelocity { track: TrackId, measure: usize, step: usize, velocity: f32 },
    SetNumMeasures { track: TrackId, measures: usize },
    ClearGrid(TrackId),

    SetBeatRepeat { track: TrackId, repeat: Option<BeatRepeat> },

    SetMasterVolume(f32),
    SetMasterPan(f32),
    SetMasterEq { low_db: f32, mid_db: f32, high_db: f32 },
    SetMasterEqBypass(bool),
}

/// Build the SPSC pair: producer for the control thread, consumer for the
/// engine.
pub fn command_channel() -> (Producer<EngineCommand>, Consumer<EngineCommand>) {
    RingBuffer::new(COMMAND_QUEUE_CAPACITY)
}
