//! Persisted session state
//!
//! Plain serde data types for everything the external session layer stores
//! per track and for the master section. Audio itself is not embedded; a
//! restore re-creates tracks with their parameters and reloads audio through
//! the loader by path.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::track::{StepGrid, MAX_MEASURES, STEPS_PER_MEASURE};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackSnapshot {
    pub file_path: Option<PathBuf>,
    pub num_samples: usize,
    pub sample_rate: u32,
    pub original_bpm: f64,
    pub loop_start: f64,
    pub loop_end: f64,
    /// Numeric stretch-mode code (1-4), kept for session compatibility.
    pub stretch_mode: u8,
    pub bpm_offset: f64,
    pub fine_offset: f64,
    pub num_measures: usize,
    pub steps: Vec<Vec<bool>>,
    pub velocities: Vec<Vec<f32>>,
    pub is_playing: bool,
    pub is_armed: bool,
    pub is_muted: bool,
    pub is_solo: bool,
    pub is_enabled: bool,
    pub volume: f32,
    pub pan: f32,
    pub slot: usize,
    pub trigger_note: u8,
}

impl TrackSnapshot {
    /// Rebuild a grid from the persisted step arrays, clamping anything that
    /// drifted out of shape.
    pub fn grid(&self) -> StepGrid {
        let mut grid = StepGrid::new();
        grid.set_num_measures(self.num_measures.clamp(1, MAX_MEASURES));
        for (m, row) in self.steps.iter().enumerate().take(MAX_MEASURES) {
            for (s, &active) in row.iter().enumerate().take(STEPS_PER_MEASURE) {
                grid.set_step(m, s, active);
            }
        }
        for (m, row) in self.velocities.iter().enumerate().take(MAX_MEASURES) {
            for (s, &velocity) in row.iter().enumerate().take(STEPS_PER_MEASURE) {
                grid.set_velocity(m, s, velocity);
            }
        }
        grid
    }

    pub fn grid_arrays(grid: &StepGrid) -> (Vec<Vec<bool>>, Vec<Vec<f32>>) {
        let steps = (0..MAX_MEASURES)
            .map(|m| (0..STEPS_PER_MEASURE).map(|s| grid.is_active(m, s)).collect())
            .collect();
        let velocities = (0..MAX_MEASURES)
            .map(|m| (0..STEPS_PER_MEASURE).map(|s| grid.velocity(m, s)).collect())
            .collect();
        (steps, velocities)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MasterSnapshot {
    pub volume: f32,
    pub pan: f32,
    pub eq_low_db: f32,
    pub eq_mid_db: f32,
    pub eq_high_db: f32,
    pub eq_bypass: bool,
}

impl Default for MasterSnapshot {
    fn default() -> Self {
        Self {
            volume: 1.0,
            pan: 0.0,
            eq_low_db: 0.0,
            eq_mid_db: 0.0,
            eq_high_db: 0.0,
            eq_bypass: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SessionSnapshot {
    pub tracks: Vec<TrackSnapshot>,
    pub master: MasterSnapshot,
}

impl SessionSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
