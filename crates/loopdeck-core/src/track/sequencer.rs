//! Per-track step grid and step position state

/// Sixteenth-note steps per measure in 4/4.
pub const STEPS_PER_MEASURE: usize = 16;

/// Maximum pattern length in measures.
pub const MAX_MEASURES: usize = 4;

/// Fraction of a quarter note per sequencer step.
pub const BEATS_PER_STEP: f64 = 0.25;

/// A track's step pattern: up to four measures of sixteen steps, each with
/// an on/off state and a velocity.
///
/// All indexing clamps rather than panics; a stale index from the control
/// thread after a measure-count change must not take the engine down.
#[derive(Debug, Clone, PartialEq)]
pub struct StepGrid {
    steps: [[bool; STEPS_PER_MEASURE]; MAX_MEASURES],
    velocities: [[f32; STEPS_PER_MEASURE]; MAX_MEASURES],
    num_measures: usize,
}

impl Default for StepGrid {
    fn default() -> Self {
        Self {
            steps: [[false; STEPS_PER_MEASURE]; MAX_MEASURES],
            velocities: [[0.8; STEPS_PER_MEASURE]; MAX_MEASURES],
            num_measures: 1,
        }
    }
}

impl StepGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_measures(&self) -> usize {
        self.num_measures
    }

    /// Change the pattern length. Out-of-range counts are ignored; steps in
    /// measures beyond the new length are kept so growing back restores them.
    pub fn set_num_measures(&mut self, measures: usize) {
        if (1..=MAX_MEASURES).contains(&measures) {
            self.num_measures = measures;
        } else {
            log::warn!("Ignoring invalid measure count {}", measures);
        }
    }

    pub fn set_step(&mut self, measure: usize, step: usize, active: bool) {
        let (m, s) = Self::clamp_index(measure, step);
        self.steps[m][s] = active;
    }

    pub fn set_velocity(&mut self, measure: usize, step: usize, velocity: f32) {
        let (m, s) = Self::clamp_index(measure, step);
        self.velocities[m][s] = velocity.clamp(0.0, 1.0);
    }

    pub fn is_active(&self, measure: usize, step: usize) -> bool {
        let (m, s) = Self::clamp_index(measure, step);
        self.steps[m][s]
    }

    pub fn velocity(&self, measure: usize, step: usize) -> f32 {
        let (m, s) = Self::clamp_index(measure, step);
        self.velocities[m][s]
    }

    pub fn clear(&mut self) {
        self.steps = [[false; STEPS_PER_MEASURE]; MAX_MEASURES];
    }

    /// True when no step is active within the playable length.
    pub fn is_empty(&self) -> bool {
        self.steps[..self.num_measures]
            .iter()
            .all(|measure| measure.iter().all(|&s| !s))
    }

    fn clamp_index(measure: usize, step: usize) -> (usize, usize) {
        (measure.min(MAX_MEASURES - 1), step.min(STEPS_PER_MEASURE - 1))
    }
}

/// Step position derived from a monotonic counter.
///
/// The counter only ever increments; the current step and measure are derived
/// modulo the grid size, so they stay in range no matter what the host PPQ
/// does. `last_step_ppq` anchors boundary detection in the clock.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepState {
    pub step_counter: u64,
    pub last_step_ppq: f64,
}

impl StepState {
    pub fn reset(&mut self, ppq: f64) {
        self.step_counter = 0;
        self.last_step_ppq = ppq;
    }

    /// Move to the next step boundary.
    pub fn advance(&mut self) {
        self.step_counter += 1;
        self.last_step_ppq += BEATS_PER_STEP;
    }

    /// Re-anchor after a backward host jump without advancing the counter.
    pub fn resync(&mut self, ppq: f64) {
        self.last_step_ppq = ppq;
    }

    pub fn current_step(&self) -> usize {
        (self.step_counter % STEPS_PER_MEASURE as u64) as usize
    }

    pub fn current_measure(&self, num_measures: usize) -> usize {
        let measures = num_measures.max(1) as u64;
        ((self.step_counter / STEPS_PER_MEASURE as u64) % measures) as usize
    }

    /// True at the first step of the first measure of the pattern.
    pub fn at_pattern_start(&self, num_measures: usize) -> bool {
        self.current_step() == 0 && self.current_measure(num_measures) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_rejects_bad_measure_count() {
        let mut grid = StepGrid::new();
        grid.set_num_measures(3);
        assert_eq!(grid.num_measures(), 3);
        grid.set_num_measures(0);
        assert_eq!(grid.num_measures(), 3);
        grid.set_num_measures(9);
        assert_eq!(grid.num_measures(), 3);
    }

    #[test]
    fn test_grid_clamps_indices() {
        let mut grid = StepGrid::new();
        grid.set_step(100, 100, true);
        assert!(grid.is_active(MAX_MEASURES - 1, STEPS_PER_MEASURE - 1));
        assert!(grid.is_active(100, 100));
    }

    #[test]
    fn test_grid_keeps_steps_beyond_shrunk_length() {
        let mut grid = StepGrid::new();
        grid.set_num_measures(4);
        grid.set_step(3, 5, true);
        grid.set_num_measures(1);
        grid.set_num_measures(4);
        assert!(grid.is_active(3, 5));
    }

    #[test]
    fn test_step_state_indices_stay_in_range() {
        let mut state = StepState::default();
        for _ in 0..1000 {
            state.advance();
            assert!(state.current_step() < STEPS_PER_MEASURE);
            assert!(state.current_measure(3) < 3);
        }
    }

    #[test]
    fn test_step_state_pattern_start() {
        let mut state = StepState::default();
        assert!(state.at_pattern_start(2));
        state.advance();
        assert!(!state.at_pattern_start(2));
        // One measure later the two-measure pattern is not back at its start.
        for _ in 1..STEPS_PER_MEASURE {
            state.advance();
        }
        assert!(!state.at_pattern_start(2));
        for _ in 0..STEPS_PER_MEASURE {
            state.advance();
        }
        assert!(state.at_pattern_start(2));
    }
}
