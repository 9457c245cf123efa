//! Track state: live audio, loop window, staging slot, and control atomics
//!
//! A `Track` is owned by the audio-side engine and mutated only on the audio
//! thread. Everything other threads need to observe or poke lives in the
//! `Arc<TrackShared>` atomics or the `Arc<StagingSlot>` the loader stages
//! into.

pub mod sequencer;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use basedrop::Shared;

use crate::stretch::StretchMode;
use crate::types::{AtomicF32, StereoBuffer, TrackId};

pub use sequencer::{StepGrid, StepState, BEATS_PER_STEP, MAX_MEASURES, STEPS_PER_MEASURE};

/// Samples at or below this total duration loop as a whole.
const WHOLE_SAMPLE_MAX_SECONDS: f64 = 8.0;

/// Longer samples get a loop window of this many beats at their tempo.
const DEFAULT_LOOP_BEATS: f64 = 16.0;

/// Live audio owned by a track. The buffer is a `basedrop::Shared`, so
/// replacing it during a swap defers the old allocation's teardown to the
/// collector thread instead of freeing on the audio callback.
#[derive(Clone)]
pub struct TrackAudio {
    pub buffer: Shared<StereoBuffer>,
    pub num_samples: usize,
    pub sample_rate: u32,
    pub original_bpm: f64,
}

/// Fully processed audio produced by the loader, waiting in a staging slot.
pub struct StagedAudio {
    pub buffer: Shared<StereoBuffer>,
    pub num_samples: usize,
    pub sample_rate: u32,
    pub original_bpm: f64,
    pub path: PathBuf,
}

/// Handoff point between the loader thread and the audio thread.
///
/// The loader writes under the mutex and then raises the flags; the audio
/// thread polls the flags lock-free every block and only attempts `try_lock`
/// once `swap_requested` is set. Staging again before the audio thread
/// collects simply replaces the pending audio.
#[derive(Default)]
pub struct StagingSlot {
    pub has_data: AtomicBool,
    pub swap_requested: AtomicBool,
    pending: Mutex<Option<StagedAudio>>,
    /// File paths displaced by a swap, parked here so the heap free happens
    /// off the audio callback.
    retired: Mutex<Vec<PathBuf>>,
    pub generation: AtomicU64,
}

impl StagingSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by the loader thread with fully processed audio.
    pub fn stage(&self, audio: StagedAudio) {
        drop(self.drain_retired());
        match self.pending.lock() {
            Ok(mut pending) => {
                if pending.is_some() {
                    log::info!("Replacing unconsumed staged audio for {}", audio.path.display());
                }
                *pending = Some(audio);
                self.has_data.store(true, Ordering::Release);
                self.swap_requested.store(true, Ordering::Release);
                self.generation.fetch_add(1, Ordering::Relaxed);
            }
            Err(poisoned) => {
                // A panicking loader iteration must not wedge the slot.
                *poisoned.into_inner() = Some(audio);
                self.has_data.store(true, Ordering::Release);
                self.swap_requested.store(true, Ordering::Release);
                self.generation.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Audio-thread side: park a path displaced by a swap so its allocation
    /// is freed on the next `stage` or `drain_retired`, not on the callback.
    pub fn retire_path(&self, path: PathBuf) {
        if let Ok(mut retired) = self.retired.try_lock() {
            retired.push(path);
        }
        // On contention the path drops right here; rare, and still a single
        // small free.
    }

    /// Drop any retired paths on the calling (non-audio) thread.
    pub fn drain_retired(&self) -> Vec<PathBuf> {
        self.retired
            .lock()
            .map(|mut retired| std::mem::take(&mut *retired))
            .unwrap_or_default()
    }

    /// Audio-thread side: take the staged audio if the lock is free.
    ///
    /// Returns `None` on contention; the request flag stays up and the swap
    /// retries next block.
    pub fn take_pending(&self) -> Option<StagedAudio> {
        if !self.swap_requested.load(Ordering::Acquire) {
            return None;
        }
        let mut pending = self.pending.try_lock().ok()?;
        let taken = pending.take();
        if taken.is_some() {
            self.has_data.store(false, Ordering::Release);
            self.swap_requested.store(false, Ordering::Release);
        } else {
            // Flag raised but nothing staged: clear the stale request.
            self.swap_requested.store(false, Ordering::Release);
        }
        taken
    }
}

/// Per-track state visible across threads.
///
/// Single writer per field, relaxed ordering: the control thread owns the
/// user-facing flags and volume/pan, the audio thread owns the playback
/// status, cached ratio, and slot index.
pub struct TrackShared {
    pub is_playing: AtomicBool,
    pub is_armed: AtomicBool,
    pub is_armed_to_stop: AtomicBool,
    /// True only while the renderer is actually producing samples.
    pub is_currently_playing: AtomicBool,
    pub is_muted: AtomicBool,
    pub is_solo: AtomicBool,
    pub is_enabled: AtomicBool,
    pub volume: AtomicF32,
    pub pan: AtomicF32,
    /// Last playback ratio computed by the renderer, for UI display.
    pub cached_ratio: AtomicF32,
    /// Slot index 0..NUM_SLOTS, or -1 when unassigned.
    pub slot_index: AtomicI32,
}

impl Default for TrackShared {
    fn default() -> Self {
        Self {
            is_playing: AtomicBool::new(false),
            is_armed: AtomicBool::new(false),
            is_armed_to_stop: AtomicBool::new(false),
            is_currently_playing: AtomicBool::new(false),
            is_muted: AtomicBool::new(false),
            is_solo: AtomicBool::new(false),
            is_enabled: AtomicBool::new(true),
            volume: AtomicF32::new(0.8),
            pan: AtomicF32::new(0.0),
            cached_ratio: AtomicF32::new(1.0),
            slot_index: AtomicI32::new(-1),
        }
    }
}

/// Action deferred to the track's next pattern start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingAction {
    #[default]
    None,
    StartOnNextMeasure,
    StopOnNextMeasure,
}

/// Sequencer clock state, per track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockState {
    #[default]
    Idle,
    ArmedToStart,
    Playing,
    ArmedToStop,
}

/// Beat-repeat window, in beats relative to the loop start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatRepeat {
    pub start_beat: f64,
    pub length_beats: f64,
}

/// One loop track. Owned and mutated by the audio-side engine only.
pub struct Track {
    pub id: TrackId,
    pub audio: Option<TrackAudio>,
    pub file_path: Option<PathBuf>,
    /// Loop window in seconds, half-open `[loop_start, loop_end)`.
    pub loop_start: f64,
    pub loop_end: f64,
    /// Fractional read cursor in samples, relative to the buffer start.
    pub read_position: f64,
    pub stretch_mode: StretchMode,
    pub bpm_offset: f64,
    pub fine_offset: f64,
    pub pending_action: PendingAction,
    pub beat_repeat: Option<BeatRepeat>,
    pub grid: StepGrid,
    pub step_state: StepState,
    pub clock_state: ClockState,
    pub shared: Arc<TrackShared>,
    pub staging: Arc<StagingSlot>,
}

impl Track {
    pub fn new(id: TrackId) -> Self {
        Self {
            id,
            audio: None,
            file_path: None,
            loop_start: 0.0,
            loop_end: 0.0,
            read_position: 0.0,
            stretch_mode: StretchMode::default(),
            bpm_offset: 0.0,
            fine_offset: 0.0,
            pending_action: PendingAction::None,
            beat_repeat: None,
            grid: StepGrid::new(),
            step_state: StepState::default(),
            clock_state: ClockState::Idle,
            shared: Arc::new(TrackShared::default()),
            staging: Arc::new(StagingSlot::new()),
        }
    }

    pub fn has_audio(&self) -> bool {
        self.audio.as_ref().is_some_and(|a| a.num_samples > 0)
    }

    /// Total duration of the loaded sample in seconds.
    pub fn total_duration(&self) -> f64 {
        match &self.audio {
            Some(a) if a.sample_rate > 0 => a.num_samples as f64 / a.sample_rate as f64,
            _ => 0.0,
        }
    }

    /// Adopt staged audio as the live buffer.
    ///
    /// The previous `Shared` buffer (if any) is dropped here; basedrop defers
    /// the actual deallocation to the collector thread. The loop window is
    /// recomputed for the new material and the cursor rewinds.
    ///
    /// Returns the displaced file path so the caller can hand it back to the
    /// staging slot instead of freeing it on the audio callback.
    pub fn install_audio(&mut self, staged: StagedAudio) -> Option<PathBuf> {
        let old_path = self.file_path.replace(staged.path);
        // TrackAudio is Copy fields plus the Shared buffer, so this
        // assignment performs no free on the callback.
        self.audio = Some(TrackAudio {
            buffer: staged.buffer,
            num_samples: staged.num_samples,
            sample_rate: staged.sample_rate,
            original_bpm: staged.original_bpm,
        });
        self.reset_loop_window();
        self.read_position = 0.0;
        old_path
    }

    /// Default loop window for the current audio: the whole sample when it is
    /// short, otherwise the first sixteen beats at the sample's tempo.
    pub fn reset_loop_window(&mut self) {
        let duration = self.total_duration();
        let bpm = self.audio.as_ref().map_or(0.0, |a| a.original_bpm);

        self.loop_start = 0.0;
        self.loop_end = if duration <= WHOLE_SAMPLE_MAX_SECONDS || bpm <= 0.0 {
            duration
        } else {
            (DEFAULT_LOOP_BEATS * 60.0 / bpm).min(duration)
        };
    }

    /// Set the loop window in seconds, clamped to the loaded audio.
    pub fn set_loop_window(&mut self, start: f64, end: f64) {
        let duration = self.total_duration();
        if duration <= 0.0 {
            return;
        }
        let start = start.clamp(0.0, duration);
        let end = end.clamp(start, duration);
        if end > start {
            self.loop_start = start;
            self.loop_end = end;
        } else {
            log::warn!("Ignoring empty loop window [{start}, {end}) on {}", self.id);
        }
    }

    /// Stop playback immediately and rewind.
    pub fn stop(&mut self) {
        self.shared.is_playing.store(false, Ordering::Relaxed);
        self.shared.is_currently_playing.store(false, Ordering::Relaxed);
        self.read_position = 0.0;
        self.pending_action = PendingAction::None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::gc::gc_handle;

    fn staged(seconds: f64, sample_rate: u32, bpm: f64) -> StagedAudio {
        let num_samples = (seconds * sample_rate as f64) as usize;
        StagedAudio {
            buffer: Shared::new(&gc_handle(), StereoBuffer::silence(num_samples)),
            num_samples,
            sample_rate,
            original_bpm: bpm,
            path: PathBuf::from("/tmp/loop.wav"),
        }
    }

    #[test]
    fn test_short_sample_loops_whole() {
        let mut track = Track::new(TrackId(1));
        track.install_audio(staged(4.0, 48_000, 120.0));
        assert_eq!(track.loop_start, 0.0);
        assert!((track.loop_end - 4.0).abs() < 1e-9);
        assert_eq!(track.read_position, 0.0);
    }

    #[test]
    fn test_long_sample_loops_sixteen_beats() {
        let mut track = Track::new(TrackId(2));
        track.install_audio(staged(30.0, 48_000, 120.0));
        // 16 beats at 120 BPM is 8 seconds.
        assert!((track.loop_end - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_long_sample_without_tempo_loops_whole() {
        let mut track = Track::new(TrackId(3));
        track.install_audio(staged(30.0, 48_000, 0.0));
        assert!((track.loop_end - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_loop_window_clamped_to_duration() {
        let mut track = Track::new(TrackId(4));
        track.install_audio(staged(4.0, 48_000, 120.0));
        track.set_loop_window(-1.0, 99.0);
        assert_eq!(track.loop_start, 0.0);
        assert!((track.loop_end - 4.0).abs() < 1e-9);

        // Degenerate windows are rejected.
        track.set_loop_window(2.0, 2.0);
        assert_eq!(track.loop_start, 0.0);
    }

    #[test]
    fn test_staging_replace_and_take() {
        let slot = StagingSlot::new();
        slot.stage(staged(1.0, 48_000, 100.0));
        slot.stage(staged(2.0, 48_000, 110.0));
        assert_eq!(slot.generation.load(Ordering::Relaxed), 2);

        let taken = slot.take_pending().expect("staged audio");
        assert_eq!(taken.original_bpm, 110.0);
        assert!(!slot.swap_requested.load(Ordering::Relaxed));
        assert!(!slot.has_data.load(Ordering::Relaxed));
        assert!(slot.take_pending().is_none());
    }

    #[test]
    fn test_install_returns_displaced_path_and_retire_round_trips() {
        let mut track = Track::new(TrackId(5));
        assert!(track.install_audio(staged(1.0, 48_000, 100.0)).is_none());

        let old = track
            .install_audio(staged(2.0, 48_000, 110.0))
            .expect("first path displaced");
        track.staging.retire_path(old);
        assert_eq!(track.staging.drain_retired(), vec![PathBuf::from("/tmp/loop.wav")]);
        assert!(track.staging.drain_retired().is_empty());

        // Staging fresh audio clears anything still parked.
        track.staging.retire_path(PathBuf::from("/tmp/stale.wav"));
        track.staging.stage(staged(1.0, 48_000, 100.0));
        assert!(track.staging.drain_retired().is_empty());
    }
}
