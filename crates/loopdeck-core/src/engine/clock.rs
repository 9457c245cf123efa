//! Host-transport-driven sequencer clock
//!
//! Advances each track's step position on quarter-beat boundaries of the
//! host PPQ and turns grid cells and arm requests into synthetic note events
//! on the trigger queue. Dispatch happens afterwards through the same path
//! external MIDI takes.

use std::sync::atomic::Ordering;

use crate::engine::manager::{TrackManager, TRIGGER_NOTE_BASE};
use crate::engine::midi::{MidiEvent, TriggerQueue};
use crate::track::{ClockState, PendingAction, Track, BEATS_PER_STEP};
use crate::types::HostTransport;

/// Forward PPQ jumps larger than this many steps are treated as a seek and
/// resynced instead of stepped through.
const MAX_STEPS_PER_TICK: usize = 1024;

/// The clock itself only remembers whether the transport was rolling; all
/// per-track position state lives on the tracks.
#[derive(Default)]
pub struct SequencerClock {
    transport_was_playing: bool,
}

impl SequencerClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock for one block.
    ///
    /// `None` transport means the host gave no position information; every
    /// track holds its state. A stopped transport idles all tracks, rewinds
    /// cursors, and re-arms whatever was audibly playing so it comes back on
    /// the next start.
    pub fn tick(
        &mut self,
        manager: &mut TrackManager,
        transport: Option<&HostTransport>,
        triggers: &TriggerQueue,
    ) {
        let Some(transport) = transport else {
            return;
        };

        if !transport.playing {
            if self.transport_was_playing {
                log::debug!("Transport stopped, re-arming audible tracks");
                on_transport_stop(manager);
            }
            self.transport_was_playing = false;
            return;
        }

        let just_started = !self.transport_was_playing;
        self.transport_was_playing = true;

        for track in manager.iter_mut() {
            if just_started {
                // Anchor at the current position; step (0, 0) fires now so
                // armed tracks start together with the host.
                track.step_state.reset(transport.ppq);
                process_step(track, triggers);
                continue;
            }

            if transport.ppq < track.step_state.last_step_ppq {
                // Backward jump (loop cycle or relocate): re-anchor without
                // advancing the pattern.
                track.step_state.resync(transport.ppq);
                continue;
            }

            let mut steps = 0;
            while transport.ppq >= track.step_state.last_step_ppq + BEATS_PER_STEP {
                track.step_state.advance();
                process_step(track, triggers);
                steps += 1;
                if steps >= MAX_STEPS_PER_TICK {
                    track.step_state.resync(transport.ppq);
                    break;
                }
            }
        }
    }
}

fn on_transport_stop(manager: &mut TrackManager) {
    for track in manager.iter_mut() {
        let shared = track.shared.clone();
        let was_audible = shared.is_playing.load(Ordering::Relaxed)
            || shared.is_currently_playing.load(Ordering::Relaxed)
            || track.clock_state == ClockState::Playing;
        let was_armed = track.pending_action == PendingAction::StartOnNextMeasure
            || track.clock_state == ClockState::ArmedToStart;

        track.stop();
        track.step_state = Default::default();
        shared.is_armed_to_stop.store(false, Ordering::Relaxed);

        if was_audible || was_armed {
            track.clock_state = ClockState::ArmedToStart;
            track.pending_action = PendingAction::StartOnNextMeasure;
            shared.is_armed.store(true, Ordering::Relaxed);
        } else {
            track.clock_state = ClockState::Idle;
            shared.is_armed.store(false, Ordering::Relaxed);
        }
    }
}

/// Handle one step boundary for one track.
///
/// `pending_action` is the single source of truth for deferred start/stop:
/// it is taken here, exactly once, at the pattern start, and `clock_state`
/// is derived from what it said.
fn process_step(track: &mut Track, triggers: &TriggerQueue) {
    let num_measures = track.grid.num_measures();
    let step = track.step_state.current_step();
    let measure = track.step_state.current_measure(num_measures);

    if track.step_state.at_pattern_start(num_measures) {
        match std::mem::take(&mut track.pending_action) {
            PendingAction::StartOnNextMeasure => {
                if track.has_audio() {
                    track.clock_state = ClockState::Playing;
                    track.shared.is_armed.store(false, Ordering::Relaxed);
                    push_trigger(track, triggers, 1.0);
                } else {
                    // No audio yet: re-defer until a swap lands.
                    track.pending_action = PendingAction::StartOnNextMeasure;
                }
            }
            PendingAction::StopOnNextMeasure => {
                track.stop();
                track.clock_state = ClockState::Idle;
                track.shared.is_armed_to_stop.store(false, Ordering::Relaxed);
            }
            PendingAction::None => {}
        }
    }

    // Grid retrigger: rewind and re-announce the note while playing.
    if track.clock_state == ClockState::Playing
        && track.grid.is_active(measure, step)
        && track.has_audio()
    {
        let sample_rate = track.audio.as_ref().map_or(0.0, |a| a.sample_rate as f64);
        track.read_position = track.loop_start * sample_rate;
        track.shared.is_playing.store(true, Ordering::Relaxed);
        push_trigger(track, triggers, track.grid.velocity(measure, step));
    }
}

fn push_trigger(track: &Track, triggers: &TriggerQueue, velocity: f32) {
    let slot = track.shared.slot_index.load(Ordering::Relaxed);
    if slot < 0 {
        return;
    }
    triggers.push(MidiEvent::NoteOn {
        channel: 0,
        note: TRIGGER_NOTE_BASE + slot as u8,
        velocity: (velocity.clamp(0.0, 1.0) * 127.0) as u8,
    });
}
