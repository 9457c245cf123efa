//! MIDI trigger dispatch
//!
//! External note input and the sequencer clock's synthetic triggers share one
//! dispatch path: the clock pushes into a `TriggerQueue`, the engine drains
//! it into the block's incoming events, and everything goes through
//! `dispatch_midi` together.

use std::sync::atomic::Ordering;
use std::sync::Mutex;

use crate::engine::manager::{TrackManager, TRIGGER_NOTE_BASE};
use crate::types::{TrackId, NUM_SLOTS};

/// Which track each trigger note started, indexed by `note - TRIGGER_NOTE_BASE`.
/// A fixed array keeps note bookkeeping allocation-free on the audio thread.
pub type PlayingNotes = [Option<TrackId>; NUM_SLOTS];

/// A channel-voice event the engine cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
}

/// Synthetic triggers emitted by the sequencer clock within a block.
///
/// The mutex is only ever touched at block rate from the audio thread and at
/// command rate from same-thread callers; it is never held across rendering.
#[derive(Default)]
pub struct TriggerQueue {
    events: Mutex<Vec<MidiEvent>>,
}

impl TriggerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: MidiEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    /// Move all queued events into `out`, preserving order.
    pub fn drain_into(&self, out: &mut Vec<MidiEvent>) {
        if let Ok(mut events) = self.events.lock() {
            out.append(&mut events);
        }
    }
}

/// Dispatch one block's merged events against the trigger-note bindings.
///
/// `playing_notes` maps a note to the track it started, so a later note-off
/// stops exactly that track even if the slot was rebound in between.
pub fn dispatch_midi(
    manager: &mut TrackManager,
    playing_notes: &mut PlayingNotes,
    events: &[MidiEvent],
) {
    for event in events {
        match *event {
            MidiEvent::NoteOn { note, .. } => note_on(manager, playing_notes, note),
            MidiEvent::NoteOff { note, .. } => note_off(manager, playing_notes, note),
        }
    }
}

/// Notes outside the trigger range map to no slot.
fn trigger_slot(note: u8) -> Option<usize> {
    let slot = note.checked_sub(TRIGGER_NOTE_BASE)? as usize;
    (slot < NUM_SLOTS).then_some(slot)
}

fn note_on(manager: &mut TrackManager, playing_notes: &mut PlayingNotes, note: u8) {
    let Some(slot) = trigger_slot(note) else {
        return;
    };
    let Some(id) = manager.track_in_slot(slot) else {
        return;
    };
    let Some(track) = manager.get_mut(id) else {
        return;
    };

    if !track.has_audio() {
        log::debug!("Ignoring note {} for unloaded {}", note, id);
        return;
    }
    if track.shared.is_playing.load(Ordering::Relaxed)
        || track.shared.is_armed_to_stop.load(Ordering::Relaxed)
    {
        return;
    }

    let sample_rate = track.audio.as_ref().map_or(0.0, |a| a.sample_rate as f64);
    track.read_position = track.loop_start * sample_rate;
    track.shared.is_playing.store(true, Ordering::Relaxed);
    playing_notes[slot] = Some(id);
}

fn note_off(manager: &mut TrackManager, playing_notes: &mut PlayingNotes, note: u8) {
    let Some(slot) = trigger_slot(note) else {
        return;
    };
    let Some(id) = playing_notes[slot].take() else {
        return;
    };
    if let Some(track) = manager.get_mut(id) {
        track.stop();
    }
}
