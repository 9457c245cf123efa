//! Instrument-voice scaffolding
//!
//! Plugin hosts expect an instrument to expose a voice pool even when, as
//! here, all sound comes from the loop tracks. These voices satisfy that
//! contract and render nothing.

use crate::types::StereoBuffer;

pub trait InstrumentVoice: Send {
    fn note_on(&mut self, note: u8, velocity: u8);
    fn note_off(&mut self, note: u8);
    fn render(&mut self, out: &mut StereoBuffer);
    fn is_active(&self) -> bool;
}

/// A voice that accepts notes and stays silent.
#[derive(Default)]
pub struct NullVoice {
    held_note: Option<u8>,
}

impl InstrumentVoice for NullVoice {
    fn note_on(&mut self, note: u8, _velocity: u8) {
        self.held_note = Some(note);
    }

    fn note_off(&mut self, note: u8) {
        if self.held_note == Some(note) {
            self.held_note = None;
        }
    }

    fn render(&mut self, _out: &mut StereoBuffer) {}

    fn is_active(&self) -> bool {
        self.held_note.is_some()
    }
}

pub struct VoiceBank {
    voices: Vec<Box<dyn InstrumentVoice>>,
}

impl Default for VoiceBank {
    fn default() -> Self {
        Self::with_voices(4)
    }
}

impl VoiceBank {
    pub fn with_voices(count: usize) -> Self {
        Self {
            voices: (0..count)
                .map(|_| Box::new(NullVoice::default()) as Box<dyn InstrumentVoice>)
                .collect(),
        }
    }

    /// Route a note-on to the first free voice, stealing the first voice
    /// when all are busy.
    pub fn note_on(&mut self, note: u8, velocity: u8) {
        if let Some(voice) = self.voices.iter_mut().find(|v| !v.is_active()) {
            voice.note_on(note, velocity);
        } else if let Some(voice) = self.voices.first_mut() {
            voice.note_on(note, velocity);
        }
    }

    pub fn note_off(&mut self, note: u8) {
        for voice in &mut self.voices {
            voice.note_off(note);
        }
    }

    pub fn render(&mut self, out: &mut StereoBuffer) {
        for voice in &mut self.voices {
            voice.render(out);
        }
    }
}
