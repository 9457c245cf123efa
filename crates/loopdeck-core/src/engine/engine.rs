//! Engine facade and the per-block processing order
//!
//! `LoopEngine` is owned by the audio side. A host adapter calls
//! `process_block` once per callback; the control thread talks to it through
//! the command ring and the shared atomics. Every direct method is also
//! callable in-thread, which is how the tests drive it.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use rtrb::{Consumer, Producer};

use crate::engine::clock::SequencerClock;
use crate::engine::command::{command_channel, EngineCommand};
use crate::engine::manager::{TrackError, TrackManager};
use crate::engine::master::{track_audible, MasterBus, MasterShared};
use crate::engine::midi::{dispatch_midi, MidiEvent, PlayingNotes, TriggerQueue};
use crate::engine::renderer::render_track;
use crate::engine::swap::apply_pending_swaps;
use crate::session::{MasterSnapshot, SessionSnapshot, TrackSnapshot};
use crate::stretch::StretchMode;
use crate::track::{BeatRepeat, ClockState, PendingAction, StagingSlot, TrackShared};
use crate::types::{HostTransport, StereoBuffer, TrackId, MAX_BUFFER_SIZE, NUM_SLOTS};

pub struct LoopEngine {
    sample_rate: u32,
    manager: TrackManager,
    master: MasterBus,
    clock: SequencerClock,
    triggers: TriggerQueue,
    playing_notes: PlayingNotes,
    commands: Option<Consumer<EngineCommand>>,
    scratch: StereoBuffer,
    premix: StereoBuffer,
    merged_events: Vec<MidiEvent>,
    /// Last tempo seen from the host, used while the transport reports none.
    host_tempo: f64,
}

impl LoopEngine {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            manager: TrackManager::new(),
            master: MasterBus::new(sample_rate),
            clock: SequencerClock::new(),
            triggers: TriggerQueue::new(),
            playing_notes: [None; NUM_SLOTS],
            commands: None,
            scratch: StereoBuffer::silence(MAX_BUFFER_SIZE),
            premix: StereoBuffer::silence(MAX_BUFFER_SIZE),
            merged_events: Vec::with_capacity(64),
            host_tempo: 120.0,
        }
    }

    /// Engine plus the producer end of its command ring, for cross-thread
    /// embedding.
    pub fn with_command_channel(sample_rate: u32) -> (Producer<EngineCommand>, Self) {
        let (tx, rx) = command_channel();
        let mut engine = Self::new(sample_rate);
        engine.commands = Some(rx);
        (tx, engine)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        self.master.set_sample_rate(sample_rate);
    }

    /// Process one audio block.
    ///
    /// `solo_outs` must hold `NUM_SLOTS` buffers of the same length as
    /// `main_out`. Fixed order inside the block: commands, staging swaps,
    /// clock, trigger merge and MIDI dispatch, per-track render, master bus.
    pub fn process_block(
        &mut self,
        transport: Option<&HostTransport>,
        midi_in: &[MidiEvent],
        main_out: &mut StereoBuffer,
        solo_outs: &mut [StereoBuffer],
    ) {
        let block_len = main_out.len();
        debug_assert!(block_len <= MAX_BUFFER_SIZE);
        debug_assert_eq!(solo_outs.len(), NUM_SLOTS);

        self.drain_commands();
        apply_pending_swaps(&mut self.manager);

        if let Some(t) = transport {
            if t.tempo > 0.0 {
                self.host_tempo = t.tempo;
            }
        }
        self.clock.tick(&mut self.manager, transport, &self.triggers);

        self.merged_events.clear();
        self.merged_events.extend_from_slice(midi_in);
        self.triggers.drain_into(&mut self.merged_events);
        let events = std::mem::take(&mut self.merged_events);
        dispatch_midi(&mut self.manager, &mut self.playing_notes, &events);
        self.merged_events = events;

        self.premix.set_len_from_capacity(block_len);
        self.premix.fill_silence();
        self.scratch.set_len_from_capacity(block_len);

        let any_solo = self.manager.any_solo();
        for slot in 0..NUM_SLOTS {
            if let Some(out) = solo_outs.get_mut(slot) {
                out.fill_silence();
            }
            let Some(id) = self.manager.track_in_slot(slot) else {
                continue;
            };
            let Some(track) = self.manager.get_mut(id) else {
                continue;
            };

            render_track(track, self.host_tempo, &mut self.scratch);

            if track_audible(&track.shared, any_solo) {
                self.premix.add_buffer(&self.scratch);
                if let Some(out) = solo_outs.get_mut(slot) {
                    out.add_buffer(&self.scratch);
                }
            }
        }

        main_out.fill_silence();
        main_out.add_buffer(&self.premix);
        self.master.process(main_out);
    }

    fn drain_commands(&mut self) {
        if let Some(mut rx) = self.commands.take() {
            while let Ok(command) = rx.pop() {
                self.apply_command(command);
            }
            self.commands = Some(rx);
        }
    }

    /// Apply one command. Public so same-thread embeddings can skip the ring.
    pub fn apply_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::CreateTrack => {
                if let Err(e) = self.create_track() {
                    log::warn!("CreateTrack failed: {e}");
                }
            }
            EngineCommand::RemoveTrack(id) => {
                if let Err(e) = self.remove_track(id) {
                    log::warn!("RemoveTrack failed: {e}");
                }
            }
            EngineCommand::ReorderTracks(ids) => self.manager.reorder(&ids),
            EngineCommand::PlayTrack(id) => self.play_track(id),
            EngineCommand::StopTrack(id) => self.stop_track(id),
            EngineCommand::ArmTrack(id) => self.arm_track(id),
            EngineCommand::ArmTrackToStop(id) => self.arm_track_to_stop(id),
            EngineCommand::SetLoopWindow { track, start, end } => {
                if let Some(t) = self.manager.get_mut(track) {
                    t.set_loop_window(start, end);
                }
            }
            EngineCommand::SetStretchMode { track, mode } => {
                self.set_stretch_mode(track, mode);
            }
            EngineCommand::SetTempoOffsets { track, bpm_offset, fine_offset } => {
                if let Some(t) = self.manager.get_mut(track) {
                    t.bpm_offset = bpm_offset;
                    t.fine_offset = fine_offset;
                }
            }
            EngineCommand::SetStep { track, measure, step, active } => {
                if let Some(t) = self.manager.get_mut(track) {
                    t.grid.set_step(measure, step, active);
                }
            }
            EngineCommand::SetStepVelocity { track, measure, step, velocity } => {
                if let Some(t) = self.manager.get_mut(track) {
                    t.grid.set_velocity(measure, step, velocity);
                }
            }
            EngineCommand::SetNumMeasures { track, measures } => {
                if let Some(t) = self.manager.get_mut(track) {
                    t.grid.set_num_measures(measures);
                }
            }
            EngineCommand::ClearGrid(track) => {
                if let Some(t) = self.manager.get_mut(track) {
                    t.grid.clear();
                }
            }
            EngineCommand::SetBeatRepeat { track, repeat } => {
                self.set_beat_repeat(track, repeat);
            }
            EngineCommand::SetMasterVolume(v) => self.master.shared.volume.store(v),
            EngineCommand::SetMasterPan(p) => self.master.shared.pan.store(p),
            EngineCommand::SetMasterEq { low_db, mid_db, high_db } => {
                self.master.shared.eq_low_db.store(low_db);
                self.master.shared.eq_mid_db.store(mid_db);
                self.master.shared.eq_high_db.store(high_db);
            }
            EngineCommand::SetMasterEqBypass(bypass) => {
                self.master.shared.eq_bypass.store(bypass, Ordering::Relaxed);
            }
        }
    }

    pub fn create_track(&mut self) -> Result<TrackId, TrackError> {
        self.manager.create_track()
    }

    pub fn remove_track(&mut self, id: TrackId) -> Result<(), TrackError> {
        for entry in self.playing_notes.iter_mut() {
            if *entry == Some(id) {
                *entry = None;
            }
        }
        self.manager.remove_track(id).map(|_| ())
    }

    /// Start a track immediately from its loop start.
    pub fn play_track(&mut self, id: TrackId) {
        if let Some(track) = self.manager.get_mut(id) {
            if !track.has_audio() {
                return;
            }
            let sample_rate = track.audio.as_ref().map_or(0.0, |a| a.sample_rate as f64);
            track.read_position = track.loop_start * sample_rate;
            track.clock_state = ClockState::Playing;
            track.pending_action = PendingAction::None;
            track.shared.is_playing.store(true, Ordering::Relaxed);
            track.shared.is_armed.store(false, Ordering::Relaxed);
            track.shared.is_armed_to_stop.store(false, Ordering::Relaxed);
        }
    }

    /// Stop a track immediately.
    pub fn stop_track(&mut self, id: TrackId) {
        if let Some(track) = self.manager.get_mut(id) {
            track.stop();
            track.clock_state = ClockState::Idle;
            track.shared.is_armed.store(false, Ordering::Relaxed);
            track.shared.is_armed_to_stop.store(false, Ordering::Relaxed);
        }
    }

    /// Arm a track to start at its next pattern start.
    pub fn arm_track(&mut self, id: TrackId) {
        if let Some(track) = self.manager.get_mut(id) {
            track.clock_state = ClockState::ArmedToStart;
            track.pending_action = PendingAction::StartOnNextMeasure;
            track.shared.is_armed.store(true, Ordering::Relaxed);
        }
    }

    /// Arm a playing track to stop at its next pattern start.
    pub fn arm_track_to_stop(&mut self, id: TrackId) {
        if let Some(track) = self.manager.get_mut(id) {
            track.clock_state = ClockState::ArmedToStop;
            track.pending_action = PendingAction::StopOnNextMeasure;
            track.shared.is_armed_to_stop.store(true, Ordering::Relaxed);
        }
    }

    pub fn set_stretch_mode(&mut self, id: TrackId, mode: StretchMode) {
        if let Some(track) = self.manager.get_mut(id) {
            track.stretch_mode = mode;
        }
    }

    pub fn set_beat_repeat(&mut self, id: TrackId, repeat: Option<BeatRepeat>) {
        if let Some(track) = self.manager.get_mut(id) {
            track.beat_repeat = repeat;
        }
    }

    pub fn track_shared(&self, id: TrackId) -> Option<Arc<TrackShared>> {
        self.manager.get(id).map(|t| t.shared.clone())
    }

    /// The staging slot the loader should stage into for this track.
    pub fn staging_slot(&self, id: TrackId) -> Option<Arc<StagingSlot>> {
        self.manager.get(id).map(|t| t.staging.clone())
    }

    pub fn master_shared(&self) -> Arc<MasterShared> {
        self.master.shared.clone()
    }

    pub fn manager(&self) -> &TrackManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut TrackManager {
        &mut self.manager
    }

    /// Snapshot everything the session layer persists.
    pub fn capture_session(&self) -> SessionSnapshot {
        let master = &self.master.shared;
        let mut tracks = Vec::new();
        for slot in 0..NUM_SLOTS {
            let Some(id) = self.manager.track_in_slot(slot) else {
                continue;
            };
            let Some(track) = self.manager.get(id) else {
                continue;
            };
            let (steps, velocities) = TrackSnapshot::grid_arrays(&track.grid);
            tracks.push(TrackSnapshot {
                file_path: track.file_path.clone(),
                num_samples: track.audio.as_ref().map_or(0, |a| a.num_samples),
                sample_rate: track.audio.as_ref().map_or(0, |a| a.sample_rate),
                original_bpm: track.audio.as_ref().map_or(0.0, |a| a.original_bpm),
                loop_start: track.loop_start,
                loop_end: track.loop_end,
                stretch_mode: track.stretch_mode.code(),
                bpm_offset: track.bpm_offset,
                fine_offset: track.fine_offset,
                num_measures: track.grid.num_measures(),
                steps,
                velocities,
                is_playing: track.shared.is_playing.load(Ordering::Relaxed),
                is_armed: track.shared.is_armed.load(Ordering::Relaxed),
                is_muted: track.shared.is_muted.load(Ordering::Relaxed),
                is_solo: track.shared.is_solo.load(Ordering::Relaxed),
                is_enabled: track.shared.is_enabled.load(Ordering::Relaxed),
                volume: track.shared.volume.load(),
                pan: track.shared.pan.load(),
                slot,
                trigger_note: TrackManager::note_for_slot(slot),
            });
        }

        SessionSnapshot {
            tracks,
            master: MasterSnapshot {
                volume: master.volume.load(),
                pan: master.pan.load(),
                eq_low_db: master.eq_low_db.load(),
                eq_mid_db: master.eq_mid_db.load(),
                eq_high_db: master.eq_high_db.load(),
                eq_bypass: master.eq_bypass.load(Ordering::Relaxed),
            },
        }
    }

    /// Rebuild tracks from a snapshot.
    ///
    /// Parameters and grids come back immediately; audio does not. Tracks
    /// that were playing come back armed, so they start together once their
    /// audio reloads and the transport reaches their pattern start. The
    /// caller reissues loads through the loader using each snapshot's path.
    pub fn restore_session(&mut self, session: &SessionSnapshot) {
        for id in self.manager.track_ids() {
            let _ = self.manager.remove_track(id);
        }
        self.playing_notes = [None; NUM_SLOTS];

        for snap in &session.tracks {
            let id = match self.manager.create_track_in_slot(snap.slot) {
                Ok(id) => id,
                Err(e) => {
                    log::warn!("Skipping track in slot {}: {e}", snap.slot);
                    continue;
                }
            };
            if let Some(track) = self.manager.get_mut(id) {
                track.file_path = snap.file_path.clone();
                track.loop_start = snap.loop_start;
                track.loop_end = snap.loop_end;
                track.stretch_mode = StretchMode::from_code(snap.stretch_mode);
                track.bpm_offset = snap.bpm_offset;
                track.fine_offset = snap.fine_offset;
                track.grid = snap.grid();
                if snap.is_playing || snap.is_armed {
                    track.clock_state = ClockState::ArmedToStart;
                    track.pending_action = PendingAction::StartOnNextMeasure;
                    track.shared.is_armed.store(true, Ordering::Relaxed);
                }
                track.shared.is_muted.store(snap.is_muted, Ordering::Relaxed);
                track.shared.is_solo.store(snap.is_solo, Ordering::Relaxed);
                track.shared.is_enabled.store(snap.is_enabled, Ordering::Relaxed);
                track.shared.volume.store(snap.volume);
                track.shared.pan.store(snap.pan);
            }
        }

        let master = &self.master.shared;
        master.volume.store(session.master.volume);
        master.pan.store(session.master.pan);
        master.eq_low_db.store(session.master.eq_low_db);
        master.eq_mid_db.store(session.master.eq_mid_db);
        master.eq_high_db.store(session.master.eq_high_db);
        master.eq_bypass.store(session.master.eq_bypass, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use basedrop::Shared;

    use crate::engine::gc::gc_handle;
    use crate::track::StagedAudio;
    use crate::types::StereoSample;

    fn solo_buses(len: usize) -> Vec<StereoBuffer> {
        (0..NUM_SLOTS).map(|_| StereoBuffer::silence(len)).collect()
    }

    fn stage_constant(engine: &mut LoopEngine, id: TrackId, value: f32) {
        let mut samples = StereoBuffer::silence(4 * 48_000);
        for frame in samples.iter_mut() {
            *frame = StereoSample::mono(value);
        }
        engine.staging_slot(id).unwrap().stage(StagedAudio {
            buffer: Shared::new(&gc_handle(), samples),
            num_samples: 4 * 48_000,
            sample_rate: 48_000,
            original_bpm: 120.0,
            path: PathBuf::from("/tmp/engine.wav"),
        });
    }

    fn transport(ppq: f64) -> HostTransport {
        HostTransport::new(true, 120.0, ppq)
    }

    #[test]
    fn test_block_renders_playing_track() {
        let mut engine = LoopEngine::new(48_000);
        let id = engine.create_track().unwrap();
        stage_constant(&mut engine, id, 0.5);
        engine.track_shared(id).unwrap().volume.store(1.0);

        let mut main = StereoBuffer::silence(128);
        let mut solos = solo_buses(128);
        // First block swaps the audio in; then start and render.
        engine.process_block(Some(&transport(0.0)), &[], &mut main, &mut solos);
        engine.play_track(id);
        engine.process_block(Some(&transport(0.01)), &[], &mut main, &mut solos);

        assert!((main[64].left - 0.5).abs() < 0.01);
        assert!((solos[0][64].left - 0.5).abs() < 0.01);
        assert_eq!(solos[1][64], StereoSample::silence());
    }

    #[test]
    fn test_solo_silences_other_tracks_in_main_mix() {
        let mut engine = LoopEngine::new(48_000);
        let a = engine.create_track().unwrap();
        let b = engine.create_track().unwrap();
        stage_constant(&mut engine, a, 0.4);
        stage_constant(&mut engine, b, 0.3);
        engine.track_shared(a).unwrap().volume.store(1.0);
        engine.track_shared(b).unwrap().volume.store(1.0);
        engine.track_shared(b).unwrap().is_solo.store(true, Ordering::Relaxed);

        let mut main = StereoBuffer::silence(64);
        let mut solos = solo_buses(64);
        engine.process_block(Some(&transport(0.0)), &[], &mut main, &mut solos);
        engine.play_track(a);
        engine.play_track(b);
        engine.process_block(Some(&transport(0.01)), &[], &mut main, &mut solos);

        // Only the soloed track reaches the main mix.
        assert!((main[32].left - 0.3).abs() < 0.01);
        assert_eq!(solos[0][32], StereoSample::silence());
        assert!((solos[1][32].left - 0.3).abs() < 0.01);
    }

    #[test]
    fn test_commands_processed_at_block_top() {
        let (mut tx, mut engine) = LoopEngine::with_command_channel(48_000);
        tx.push(EngineCommand::CreateTrack).unwrap();
        tx.push(EngineCommand::SetMasterVolume(0.5)).unwrap();

        let mut main = StereoBuffer::silence(32);
        let mut solos = solo_buses(32);
        engine.process_block(None, &[], &mut main, &mut solos);

        assert_eq!(engine.manager().len(), 1);
        assert_eq!(engine.master_shared().volume.load(), 0.5);
    }

    #[test]
    fn test_external_note_on_starts_track() {
        let mut engine = LoopEngine::new(48_000);
        let id = engine.create_track().unwrap();
        stage_constant(&mut engine, id, 0.2);

        let mut main = StereoBuffer::silence(64);
        let mut solos = solo_buses(64);
        engine.process_block(Some(&transport(0.0)), &[], &mut main, &mut solos);
        engine.process_block(
            Some(&transport(0.01)),
            &[MidiEvent::NoteOn { channel: 0, note: 60, velocity: 100 }],
            &mut main,
            &mut solos,
        );

        assert!(engine.track_shared(id).unwrap().is_playing.load(Ordering::Relaxed));
        assert!(main[32].left > 0.0);
    }

    #[test]
    fn test_session_round_trip_restores_parameters() {
        let mut engine = LoopEngine::new(48_000);
        let id = engine.create_track().unwrap();
        stage_constant(&mut engine, id, 0.1);
        let mut main = StereoBuffer::silence(32);
        let mut solos = solo_buses(32);
        engine.process_block(Some(&transport(0.0)), &[], &mut main, &mut solos);

        engine.apply_command(EngineCommand::SetStep { track: id, measure: 0, step: 3, active: true });
        engine.set_stretch_mode(id, StretchMode::HostSync);
        engine.track_shared(id).unwrap().volume.store(0.6);
        engine.play_track(id);
        engine.master_shared().eq_high_db.store(-4.0);

        let session = engine.capture_session();
        let json = session.to_json().unwrap();
        let restored = SessionSnapshot::from_json(&json).unwrap();

        let mut fresh = LoopEngine::new(48_000);
        fresh.restore_session(&restored);
        let ids = fresh.manager().track_ids();
        assert_eq!(ids.len(), 1);
        let track = fresh.manager().get(ids[0]).unwrap();
        assert_eq!(track.stretch_mode, StretchMode::HostSync);
        assert!(track.grid.is_active(0, 3));
        assert_eq!(track.shared.volume.load(), 0.6);
        // Playing state comes back as armed, not playing.
        assert!(track.shared.is_armed.load(Ordering::Relaxed));
        assert!(!track.shared.is_playing.load(Ordering::Relaxed));
        assert_eq!(fresh.master_shared().eq_high_db.load(), -4.0);
    }
}
