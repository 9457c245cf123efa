//! Per-track sample rendering
//!
//! One track, one block: linear-interpolated reads at a fractional cursor
//! advancing by the playback ratio, volume and linear pan applied per sample,
//! a short fade into the loop-window end. Writes the track's raw contribution
//! into a scratch buffer; mixing and the solo policy happen downstream.

use std::sync::atomic::Ordering;

use crate::stretch::playback_ratio;
use crate::track::Track;
use crate::types::{Sample, StereoBuffer, StereoSample};

/// Linear fade length before the loop-window end.
const LOOP_END_FADE_SAMPLES: f64 = 64.0;

/// Loop sections shorter than this are considered degenerate and fall back
/// to the whole buffer.
const MIN_LOOP_SECTION_SAMPLES: usize = 100;

/// Render one track into `out` (overwritten; silenced first).
///
/// A track renders only while enabled, playing, and loaded. Reaching the end
/// of the loop window stops the track and rewinds the cursor; the sequencer
/// clock retriggers it at the next active step. Any out-of-range read stops
/// the track defensively instead of panicking.
pub fn render_track(track: &mut Track, host_tempo: f64, out: &mut StereoBuffer) {
    out.fill_silence();

    let shared = track.shared.clone();
    if !shared.is_enabled.load(Ordering::Relaxed)
        || !shared.is_playing.load(Ordering::Relaxed)
        || !track.has_audio()
    {
        shared.is_currently_playing.store(false, Ordering::Relaxed);
        return;
    }

    let Some(audio) = track.audio.as_ref() else {
        shared.is_currently_playing.store(false, Ordering::Relaxed);
        return;
    };
    let buffer = audio.buffer.clone();
    let num_samples = audio.num_samples.min(buffer.len());
    let sample_rate = audio.sample_rate as f64;
    let original_bpm = audio.original_bpm;
    if num_samples == 0 {
        shared.is_currently_playing.store(false, Ordering::Relaxed);
        return;
    }

    let ratio = playback_ratio(
        track.stretch_mode,
        original_bpm,
        host_tempo,
        track.bpm_offset,
        track.fine_offset,
    );
    shared.cached_ratio.store(ratio as f32);

    // Loop bounds in buffer samples. Degenerate sections use the whole buffer.
    let mut loop_start = ((track.loop_start * sample_rate) as usize).min(num_samples - 1);
    let mut loop_end = ((track.loop_end * sample_rate) as usize).clamp(loop_start + 1, num_samples);
    if loop_end - loop_start < MIN_LOOP_SECTION_SAMPLES {
        loop_start = 0;
        loop_end = num_samples;
    }
    let loop_end_f = loop_end as f64;

    // Beat-repeat window in buffer samples, anchored at the loop start.
    let repeat = track.beat_repeat.and_then(|br| {
        if original_bpm <= 0.0 || br.length_beats <= 0.0 {
            return None;
        }
        let samples_per_beat = 60.0 / original_bpm * sample_rate;
        let start = loop_start as f64 + br.start_beat * samples_per_beat;
        let end = (start + br.length_beats * samples_per_beat).min(loop_end_f);
        (end > start).then_some((start, end))
    });

    let volume = shared.volume.load();
    let pan = shared.pan.load().clamp(-1.0, 1.0);
    let left_gain = if pan > 0.0 { 1.0 - pan } else { 1.0 };
    let right_gain = if pan < 0.0 { 1.0 + pan } else { 1.0 };

    shared.is_currently_playing.store(true, Ordering::Relaxed);

    for frame in out.iter_mut() {
        if let Some((repeat_start, repeat_end)) = repeat {
            if track.read_position >= repeat_end {
                track.read_position = repeat_start;
            }
        }

        let pos = track.read_position;
        if pos >= loop_end_f {
            track.read_position = 0.0;
            shared.is_playing.store(false, Ordering::Relaxed);
            shared.is_currently_playing.store(false, Ordering::Relaxed);
            break;
        }

        let index = pos as usize;
        if index >= num_samples {
            // Stale cursor after a window change; stop instead of reading out
            // of bounds.
            log::warn!("Cursor {} past buffer end on {}, stopping", index, track.id);
            track.read_position = 0.0;
            shared.is_playing.store(false, Ordering::Relaxed);
            shared.is_currently_playing.store(false, Ordering::Relaxed);
            break;
        }

        let frac = (pos - index as f64) as Sample;
        let a = buffer[index];
        let b = if index + 1 < num_samples { buffer[index + 1] } else { a };
        let interpolated = StereoSample::new(
            a.left + (b.left - a.left) * frac,
            a.right + (b.right - a.right) * frac,
        );

        let remaining = loop_end_f - pos;
        let fade = if remaining < LOOP_END_FADE_SAMPLES {
            (remaining / LOOP_END_FADE_SAMPLES) as Sample
        } else {
            1.0
        };

        let gain = volume * fade;
        *frame = StereoSample::new(
            interpolated.left * gain * left_gain,
            interpolated.right * gain * right_gain,
        );

        track.read_position += ratio;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use basedrop::Shared;

    use crate::engine::gc::gc_handle;
    use crate::stretch::StretchMode;
    use crate::track::{BeatRepeat, StagedAudio};
    use crate::types::TrackId;

    fn track_with_ramp(num_samples: usize, bpm: f64) -> Track {
        let mut samples = StereoBuffer::with_capacity(num_samples);
        for i in 0..num_samples {
            samples.push(StereoSample::mono(i as Sample));
        }
        let mut track = Track::new(TrackId(1));
        track.install_audio(StagedAudio {
            buffer: Shared::new(&gc_handle(), samples),
            num_samples,
            sample_rate: 48_000,
            original_bpm: bpm,
            path: PathBuf::from("/tmp/ramp.wav"),
        });
        track.shared.is_playing.store(true, Ordering::Relaxed);
        track.shared.volume.store(1.0);
        track
    }

    #[test]
    fn test_unity_ratio_copies_samples() {
        let mut track = track_with_ramp(48_000, 120.0);
        track.stretch_mode = StretchMode::Fixed;
        let mut out = StereoBuffer::silence(64);

        render_track(&mut track, 120.0, &mut out);

        assert_eq!(out[0].left, 0.0);
        assert_eq!(out[10].left, 10.0);
        assert_eq!(track.read_position, 64.0);
        assert!(track.shared.is_currently_playing.load(Ordering::Relaxed));
    }

    #[test]
    fn test_fractional_cursor_interpolates() {
        let mut track = track_with_ramp(48_000, 120.0);
        track.stretch_mode = StretchMode::Fixed;
        track.read_position = 5.5;
        let mut out = StereoBuffer::silence(1);

        render_track(&mut track, 120.0, &mut out);
        assert!((out[0].left - 5.5).abs() < 1e-4);
    }

    #[test]
    fn test_loop_window_maps_to_samples_and_stops() {
        // Two-second window at 48kHz ends at sample 96000.
        let mut track = track_with_ramp(4 * 48_000, 120.0);
        track.stretch_mode = StretchMode::Fixed;
        track.set_loop_window(0.0, 2.0);
        track.read_position = 96_000.0 - 10.0;
        let mut out = StereoBuffer::silence(64);

        render_track(&mut track, 120.0, &mut out);

        // Ten samples rendered, then the track stops and rewinds.
        assert!(out[9].left > 0.0);
        assert_eq!(out[10], StereoSample::silence());
        assert!(!track.shared.is_playing.load(Ordering::Relaxed));
        assert_eq!(track.read_position, 0.0);
    }

    #[test]
    fn test_fade_before_loop_end() {
        let mut track = track_with_ramp(48_000, 120.0);
        track.stretch_mode = StretchMode::Fixed;
        track.read_position = 48_000.0 - 32.0;
        let mut out = StereoBuffer::silence(16);

        render_track(&mut track, 120.0, &mut out);

        // 32 samples from the end the fade gain is 0.5.
        let expected = (48_000.0 - 32.0) * 0.5;
        assert!((out[0].left - expected as f32).abs() / (expected as f32) < 1e-3);
    }

    #[test]
    fn test_pan_law() {
        let mut track = track_with_ramp(48_000, 120.0);
        track.stretch_mode = StretchMode::Fixed;
        track.read_position = 100.0;
        track.shared.pan.store(-0.5);
        let mut out = StereoBuffer::silence(1);

        render_track(&mut track, 120.0, &mut out);
        // Negative pan attenuates the right channel by 1 + pan.
        assert!((out[0].left - 100.0).abs() < 1e-3);
        assert!((out[0].right - 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_tiny_loop_section_falls_back_to_whole_buffer() {
        let mut track = track_with_ramp(48_000, 120.0);
        track.stretch_mode = StretchMode::Fixed;
        // 50 samples is below the minimum section length.
        track.loop_start = 0.0;
        track.loop_end = 50.0 / 48_000.0;
        track.read_position = 40_000.0;
        let mut out = StereoBuffer::silence(8);

        render_track(&mut track, 120.0, &mut out);
        // Still playing well past the degenerate window.
        assert!(track.shared.is_playing.load(Ordering::Relaxed));
        assert!(out[0].left > 0.0);
    }

    #[test]
    fn test_host_sync_advances_by_ratio() {
        let mut track = track_with_ramp(48_000, 120.0);
        track.stretch_mode = StretchMode::HostSync;
        let mut out = StereoBuffer::silence(32);

        render_track(&mut track, 135.0, &mut out);
        assert!((track.read_position - 32.0 * 1.125).abs() < 1e-9);
        assert_eq!(track.shared.cached_ratio.load(), 1.125);
    }

    #[test]
    fn test_beat_repeat_jumps_back() {
        // One beat at 120 BPM is 24000 samples at 48kHz.
        let mut track = track_with_ramp(4 * 48_000, 120.0);
        track.stretch_mode = StretchMode::Fixed;
        track.beat_repeat = Some(BeatRepeat { start_beat: 0.0, length_beats: 1.0 });
        track.read_position = 24_000.0 - 2.0;
        let mut out = StereoBuffer::silence(8);

        render_track(&mut track, 120.0, &mut out);
        // After crossing the window end the cursor wrapped to its start.
        assert!(track.read_position < 24_000.0);
        assert!(out[4].left < 10.0);
    }

    #[test]
    fn test_disabled_track_renders_silence() {
        let mut track = track_with_ramp(48_000, 120.0);
        track.shared.is_enabled.store(false, Ordering::Relaxed);
        let mut out = StereoBuffer::silence(16);
        out[3] = StereoSample::mono(9.9);

        render_track(&mut track, 120.0, &mut out);
        assert_eq!(out[3], StereoSample::silence());
        assert!(!track.shared.is_currently_playing.load(Ordering::Relaxed));
    }
}
