//! Playback-rate decision and offline time-stretching
//!
//! Live playback never resamples: the renderer advances its read cursor by a
//! playback ratio computed here once per block. Heavy-quality stretching only
//! happens offline, in the loader pipeline, via signalsmith-stretch.

use signalsmith_stretch::Stretch;

use crate::types::StereoBuffer;

/// Stereo processing.
const CHANNELS: u32 = 2;

/// Bounds on the per-track playback ratio. Anything outside this range is a
/// configuration error upstream, so the decision unit clamps.
pub const MIN_PLAYBACK_RATIO: f64 = 0.25;
pub const MAX_PLAYBACK_RATIO: f64 = 4.0;

/// Policy selecting how a track's playback rate relates to its original tempo
/// and the host tempo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum StretchMode {
    /// Play at the recorded rate regardless of tempo.
    Fixed,
    /// Nudge the recorded tempo by the manual offsets.
    ManualOffset,
    /// Follow the host tempo exactly.
    HostSync,
    /// Follow the host tempo plus the manual offsets.
    #[default]
    HostSyncWithOffset,
}

impl StretchMode {
    /// Numeric code used in persisted sessions (1-4, matching the legacy
    /// session format).
    pub fn code(self) -> u8 {
        match self {
            StretchMode::Fixed => 1,
            StretchMode::ManualOffset => 2,
            StretchMode::HostSync => 3,
            StretchMode::HostSyncWithOffset => 4,
        }
    }

    /// Inverse of [`code`](Self::code). Unknown codes map to the default.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => StretchMode::Fixed,
            2 => StretchMode::ManualOffset,
            3 => StretchMode::HostSync,
            _ => StretchMode::HostSyncWithOffset,
        }
    }
}

/// Compute the playback ratio for one track.
///
/// Pure and deterministic; called once per block per track to refresh the
/// cached ratio the renderer advances by. The result is always clamped to
/// `[MIN_PLAYBACK_RATIO, MAX_PLAYBACK_RATIO]`, and `Fixed` always yields 1.0
/// no matter what the host tempo does.
pub fn playback_ratio(
    mode: StretchMode,
    original_bpm: f64,
    host_tempo: f64,
    bpm_offset: f64,
    fine_offset: f64,
) -> f64 {
    if original_bpm <= 0.0 {
        return 1.0;
    }

    let ratio = match mode {
        StretchMode::Fixed => 1.0,
        StretchMode::ManualOffset => {
            (original_bpm + bpm_offset + fine_offset) / original_bpm
        }
        StretchMode::HostSync => host_tempo / original_bpm,
        StretchMode::HostSyncWithOffset => {
            (host_tempo + bpm_offset + fine_offset) / original_bpm
        }
    };

    ratio.clamp(MIN_PLAYBACK_RATIO, MAX_PLAYBACK_RATIO)
}

/// Whole-buffer time stretcher for the loader pipeline.
///
/// Wraps signalsmith-stretch. This runs on the loader thread only; the audio
/// callback never sees it.
pub struct OfflineStretcher {
    stretcher: Stretch,
}

impl OfflineStretcher {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            stretcher: Stretch::preset_default(CHANNELS, sample_rate),
        }
    }

    /// Stretch `source` by `ratio` (output plays `ratio` times faster than
    /// the input, so the output holds `input_len / ratio` frames).
    ///
    /// The stretcher's startup latency is compensated by flushing the tail
    /// and discarding the warm-up frames, so the output starts where the
    /// input did.
    pub fn stretch(&mut self, source: &StereoBuffer, ratio: f64) -> StereoBuffer {
        if source.is_empty() || ratio <= 0.0 || (ratio - 1.0).abs() < 0.001 {
            return source.clone();
        }

        self.stretcher.reset();

        let output_len = ((source.len() as f64) / ratio).ceil() as usize;
        let latency = self.stretcher.output_latency();

        // Room for the stretched body plus the latency tail recovered by flush.
        let mut padded = StereoBuffer::silence(output_len + latency);
        self.stretcher
            .process(source.as_interleaved(), padded.as_interleaved_mut());

        let mut tail = StereoBuffer::silence(latency);
        self.stretcher.flush(tail.as_interleaved_mut());

        // The first `latency` output frames are warm-up; drop them and take
        // `output_len` frames from the concatenation of body and tail.
        let mut out = StereoBuffer::with_capacity(output_len);
        for i in 0..output_len {
            let src = i + latency;
            if src < padded.len() {
                out.push(padded[src]);
            } else if src - padded.len() < tail.len() {
                out.push(tail[src - padded.len()]);
            } else {
                out.push(crate::types::StereoSample::silence());
            }
        }
        out
    }
}
