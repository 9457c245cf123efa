//! Fundamental audio types shared across the engine
//!
//! Stereo sample/buffer types used on the audio callback, plus the small
//! word-sized primitives (atomic f32, track identifiers, host transport
//! snapshots) that cross thread boundaries without locks.

use std::ops::{Index, IndexMut};
use std::sync::atomic::{AtomicU32, Ordering};

/// Number of track slots. Each slot maps to one MIDI trigger note and one
/// solo output bus.
pub const NUM_SLOTS: usize = 8;

/// Default engine sample rate (48kHz). The actual rate comes from the host.
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Largest block size we pre-allocate for. Covers every host buffer size we
/// have seen in the wild (64..4096) with headroom, so the audio callback
/// never allocates.
pub const MAX_BUFFER_SIZE: usize = 8192;

/// Audio sample type used for all processing.
pub type Sample = f32;

/// One stereo frame.
///
/// `#[repr(C)]` guarantees the `[left, right]` layout, so a `&[StereoSample]`
/// can be reinterpreted as interleaved `&[f32]` via bytemuck when handing
/// audio to the offline stretcher or a WAV writer.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StereoSample {
    pub left: Sample,
    pub right: Sample,
}

impl StereoSample {
    #[inline]
    pub fn new(left: Sample, right: Sample) -> Self {
        Self { left, right }
    }

    #[inline]
    pub fn silence() -> Self {
        Self::default()
    }

    /// Same value in both channels.
    #[inline]
    pub fn mono(value: Sample) -> Self {
        Self { left: value, right: value }
    }
}

impl std::ops::Add for StereoSample {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Self::new(self.left + other.left, self.right + other.right)
    }
}

impl std::ops::AddAssign for StereoSample {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.left += other.left;
        self.right += other.right;
    }
}

impl std::ops::Mul<Sample> for StereoSample {
    type Output = Self;

    #[inline]
    fn mul(self, factor: Sample) -> Self {
        Self::new(self.left * factor, self.right * factor)
    }
}

impl std::ops::MulAssign<Sample> for StereoSample {
    #[inline]
    fn mul_assign(&mut self, factor: Sample) {
        self.left *= factor;
        self.right *= factor;
    }
}

/// A buffer of stereo frames.
///
/// The audio-thread buffers are allocated once at `MAX_BUFFER_SIZE` capacity;
/// `set_len_from_capacity` then adjusts the working length per block without
/// touching the allocator.
#[derive(Debug, Clone, Default)]
pub struct StereoBuffer {
    samples: Vec<StereoSample>,
}

impl StereoBuffer {
    /// Create a buffer of `len` silent frames.
    pub fn silence(len: usize) -> Self {
        Self { samples: vec![StereoSample::silence(); len] }
    }

    /// Create an empty buffer with room for `capacity` frames.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { samples: Vec::with_capacity(capacity) }
    }

    /// Build a buffer from interleaved samples `[L, R, L, R, ...]`.
    pub fn from_interleaved(interleaved: &[Sample]) -> Self {
        assert!(interleaved.len() % 2 == 0, "interleaved data must pair L/R");
        let samples = interleaved
            .chunks_exact(2)
            .map(|f| StereoSample::new(f[0], f[1]))
            .collect();
        Self { samples }
    }

    pub fn from_vec(samples: Vec<StereoSample>) -> Self {
        Self { samples }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Adjust the working length of a pre-allocated buffer.
    ///
    /// Real-time safe as long as `new_len` stays within the capacity reserved
    /// at construction; newly exposed frames are silenced.
    #[inline]
    pub fn set_len_from_capacity(&mut self, new_len: usize) {
        debug_assert!(
            new_len <= self.samples.capacity(),
            "working length {} exceeds reserved capacity {}",
            new_len,
            self.samples.capacity()
        );
        if new_len <= self.samples.len() {
            self.samples.truncate(new_len);
        } else {
            self.samples.resize(new_len, StereoSample::silence());
        }
    }

    /// Grow or shrink the buffer, silencing new frames. Not for the audio path.
    pub fn resize(&mut self, new_len: usize) {
        self.samples.resize(new_len, StereoSample::silence());
    }

    pub fn fill_silence(&mut self) {
        self.samples.fill(StereoSample::silence());
    }

    #[inline]
    pub fn as_slice(&self) -> &[StereoSample] {
        &self.samples
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [StereoSample] {
        &mut self.samples
    }

    /// Zero-copy view as interleaved `[L, R, L, R, ...]`.
    #[inline]
    pub fn as_interleaved(&self) -> &[Sample] {
        bytemuck::cast_slice(&self.samples)
    }

    /// Zero-copy mutable view as interleaved `[L, R, L, R, ...]`.
    #[inline]
    pub fn as_interleaved_mut(&mut self) -> &mut [Sample] {
        bytemuck::cast_slice_mut(&mut self.samples)
    }

    /// Sum another buffer into this one. Lengths must match.
    pub fn add_buffer(&mut self, other: &StereoBuffer) {
        assert_eq!(self.len(), other.len(), "buffer lengths must match");
        for (dst, src) in self.samples.iter_mut().zip(other.samples.iter()) {
            *dst += *src;
        }
    }

    pub fn scale(&mut self, factor: Sample) {
        for sample in &mut self.samples {
            *sample *= factor;
        }
    }

    #[inline]
    pub fn push(&mut self, sample: StereoSample) {
        self.samples.push(sample);
    }

    pub fn iter(&self) -> impl Iterator<Item = &StereoSample> {
        self.samples.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut StereoSample> {
        self.samples.iter_mut()
    }
}

impl Index<usize> for StereoBuffer {
    type Output = StereoSample;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.samples[index]
    }
}

impl IndexMut<usize> for StereoBuffer {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.samples[index]
    }
}

/// Atomic f32 stored as raw bits in an `AtomicU32`.
///
/// All accesses are `Relaxed`: these are single-writer parameter values where
/// a one-block-old read is acceptable, never synchronization points.
#[derive(Debug)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Stable track identifier, unique for the lifetime of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct TrackId(pub u64);

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "track-{}", self.0)
    }
}

/// Per-block snapshot of the host transport.
///
/// `ppq` is the pulses-per-quarter-note position at the start of the block.
/// When the host cannot provide position information the engine receives
/// `None` instead of a snapshot and the sequencer holds its state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostTransport {
    /// True while the host transport is rolling.
    pub playing: bool,
    /// Host tempo in BPM.
    pub tempo: f64,
    /// Beat position (quarter notes) at the start of the block.
    pub ppq: f64,
}

impl HostTransport {
    pub fn new(playing: bool, tempo: f64, ppq: f64) -> Self {
        Self { playing, tempo, ppq }
    }
}
