//! Master mix bus: solo policy, 3-band EQ, smoothed volume, balance
//!
//! Track contributions are summed upstream; this module owns everything that
//! happens to the main mix after the sum. The EQ is a fixed 3-band biquad
//! chain (RBJ cookbook): low shelf at 200 Hz, mid peak at 1 kHz, high shelf
//! at 8 kHz, each ±12 dB.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::track::TrackShared;
use crate::types::{AtomicF32, Sample, StereoBuffer, StereoSample};

const LOW_SHELF_HZ: f32 = 200.0;
const MID_PEAK_HZ: f32 = 1_000.0;
const MID_PEAK_Q: f32 = 1.0;
const HIGH_SHELF_HZ: f32 = 8_000.0;
const EQ_GAIN_RANGE_DB: f32 = 12.0;

/// Gain changes below this don't trigger a coefficient recompute.
const EQ_RECOMPUTE_THRESHOLD_DB: f32 = 0.1;

/// One-pole coefficient for master volume smoothing.
const VOLUME_SMOOTHING: f32 = 0.001;

/// Master parameters written by the control thread, read once per block.
pub struct MasterShared {
    pub volume: AtomicF32,
    pub pan: AtomicF32,
    pub eq_low_db: AtomicF32,
    pub eq_mid_db: AtomicF32,
    pub eq_high_db: AtomicF32,
    pub eq_bypass: AtomicBool,
}

impl Default for MasterShared {
    fn default() -> Self {
        Self {
            volume: AtomicF32::new(1.0),
            pan: AtomicF32::new(0.0),
            eq_low_db: AtomicF32::new(0.0),
            eq_mid_db: AtomicF32::new(0.0),
            eq_high_db: AtomicF32::new(0.0),
            eq_bypass: AtomicBool::new(false),
        }
    }
}

/// Solo policy: a track reaches the main mix iff it is not muted and either
/// nothing is soloed or it is soloed itself.
pub fn track_audible(shared: &TrackShared, any_solo: bool) -> bool {
    let muted = shared.is_muted.load(Ordering::Relaxed);
    let solo = shared.is_solo.load(Ordering::Relaxed);
    !muted && (!any_solo || solo)
}

/// Stereo biquad, transposed direct form II.
#[derive(Debug, Clone, Copy)]
struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    z1: [f32; 2],
    z2: [f32; 2],
}

impl Biquad {
    fn identity() -> Self {
        Self { b0: 1.0, b1: 0.0, b2: 0.0, a1: 0.0, a2: 0.0, z1: [0.0; 2], z2: [0.0; 2] }
    }

    fn set(&mut self, b0: f32, b1: f32, b2: f32, a0: f32, a1: f32, a2: f32) {
        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = a1 / a0;
        self.a2 = a2 / a0;
    }

    fn low_shelf(&mut self, sample_rate: f32, freq: f32, gain_db: f32) {
        let a = 10f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / 2.0 * std::f32::consts::SQRT_2;
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        self.set(
            a * ((a + 1.0) - (a - 1.0) * cos + two_sqrt_a_alpha),
            2.0 * a * ((a - 1.0) - (a + 1.0) * cos),
            a * ((a + 1.0) - (a - 1.0) * cos - two_sqrt_a_alpha),
            (a + 1.0) + (a - 1.0) * cos + two_sqrt_a_alpha,
            -2.0 * ((a - 1.0) + (a + 1.0) * cos),
            (a + 1.0) + (a - 1.0) * cos - two_sqrt_a_alpha,
        );
    }

    fn peak(&mut self, sample_rate: f32, freq: f32, q: f32, gain_db: f32) {
        let a = 10f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);

        self.set(
            1.0 + alpha * a,
            -2.0 * cos,
            1.0 - alpha * a,
            1.0 + alpha / a,
            -2.0 * cos,
            1.0 - alpha / a,
        );
    }

    fn high_shelf(&mut self, sample_rate: f32, freq: f32, gain_db: f32) {
        let a = 10f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / 2.0 * std::f32::consts::SQRT_2;
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        self.set(
            a * ((a + 1.0) + (a - 1.0) * cos + two_sqrt_a_alpha),
            -2.0 * a * ((a - 1.0) + (a + 1.0) * cos),
            a * ((a + 1.0) + (a - 1.0) * cos - two_sqrt_a_alpha),
            (a + 1.0) - (a - 1.0) * cos + two_sqrt_a_alpha,
            2.0 * ((a - 1.0) - (a + 1.0) * cos),
            (a + 1.0) - (a - 1.0) * cos - two_sqrt_a_alpha,
        );
    }

    #[inline]
    fn process(&mut self, frame: StereoSample) -> StereoSample {
        let input = [frame.left, frame.right];
        let mut output = [0.0f32; 2];
        for ch in 0..2 {
            let x = input[ch];
            let y = self.b0 * x + self.z1[ch];
            self.z1[ch] = self.b1 * x - self.a1 * y + self.z2[ch];
            self.z2[ch] = self.b2 * x - self.a2 * y;
            output[ch] = y;
        }
        StereoSample::new(output[0], output[1])
    }

    fn reset_state(&mut self) {
        self.z1 = [0.0; 2];
        self.z2 = [0.0; 2];
    }
}

/// The master bus processor. Lives on the audio thread.
pub struct MasterBus {
    pub shared: Arc<MasterShared>,
    sample_rate: f32,
    low: Biquad,
    mid: Biquad,
    high: Biquad,
    applied_low_db: f32,
    applied_mid_db: f32,
    applied_high_db: f32,
    smoothed_volume: f32,
}

impl MasterBus {
    pub fn new(sample_rate: u32) -> Self {
        let mut bus = Self {
            shared: Arc::new(MasterShared::default()),
            sample_rate: sample_rate as f32,
            low: Biquad::identity(),
            mid: Biquad::identity(),
            high: Biquad::identity(),
            applied_low_db: 0.0,
            applied_mid_db: 0.0,
            applied_high_db: 0.0,
            smoothed_volume: 1.0,
        };
        bus.recompute_eq(0.0, 0.0, 0.0);
        bus
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate as f32;
        self.recompute_eq(self.applied_low_db, self.applied_mid_db, self.applied_high_db);
        self.low.reset_state();
        self.mid.reset_state();
        self.high.reset_state();
    }

    fn recompute_eq(&mut self, low_db: f32, mid_db: f32, high_db: f32) {
        self.low.low_shelf(self.sample_rate, LOW_SHELF_HZ, low_db);
        self.mid.peak(self.sample_rate, MID_PEAK_HZ, MID_PEAK_Q, mid_db);
        self.high.high_shelf(self.sample_rate, HIGH_SHELF_HZ, high_db);
        self.applied_low_db = low_db;
        self.applied_mid_db = mid_db;
        self.applied_high_db = high_db;
    }

    fn refresh_eq(&mut self) {
        let low = self.shared.eq_low_db.load().clamp(-EQ_GAIN_RANGE_DB, EQ_GAIN_RANGE_DB);
        let mid = self.shared.eq_mid_db.load().clamp(-EQ_GAIN_RANGE_DB, EQ_GAIN_RANGE_DB);
        let high = self.shared.eq_high_db.load().clamp(-EQ_GAIN_RANGE_DB, EQ_GAIN_RANGE_DB);
        if (low - self.applied_low_db).abs() > EQ_RECOMPUTE_THRESHOLD_DB
            || (mid - self.applied_mid_db).abs() > EQ_RECOMPUTE_THRESHOLD_DB
            || (high - self.applied_high_db).abs() > EQ_RECOMPUTE_THRESHOLD_DB
        {
            self.recompute_eq(low, mid, high);
        }
    }

    /// Process the summed main mix in place.
    pub fn process(&mut self, mix: &mut StereoBuffer) {
        self.refresh_eq();

        let bypass = self.shared.eq_bypass.load(Ordering::Relaxed);
        let target_volume = self.shared.volume.load();
        let pan = self.shared.pan.load().clamp(-1.0, 1.0);
        let left_gain: Sample = if pan > 0.0 { 1.0 - pan } else { 1.0 };
        let right_gain: Sample = if pan < 0.0 { 1.0 + pan } else { 1.0 };

        for frame in mix.iter_mut() {
            let mut sample = *frame;
            if !bypass {
                sample = self.low.process(sample);
                sample = self.mid.process(sample);
                sample = self.high.process(sample);
            }

            self.smoothed_volume += (target_volume - self.smoothed_volume) * VOLUME_SMOOTHING;
            *frame = StereoSample::new(
                sample.left * self.smoothed_volume * left_gain,
                sample.right * self.smoothed_volume * right_gain,
            );
        }
    }
}
