//! Tempo estimation and correction policy
//!
//! The BPM detector itself is a black box behind the [`TempoEstimator`]
//! trait; the engine only cares about the policy layered on top: when to
//! trust a detected tempo, when to keep the supplied one, and when an
//! offline stretch to the host tempo is warranted.

use crate::types::{Sample, StereoBuffer};

/// Detected tempos within this fraction of exactly double or half the host
/// tempo are treated as octave ambiguities of the detector.
const AMBIGUITY_TOLERANCE: f64 = 0.2;

/// Musically plausible tempo range for loop material. Estimates outside it
/// fall back to the supplied tempo.
const PLAUSIBLE_BPM_MIN: f64 = 60.0;
const PLAUSIBLE_BPM_MAX: f64 = 200.0;

/// Below this distance from the host tempo a stretch is not worth the
/// artifacts.
const STRETCH_THRESHOLD_BPM: f64 = 1.0;

/// Black-box tempo estimation over a decoded buffer.
pub trait TempoEstimator: Send {
    /// Estimate the tempo of `buffer`, or `None` when no confident estimate
    /// exists.
    fn estimate(&self, buffer: &StereoBuffer, sample_rate: u32) -> Option<f64>;
}

/// Outcome of the tempo correction policy for one load.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoDecision {
    /// Tempo assigned to the buffer before any stretching.
    pub bpm: f64,
    /// True when the detected tempo looked like a double/half ambiguity of
    /// the host tempo and correction was bypassed.
    pub ambiguity_bypass: bool,
    /// Offline stretch ratio (playback-speed factor) that brings the buffer
    /// to the host tempo, or `None` when no stretch is warranted.
    pub stretch_ratio: Option<f64>,
}

/// Decide which tempo to trust and whether to stretch.
///
/// Detection within ±20% of exactly double or half the host tempo is a known
/// detector failure mode on half/double-time material: the supplied tempo is
/// kept and no stretch happens. Implausible estimates (outside 60-200 BPM)
/// also fall back to the supplied tempo but may still be stretched. Only
/// double and half ratios bypass; triple-tempo ambiguity has not shown up in
/// practice.
pub fn resolve_tempo(detected: Option<f64>, supplied_bpm: f64, host_tempo: f64) -> TempoDecision {
    if let Some(bpm) = detected {
        if host_tempo > 0.0 {
            let double = host_tempo * 2.0;
            let half = host_tempo * 0.5;
            if (bpm - double).abs() <= double * AMBIGUITY_TOLERANCE
                || (bpm - half).abs() <= half * AMBIGUITY_TOLERANCE
            {
                log::info!(
                    "Tempo {:.1} looks like a double/half of host {:.1}, keeping supplied {:.1}",
                    bpm,
                    host_tempo,
                    supplied_bpm
                );
                return TempoDecision {
                    bpm: supplied_bpm,
                    ambiguity_bypass: true,
                    stretch_ratio: None,
                };
            }
        }

        if (PLAUSIBLE_BPM_MIN..=PLAUSIBLE_BPM_MAX).contains(&bpm) {
            return TempoDecision {
                bpm,
                ambiguity_bypass: false,
                stretch_ratio: stretch_ratio_for(bpm, host_tempo),
            };
        }
        log::debug!("Detected tempo {:.1} outside plausible range, using supplied", bpm);
    }

    TempoDecision {
        bpm: supplied_bpm,
        ambiguity_bypass: false,
        stretch_ratio: stretch_ratio_for(supplied_bpm, host_tempo),
    }
}

fn stretch_ratio_for(bpm: f64, host_tempo: f64) -> Option<f64> {
    if bpm <= 0.0 || host_tempo <= 0.0 {
        return None;
    }
    if (bpm - host_tempo).abs() > STRETCH_THRESHOLD_BPM {
        Some(host_tempo / bpm)
    } else {
        None
    }
}

/// Onset-energy tempo estimator.
///
/// Windowed RMS energy over the mono mix, local-maximum peak picking, then
/// the median inter-onset interval converted to BPM. Crude next to a proper
/// beat tracker, but it has no dependencies and behaves predictably on the
/// percussive loops this engine feeds it.
pub struct OnsetTempoEstimator {
    window: usize,
    hop: usize,
    threshold: Sample,
}

impl Default for OnsetTempoEstimator {
    fn default() -> Self {
        Self { window: 1024, hop: 512, threshold: 0.1 }
    }
}

impl OnsetTempoEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    fn onset_strength(&self, buffer: &StereoBuffer) -> Vec<Sample> {
        let frames = buffer.as_slice();
        let mut strength = Vec::new();
        let mut start = 0;
        while start + self.window <= frames.len() {
            let mut energy = 0.0f32;
            for frame in &frames[start..start + self.window] {
                let mono = (frame.left + frame.right) * 0.5;
                energy += mono * mono;
            }
            strength.push((energy / self.window as Sample).sqrt());
            start += self.hop;
        }
        strength
    }
}

impl TempoEstimator for OnsetTempoEstimator {
    fn estimate(&self, buffer: &StereoBuffer, sample_rate: u32) -> Option<f64> {
        // Need at least a second of audio to say anything about tempo.
        if buffer.len() < sample_rate as usize {
            return None;
        }

        let strength = self.onset_strength(buffer);
        let mut onsets = Vec::new();
        for i in 1..strength.len().saturating_sub(1) {
            if strength[i] > self.threshold
                && strength[i] > strength[i - 1]
                && strength[i] > strength[i + 1]
            {
                onsets.push(i);
            }
        }
        if onsets.len() < 4 {
            return None;
        }

        let hop_seconds = self.hop as f64 / sample_rate as f64;
        let mut intervals: Vec<f64> = onsets
            .windows(2)
            .map(|pair| (pair[1] - pair[0]) as f64 * hop_seconds)
            .filter(|&secs| (0.2..2.0).contains(&secs))
            .map(|secs| 60.0 / secs)
            .collect();
        if intervals.is_empty() {
            return None;
        }

        intervals.sort_by(|a, b| a.total_cmp(b));
        let median = intervals[intervals.len() / 2];
        if (30.0..=300.0).contains(&median) {
            Some(median)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StereoSample;

    #[test]
    fn test_double_tempo_bypass() {
        // Detector says 240 against a 120 host: exactly double, so the
        // supplied tempo survives and no stretch is scheduled.
        let decision = resolve_tempo(Some(240.0), 126.0, 120.0);
        assert!(decision.ambiguity_bypass);
        assert_eq!(decision.bpm, 126.0);
        assert_eq!(decision.stretch_ratio, None);
    }

    #[test]
    fn test_half_tempo_bypass_with_tolerance() {
        // 55 is within 20% of half of 100.
        let decision = resolve_tempo(Some(55.0), 100.0, 100.0);
        assert!(decision.ambiguity_bypass);
        assert_eq!(decision.bpm, 100.0);
    }

    #[test]
    fn test_implausible_detection_falls_back() {
        let decision = resolve_tempo(Some(500.0), 126.0, 120.0);
        assert!(!decision.ambiguity_bypass);
        assert_eq!(decision.bpm, 126.0);
        // 126 vs 120 is more than 1 BPM apart, so a stretch is scheduled.
        let ratio = decision.stretch_ratio.unwrap();
        assert!((ratio - 120.0 / 126.0).abs() < 1e-9);
    }

    #[test]
    fn test_close_tempo_skips_stretch() {
        let decision = resolve_tempo(Some(120.5), 126.0, 120.0);
        assert!(!decision.ambiguity_bypass);
        assert_eq!(decision.bpm, 120.5);
        assert_eq!(decision.stretch_ratio, None);
    }

    #[test]
    fn test_no_detection_uses_supplied() {
        let decision = resolve_tempo(None, 140.0, 120.0);
        assert_eq!(decision.bpm, 140.0);
        assert!(decision.stretch_ratio.is_some());
    }

    #[test]
    fn test_onset_estimator_finds_click_train() {
        // 120 BPM click train: one impulse every 0.5s at 48kHz.
        let sample_rate = 48_000u32;
        let seconds = 8;
        let mut buffer = StereoBuffer::silence(sample_rate as usize * seconds);
        let period = sample_rate as usize / 2;
        for beat in 0..(seconds * 2) {
            let at = beat * period;
            for i in 0..256 {
                buffer[at + i] = StereoSample::mono(0.9);
            }
        }

        let estimator = OnsetTempoEstimator::new();
        let bpm = estimator.estimate(&buffer, sample_rate).expect("estimate");
        assert!((bpm - 120.0).abs() < 6.0, "estimated {bpm}");
    }

    #[test]
    fn test_onset_estimator_rejects_short_audio() {
        let estimator = OnsetTempoEstimator::new();
        let buffer = StereoBuffer::silence(1000);
        assert_eq!(estimator.estimate(&buffer, 48_000), None);
    }
}
