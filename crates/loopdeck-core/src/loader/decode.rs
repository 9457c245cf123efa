//! File decoding, resampling, and WAV persistence for the loader pipeline

use std::fs::File;
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{LoadError, LoadResult};
use crate::types::{Sample, StereoBuffer, StereoSample, DEFAULT_SAMPLE_RATE};

/// Decode an audio file to a stereo buffer at its native sample rate.
///
/// Mono sources are duplicated into both channels; sources with more than two
/// channels keep the first two.
pub fn decode_file(path: &Path) -> LoadResult<(StereoBuffer, u32)> {
    let file = File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| LoadError::Probe(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(LoadError::NoAudioTrack)?;
    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
    let channels = track.codec_params.channels.map_or(2, |c| c.count());

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| LoadError::Decode(e.to_string()))?;

    let mut interleaved: Vec<Sample> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<Sample>> = None;
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            // End of stream comes back as an IO error.
            Err(SymphoniaError::IoError(_)) => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(LoadError::Decode(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                if sample_buf.is_none() {
                    let spec = *decoded.spec();
                    sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
                }
                if let Some(buf) = sample_buf.as_mut() {
                    buf.copy_interleaved_ref(decoded);
                    interleaved.extend_from_slice(buf.samples());
                }
            }
            // Corrupt packets are skipped, not fatal.
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("Skipping undecodable packet in {}: {e}", path.display());
            }
            Err(e) => return Err(LoadError::Decode(e.to_string())),
        }
    }

    if interleaved.is_empty() {
        return Err(LoadError::EmptyFile);
    }

    Ok((to_stereo(&interleaved, channels), sample_rate))
}

fn to_stereo(interleaved: &[Sample], channels: usize) -> StereoBuffer {
    match channels {
        0 | 1 => {
            let mut out = StereoBuffer::with_capacity(interleaved.len());
            for &s in interleaved {
                out.push(StereoSample::mono(s));
            }
            out
        }
        2 => StereoBuffer::from_interleaved(&interleaved[..interleaved.len() / 2 * 2]),
        n => {
            let frames = interleaved.len() / n;
            let mut out = StereoBuffer::with_capacity(frames);
            for frame in interleaved.chunks_exact(n) {
                out.push(StereoSample::new(frame[0], frame[1]));
            }
            out
        }
    }
}

/// Resample to the engine rate. Identity when the rates already match.
pub fn resample(buffer: StereoBuffer, from_rate: u32, to_rate: u32) -> LoadResult<StereoBuffer> {
    if from_rate == to_rate || buffer.is_empty() {
        return Ok(buffer);
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = to_rate as f64 / from_rate as f64;
    // One whole-buffer chunk: load-time conversion, no streaming needed.
    let mut resampler = SincFixedIn::<Sample>::new(ratio, 2.0, params, buffer.len(), 2)
        .map_err(|e| LoadError::Resample(e.to_string()))?;

    let mut left = Vec::with_capacity(buffer.len());
    let mut right = Vec::with_capacity(buffer.len());
    for frame in buffer.iter() {
        left.push(frame.left);
        right.push(frame.right);
    }

    let waves_out = resampler
        .process(&[left, right], None)
        .map_err(|e| LoadError::Resample(e.to_string()))?;

    let mut out = StereoBuffer::with_capacity(waves_out[0].len());
    for (l, r) in waves_out[0].iter().zip(waves_out[1].iter()) {
        out.push(StereoSample::new(*l, *r));
    }
    Ok(out)
}

/// Write the processed buffer as a 16-bit stereo WAV.
pub fn persist_wav(buffer: &StereoBuffer, sample_rate: u32, path: &Path) -> LoadResult<()> {
    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).map_err(|e| LoadError::Persist {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    for &sample in buffer.as_interleaved() {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as Sample) as i16;
        writer.write_sample(value).map_err(|e| LoadError::Persist {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    }
    writer.finalize().map_err(|e| LoadError::Persist {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_test_wav(path: &Path, frames: usize, sample_rate: u32) {
        let mut buffer = StereoBuffer::with_capacity(frames);
        for i in 0..frames {
            let phase = i as f32 / sample_rate as f32 * 440.0 * std::f32::consts::TAU;
            buffer.push(StereoSample::mono(phase.sin() * 0.5));
        }
        persist_wav(&buffer, sample_rate, path).unwrap();
    }

    #[test]
    fn test_decode_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 4800, 48_000);

        let (decoded, rate) = decode_file(&path).unwrap();
        assert_eq!(rate, 48_000);
        assert_eq!(decoded.len(), 4800);
        // Signal survives quantization.
        let peak = decoded.iter().map(|s| s.left.abs()).fold(0.0f32, f32::max);
        assert!((peak - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_decode_missing_file() {
        let err = decode_file(Path::new("/nonexistent/loop.wav")).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn test_decode_garbage_fails_probe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.wav");
        std::fs::write(&path, b"this is not audio data at all").unwrap();
        assert!(decode_file(&path).is_err());
    }

    #[test]
    fn test_resample_changes_length() {
        let buffer = StereoBuffer::silence(44_100);
        let out = resample(buffer, 44_100, 48_000).unwrap();
        let expected = 48_000f64;
        assert!((out.len() as f64 - expected).abs() / expected < 0.02, "len {}", out.len());
    }

    #[test]
    fn test_resample_identity() {
        let buffer = StereoBuffer::silence(1234);
        let out = resample(buffer, 48_000, 48_000).unwrap();
        assert_eq!(out.len(), 1234);
    }
}
