//! Resampling and frame fitting for classifier input.
//!
//! Uses rubato's FFT resampler to convert capture-rate audio to the rate the
//! classifier expects.

use anyhow::{Context, Result};
use rubato::{FftFixedIn, Resampler};

/// Input block size handed to the resampler
const RESAMPLE_CHUNK: usize = 1024;

/// Resample mono audio from `from_rate` to `to_rate`.
///
/// The resampler's output delay is trimmed so the result is aligned with the
/// input; the length is `len * to_rate / from_rate`.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler =
        FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, RESAMPLE_CHUNK, 2, 1)
            .context("Failed to create resampler")?;

    let delay = resampler.output_delay();
    let expected = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let mut output = Vec::with_capacity(expected + delay);

    let mut pos = 0;
    while pos < samples.len() {
        let needed = resampler.input_frames_next();
        let end = (pos + needed).min(samples.len());
        let wave = [&samples[pos..end]];

        let block = if end - pos == needed {
            resampler.process(&wave[..], None)
        } else {
            resampler.process_partial(Some(&wave[..]), None)
        }
        .context("Failed to resample audio")?;

        output.extend_from_slice(&block[0]);
        pos = end;
    }

    // Flush the tail still held by the resampler
    while output.len() < expected + delay {
        let block = resampler
            .process_partial::<&[f32]>(None, None)
            .context("Failed to flush resampler")?;
        if block[0].is_empty() {
            break;
        }
        output.extend_from_slice(&block[0]);
    }

    output.drain(..delay.min(output.len()));
    output.truncate(expected);
    Ok(output)
}

/// Truncate or zero-pad to exactly `len` samples
pub fn fit_frame(mut samples: Vec<f32>, len: usize) -> Vec<f32> {
    samples.resize(len, 0.0);
    samples
}

/// Capture-rate samples needed to fill one classifier frame
pub fn samples_needed(frame_len: usize, input_rate: u32, target_rate: u32) -> usize {
    (frame_len as f64 * (input_rate as f64 / target_rate as f64)) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_rate_passthrough() {
        let input = vec![0.25f32; 1600];
        let out = resample(&input, 16000, 16000).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_downsample_length() {
        // 48kHz to 16kHz (3:1 ratio)
        let input = vec![0.5f32; 48000];
        let out = resample(&input, 48000, 16000).unwrap();
        assert!(
            (out.len() as i64 - 16000).abs() < 100,
            "Expected ~16000 samples, got {}",
            out.len()
        );
    }

    #[test]
    fn test_fit_frame() {
        assert_eq!(fit_frame(vec![1.0; 10], 4), vec![1.0; 4]);
        assert_eq!(fit_frame(vec![1.0; 2], 4), vec![1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_samples_needed_ratio() {
        assert_eq!(samples_needed(15600, 48000, 16000), 46800);
        assert_eq!(samples_needed(15600, 16000, 16000), 15600);
    }
}
