//! Cheap per-chunk signal metrics: RMS, dBFS/dBSPL and spectral flux.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Floor added before taking logarithms
const LOG_FLOOR: f64 = 1e-9;

/// Default FFT frame used for spectral flux
pub const DEFAULT_FLUX_FFT_SIZE: usize = 1024;

/// Root-mean-square amplitude of a chunk
pub fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt()
}

/// Full-scale decibels of an RMS value
pub fn dbfs(rms: f64) -> f64 {
    20.0 * (rms + LOG_FLOOR).log10()
}

/// Calibrated sound pressure level from full-scale decibels.
///
/// `sensitivity_dbfs` is the level the microphone reports for a tone at
/// `reference_dbspl` (usually 94 dB SPL).
pub fn dbspl(dbfs: f64, sensitivity_dbfs: f64, reference_dbspl: f64) -> f64 {
    dbfs - sensitivity_dbfs + reference_dbspl
}

/// Frame-to-frame positive change in spectral magnitude.
///
/// Keeps the previous chunk's spectrum, so the first chunk always reports 0.
/// Only increases count: a chunk quieter than its predecessor yields 0.
pub struct SpectralFlux {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    previous: Option<Vec<f32>>,
}

impl SpectralFlux {
    pub fn new(fft_size: usize) -> Self {
        let fft_size = fft_size.max(2);
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);

        // Hann window
        let window = (0..fft_size)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / (fft_size - 1) as f32;
                0.5 - 0.5 * phase.cos()
            })
            .collect();

        Self {
            fft,
            window,
            previous: None,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.window.len()
    }

    /// Flux of `chunk` relative to the previous call
    pub fn process(&mut self, chunk: &[f32]) -> f64 {
        let magnitudes = self.magnitudes(chunk);

        let flux = match &self.previous {
            Some(prev) => magnitudes
                .iter()
                .zip(prev.iter())
                .map(|(cur, old)| (cur - old).max(0.0) as f64)
                .sum(),
            None => 0.0,
        };

        self.previous = Some(magnitudes);
        flux
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// Normalised magnitude spectrum of the most recent `fft_size` samples
    fn magnitudes(&self, chunk: &[f32]) -> Vec<f32> {
        let n = self.window.len();
        let tail = if chunk.len() > n {
            &chunk[chunk.len() - n..]
        } else {
            chunk
        };

        let mut buffer: Vec<Complex<f32>> = (0..n)
            .map(|i| {
                let sample = tail.get(i).copied().unwrap_or(0.0);
                Complex::new(sample * self.window[i], 0.0)
            })
            .collect();

        self.fft.process(&mut buffer);

        let scale = 2.0 / n as f32;
        buffer
            .iter()
            .take(n / 2 + 1)
            .map(|c| c.norm() * scale)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, amp: f32, len: usize, rate: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / rate).sin())
            .collect()
    }

    #[test]
    fn test_rms_of_constant() {
        assert!((rms(&[0.5; 100]) - 0.5).abs() < 1e-9);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn test_dbspl_conversion() {
        // A full-scale RMS of 1.0 is 0 dBFS
        let full = dbfs(1.0);
        assert!(full.abs() < 1e-6);

        // Mic reports -18 dBFS for 94 dB SPL
        let spl = dbspl(-18.0, -18.0, 94.0);
        assert!((spl - 94.0).abs() < 1e-9);
    }

    #[test]
    fn test_flux_silence_is_zero() {
        let mut flux = SpectralFlux::new(256);
        let silence = vec![0.0f32; 512];
        assert_eq!(flux.process(&silence), 0.0);
        assert_eq!(flux.process(&silence), 0.0);
    }

    #[test]
    fn test_flux_onset_is_positive() {
        let mut flux = SpectralFlux::new(256);
        flux.process(&vec![0.0f32; 512]);

        let loud = sine(1000.0, 0.8, 512, 16000.0);
        assert!(flux.process(&loud) > 0.1);

        // Dropping back to silence has no positive change
        assert_eq!(flux.process(&vec![0.0f32; 512]), 0.0);
    }

    #[test]
    fn test_first_chunk_reports_zero() {
        let mut flux = SpectralFlux::new(256);
        let loud = sine(440.0, 0.8, 512, 16000.0);
        assert_eq!(flux.process(&loud), 0.0);
    }
}
