//! Audio signal helpers: metrics, resampling, calibration and WAV io.

pub mod calibration;
pub mod metrics;
pub mod resample;
pub mod wav;

pub use calibration::{
    AudioProcessor, CalibrationConstants, CalibrationError, CalibrationProfile, GainCalibrator,
};
pub use metrics::{dbfs, dbspl, rms, SpectralFlux};
pub use resample::{fit_frame, resample, samples_needed};
pub use wav::{decode_wav_mono, encode_wav, read_wav_mono, DecodedWav};
