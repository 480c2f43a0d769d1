//! Microphone calibration.
//!
//! Reads miniDSP-style calibration files: an optional quoted header carrying
//! `Sens Factor =<x>dB`, then one `frequency<ws>gain_db` pair per line.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Nominal sensitivity of a measurement microphone at the reference level
pub const NOMINAL_SENSITIVITY_DBFS: f64 = -18.0;

/// Reference tone level used by calibrators
pub const REFERENCE_DBSPL: f64 = 94.0;

/// Band over which the frequency response is averaged into a broadband gain
const CORRECTION_BAND_HZ: (f64, f64) = (100.0, 10_000.0);

/// Pure sample transform applied before audio is saved
pub trait AudioProcessor: Send {
    fn process(&self, samples: &[f32]) -> Vec<f32>;
}

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("Failed to read calibration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed calibration file {path} at line {line}: {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Calibration file {0} has no response points")]
    Empty(PathBuf),
}

/// Constants needed to turn dBFS into dBSPL
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationConstants {
    pub sensitivity_dbfs: f64,
    pub reference_dbspl: f64,
}

/// Parsed calibration file
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationProfile {
    /// Offset from the nominal sensitivity, from the file header
    pub sens_factor_db: f64,

    /// (frequency Hz, correction dB) pairs in file order
    pub response: Vec<(f64, f64)>,
}

impl CalibrationProfile {
    pub fn load(path: &Path) -> Result<Self, CalibrationError> {
        let content = std::fs::read_to_string(path).map_err(|source| CalibrationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self, CalibrationError> {
        let mut sens_factor_db = 0.0;
        let mut response = Vec::new();

        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('*') {
                continue;
            }

            if line.starts_with('"') || line.contains("Sens Factor") {
                if let Some(value) = parse_sens_factor(line) {
                    sens_factor_db = value;
                }
                continue;
            }

            let mut fields = line.split_whitespace();
            let (freq, gain) = match (fields.next(), fields.next()) {
                (Some(f), Some(g)) => (f, g),
                _ => {
                    return Err(CalibrationError::Malformed {
                        path: path.to_path_buf(),
                        line: idx + 1,
                        reason: "expected '<frequency> <gain_db>'".to_string(),
                    })
                }
            };

            let freq: f64 = freq.parse().map_err(|_| CalibrationError::Malformed {
                path: path.to_path_buf(),
                line: idx + 1,
                reason: format!("invalid frequency '{}'", freq),
            })?;
            let gain: f64 = gain.parse().map_err(|_| CalibrationError::Malformed {
                path: path.to_path_buf(),
                line: idx + 1,
                reason: format!("invalid gain '{}'", gain),
            })?;

            response.push((freq, gain));
        }

        if response.is_empty() {
            return Err(CalibrationError::Empty(path.to_path_buf()));
        }

        Ok(Self {
            sens_factor_db,
            response,
        })
    }

    /// Effective sensitivity derived from the header
    pub fn constants(&self) -> CalibrationConstants {
        CalibrationConstants {
            sensitivity_dbfs: NOMINAL_SENSITIVITY_DBFS + self.sens_factor_db,
            reference_dbspl: REFERENCE_DBSPL,
        }
    }

    /// Mean correction over the voice/event band
    pub fn band_correction_db(&self) -> f64 {
        let in_band: Vec<f64> = self
            .response
            .iter()
            .filter(|(f, _)| *f >= CORRECTION_BAND_HZ.0 && *f <= CORRECTION_BAND_HZ.1)
            .map(|(_, g)| *g)
            .collect();

        let points = if in_band.is_empty() {
            self.response.iter().map(|(_, g)| *g).collect()
        } else {
            in_band
        };

        points.iter().sum::<f64>() / points.len() as f64
    }
}

fn parse_sens_factor(line: &str) -> Option<f64> {
    let rest = &line[line.find("Sens Factor")? + "Sens Factor".len()..];
    let rest = rest.trim_start().strip_prefix('=')?.trim_start();
    let end = rest.find("dB").unwrap_or(rest.len());
    rest[..end].trim().parse().ok()
}

/// Broadband gain correction derived from a calibration profile
#[derive(Debug, Clone)]
pub struct GainCalibrator {
    gain: f32,
}

impl GainCalibrator {
    pub fn from_profile(profile: &CalibrationProfile) -> Self {
        let gain = 10f64.powf(-profile.band_correction_db() / 20.0) as f32;
        Self { gain }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl AudioProcessor for GainCalibrator {
    fn process(&self, samples: &[f32]) -> Vec<f32> {
        samples
            .iter()
            .map(|s| (s * self.gain).clamp(-1.0, 1.0))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\"Sens Factor =-1.5dB, AGain =18dB, SERNO: 7000001\"\n\
                          20.0\t-2.0\n\
                          1000.0\t1.0\n\
                          5000.0\t3.0\n\
                          20000.0\t-6.0\n";

    #[test]
    fn test_parse_header_and_points() {
        let profile = CalibrationProfile::parse(SAMPLE, Path::new("mic.txt")).unwrap();
        assert_eq!(profile.sens_factor_db, -1.5);
        assert_eq!(profile.response.len(), 4);

        let constants = profile.constants();
        assert_eq!(constants.sensitivity_dbfs, -19.5);
        assert_eq!(constants.reference_dbspl, 94.0);
    }

    #[test]
    fn test_band_correction_ignores_out_of_band() {
        let profile = CalibrationProfile::parse(SAMPLE, Path::new("mic.txt")).unwrap();
        assert!((profile.band_correction_db() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_malformed_line_is_error() {
        let err = CalibrationProfile::parse("1000.0 abc\n", Path::new("bad.txt")).unwrap_err();
        assert!(matches!(err, CalibrationError::Malformed { line: 1, .. }));

        let err = CalibrationProfile::parse("\"Sens Factor =0dB\"\n", Path::new("e.txt")).unwrap_err();
        assert!(matches!(err, CalibrationError::Empty(_)));
    }

    #[test]
    fn test_gain_calibrator_applies_inverse_correction() {
        let profile = CalibrationProfile {
            sens_factor_db: 0.0,
            response: vec![(1000.0, 6.0)],
        };
        let cal = GainCalibrator::from_profile(&profile);
        let out = cal.process(&[0.5, -0.5]);
        assert!((out[0] - 0.2506).abs() < 1e-3);
        assert!((out[1] + 0.2506).abs() < 1e-3);
    }
}
