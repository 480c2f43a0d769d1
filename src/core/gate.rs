//! Two-stage activity gate in front of the classifier.
//!
//! Stage 1 looks at RMS and spectral flux; quiet chunks never reach the
//! model. Stage 2 (calibrated microphones only) rejects chunks whose sound
//! pressure level is below threshold. Active chunks accumulate until one model
//! frame's worth of audio exists, which is then resampled and classified.

use std::sync::Arc;

use crate::audio::metrics::DEFAULT_FLUX_FFT_SIZE;
use crate::audio::{dbfs, dbspl, fit_frame, resample, rms, samples_needed, CalibrationConstants, SpectralFlux};
use crate::classifier::{argmax, ClassMap, Classifier};
use crate::core::telemetry::{Telemetry, DBSPL_SILENCE_LEVEL};
use crate::domain::{SharedContext, METRIC_DBSPL, METRIC_FLUX, METRIC_RMS, SILENCE_LABEL};

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub rms_threshold: f64,
    pub flux_threshold: f64,
    pub dbspl_threshold: f64,
    pub input_rate: u32,
    pub target_rate: u32,
    pub frame_len: usize,
    /// Classifications above this confidence are logged at info
    pub logging_confidence_threshold: f64,
}

/// What the gate did with one chunk
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// Below the RMS/flux gate
    Silence,
    /// Passed stage 1 but too quiet in dBSPL
    BelowSpl,
    /// Active, waiting for a full model frame
    Accumulating,
    Classified { label: String, confidence: f64 },
    /// The classifier failed; the previous label is kept
    InferenceFailed,
}

pub struct FeatureStage {
    config: GateConfig,
    calibration: Option<CalibrationConstants>,
    flux: SpectralFlux,
    classifier: Box<dyn Classifier>,
    class_map: ClassMap,
    telemetry: Arc<Telemetry>,
    buffer: Vec<f32>,
    needed: usize,
}

impl FeatureStage {
    pub fn new(
        config: GateConfig,
        calibration: Option<CalibrationConstants>,
        classifier: Box<dyn Classifier>,
        class_map: ClassMap,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        let needed = samples_needed(config.frame_len, config.input_rate, config.target_rate).max(1);

        tracing::info!(
            "Feature stage ready: {} Hz -> {} Hz, gate rms>{} | flux>{}{}",
            config.input_rate,
            config.target_rate,
            config.rms_threshold,
            config.flux_threshold,
            if calibration.is_some() {
                format!(" then dBSPL>{}", config.dbspl_threshold)
            } else {
                String::new()
            }
        );

        Self {
            config,
            calibration,
            flux: SpectralFlux::new(DEFAULT_FLUX_FFT_SIZE),
            classifier,
            class_map,
            telemetry,
            buffer: Vec::new(),
            needed,
        }
    }

    /// Samples buffered towards the next inference
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn process(&mut self, chunk: &[f32], ctx: &mut SharedContext) -> GateDecision {
        let level = rms(chunk);
        let flux = self.flux.process(chunk);

        ctx.set_metric(METRIC_RMS, level);
        ctx.set_metric(METRIC_FLUX, flux);
        ctx.set_metric(METRIC_DBSPL, 0.0);

        let active = level > self.config.rms_threshold || flux > self.config.flux_threshold;
        if !active {
            self.reset_to_silence(ctx, DBSPL_SILENCE_LEVEL, level, flux);
            return GateDecision::Silence;
        }

        let mut spl = 0.0;
        if let Some(cal) = self.calibration {
            spl = dbspl(dbfs(level), cal.sensitivity_dbfs, cal.reference_dbspl);
            if spl < self.config.dbspl_threshold {
                self.reset_to_silence(ctx, spl, level, flux);
                return GateDecision::BelowSpl;
            }
            ctx.set_metric(METRIC_DBSPL, spl);
        }

        let reported = if spl > 0.0 { spl } else { DBSPL_SILENCE_LEVEL };
        self.telemetry.update_audio(reported, level, flux);

        self.buffer.extend_from_slice(chunk);
        if self.buffer.len() < self.needed {
            return GateDecision::Accumulating;
        }

        let raw = std::mem::take(&mut self.buffer);
        self.infer(&raw, ctx)
    }

    fn reset_to_silence(&mut self, ctx: &mut SharedContext, spl: f64, level: f64, flux: f64) {
        ctx.current_label = SILENCE_LABEL.to_string();
        ctx.current_confidence = 0.0;
        self.buffer.clear();
        self.telemetry.update_silence(spl, level, flux);
    }

    fn infer(&mut self, raw: &[f32], ctx: &mut SharedContext) -> GateDecision {
        let resampled = match resample(raw, self.config.input_rate, self.config.target_rate) {
            Ok(samples) => samples,
            Err(e) => {
                tracing::warn!("Failed to resample classifier input: {:#}", e);
                return GateDecision::InferenceFailed;
            }
        };
        let frame = fit_frame(resampled, self.config.frame_len);

        let scores = match self.classifier.classify(&frame) {
            Ok(scores) => scores,
            Err(e) => {
                tracing::warn!("Inference failed, keeping label '{}': {}", ctx.current_label, e);
                return GateDecision::InferenceFailed;
            }
        };

        let Some((index, score)) = argmax(&scores) else {
            tracing::warn!("Classifier returned no scores");
            return GateDecision::InferenceFailed;
        };

        let label = self.class_map.label(index).to_string();
        let confidence = (score as f64).clamp(0.0, 1.0);

        ctx.current_label = label.clone();
        ctx.current_confidence = confidence;
        self.telemetry.update_ai(confidence);

        if confidence > self.config.logging_confidence_threshold {
            let dbspl = ctx.metric(METRIC_DBSPL);
            if dbspl > 0.0 {
                tracing::info!(
                    "rms={:.4} flux={:05.1} dbspl={:05.1} | heard {} ({:.2})",
                    ctx.metric(METRIC_RMS),
                    ctx.metric(METRIC_FLUX),
                    dbspl,
                    label,
                    confidence
                );
            } else {
                tracing::info!(
                    "rms={:.4} flux={:05.1} | heard {} ({:.2})",
                    ctx.metric(METRIC_RMS),
                    ctx.metric(METRIC_FLUX),
                    label,
                    confidence
                );
            }
        }

        GateDecision::Classified { label, confidence }
    }
}
