//! Sound classification.
//!
//! The model itself lives outside this crate. A [`Classifier`] takes one
//! fixed-size frame at the model's sample rate and returns one score per
//! class; [`ClassMap`] turns the winning index into a label.

pub mod class_map;
pub mod http;

use thiserror::Error;

pub use class_map::ClassMap;
pub use http::HttpClassifier;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Class map error: {0}")]
    ClassMap(String),

    #[error("Classifier unreachable: {0}")]
    Unreachable(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Expected a frame of {expected} samples, got {actual}")]
    FrameSize { expected: usize, actual: usize },
}

/// Fixed-size frame in, score vector out
pub trait Classifier: Send {
    fn classify(&mut self, frame: &[f32]) -> Result<Vec<f32>, ClassifierError>;
}

/// Index and value of the highest score
pub fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, s)| !s.is_nan())
        .fold(None, |best, (i, s)| match best {
            Some((_, b)) if b >= s => best,
            _ => Some((i, s)),
        })
}
