//! Classifier training, inference and evaluation.
//!
//! The active learner retrains a small multinomial logistic regression from scratch on
//! every scoring pass; these are the building blocks it uses.

pub mod logreg;
pub mod metrics;

pub use logreg::{Classifier, LogRegModel, ModelIoError, TrainDataset, TrainError, TrainOptions};

/// Softmax of `raw`; uniform when the exponentials underflow.
pub fn softmax(raw: &[f64]) -> Vec<f64> {
    if raw.is_empty() {
        return Vec::new();
    }
    let max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut exps: Vec<f64> = raw.iter().map(|&v| (v - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    if !(sum > 0.0 && sum.is_finite()) {
        return vec![1.0 / raw.len() as f64; raw.len()];
    }
    for v in &mut exps {
        *v /= sum;
    }
    exps
}

/// Index of the first maximal value (0 for an empty slice).
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0usize;
    let mut best_val = f64::NEG_INFINITY;
    for (idx, &val) in values.iter().enumerate() {
        if val > best_val {
            best_val = val;
            best = idx;
        }
    }
    best
}
