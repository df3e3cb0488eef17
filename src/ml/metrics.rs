//! Evaluation metrics for the flight classifier.

use std::fmt::Write as _;

/// Confusion matrix for a `K`-class classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    /// Number of classes.
    pub n_classes: usize,
    /// Row-major `KxK` counts (`truth * K + predicted`).
    pub counts: Vec<u32>,
}

impl ConfusionMatrix {
    /// Create an empty `KxK` confusion matrix.
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            counts: vec![0; n_classes * n_classes],
        }
    }

    /// Build a matrix from `(truth, predicted)` pairs.
    pub fn from_pairs<I>(n_classes: usize, pairs: I) -> Self
    where
        I: IntoIterator<Item = (usize, usize)>,
    {
        let mut cm = Self::new(n_classes);
        for (truth, predicted) in pairs {
            cm.add(truth, predicted);
        }
        cm
    }

    /// Count one prediction; out-of-range indices are ignored.
    pub fn add(&mut self, truth: usize, predicted: usize) {
        if truth >= self.n_classes || predicted >= self.n_classes {
            return;
        }
        let idx = truth * self.n_classes + predicted;
        self.counts[idx] = self.counts[idx].saturating_add(1);
    }

    pub fn get(&self, truth: usize, predicted: usize) -> u32 {
        self.counts[truth * self.n_classes + predicted]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&v| v as u64).sum()
    }

    /// Fixed-width text table, rows = truth, columns = predicted.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for truth in 0..self.n_classes {
            for predicted in 0..self.n_classes {
                let _ = write!(out, "{:6}", self.get(truth, predicted));
            }
            out.push('\n');
        }
        out
    }
}

/// Precision/recall statistics for a single class.
#[derive(Debug, Clone, PartialEq)]
pub struct PerClassStats {
    /// `TP / (TP + FP)`.
    pub precision: f32,
    /// `TP / (TP + FN)`.
    pub recall: f32,
    /// Number of true examples of the class.
    pub support: u32,
}

impl PerClassStats {
    pub fn f1(&self) -> f32 {
        f1_score(self.precision, self.recall)
    }
}

/// Summary of a model scored against the validation set.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub matrix: ConfusionMatrix,
    pub accuracy: f32,
    pub macro_f1: f32,
    pub per_class: Vec<PerClassStats>,
}

impl ValidationReport {
    pub fn from_matrix(matrix: ConfusionMatrix) -> Self {
        let per_class = precision_recall_by_class(&matrix);
        Self {
            accuracy: accuracy(&matrix),
            macro_f1: macro_f1(&per_class),
            per_class,
            matrix,
        }
    }
}

/// Per-class precision and recall from a confusion matrix.
pub fn precision_recall_by_class(cm: &ConfusionMatrix) -> Vec<PerClassStats> {
    let k = cm.n_classes;
    (0..k)
        .map(|class| {
            let tp = cm.get(class, class);
            let support: u32 = (0..k).map(|j| cm.get(class, j)).sum();
            let predicted: u32 = (0..k).map(|i| cm.get(i, class)).sum();
            PerClassStats {
                precision: ratio(tp, predicted),
                recall: ratio(tp, support),
                support,
            }
        })
        .collect()
}

/// Fraction of predictions on the diagonal.
pub fn accuracy(cm: &ConfusionMatrix) -> f32 {
    let correct: u64 = (0..cm.n_classes).map(|c| cm.get(c, c) as u64).sum();
    let total = cm.total();
    if total == 0 {
        0.0
    } else {
        correct as f32 / total as f32
    }
}

/// Unweighted mean F1 over classes that have support or predictions.
pub fn macro_f1(per_class: &[PerClassStats]) -> f32 {
    let scored: Vec<f32> = per_class
        .iter()
        .filter(|stats| stats.support > 0 || stats.precision > 0.0)
        .map(PerClassStats::f1)
        .collect();
    if scored.is_empty() {
        0.0
    } else {
        scored.iter().sum::<f32>() / scored.len() as f32
    }
}

pub fn f1_score(precision: f32, recall: f32) -> f32 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

fn ratio(num: u32, den: u32) -> f32 {
    if den == 0 { 0.0 } else { num as f32 / den as f32 }
}
