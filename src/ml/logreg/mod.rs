//! Multinomial logistic regression over flight feature vectors.

use std::path::{Path, PathBuf};

use ndarray::parallel::prelude::*;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod train;
pub use train::{Classifier, TrainDataset, TrainOptions};

/// Current serialized model layout.
pub const MODEL_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("Empty training set")]
    EmptyTrainingSet,
    #[error("Mismatched training inputs ({rows} rows) and labels ({labels} labels)")]
    Mismatch { rows: usize, labels: usize },
    #[error("Expected {expected} features per row, got {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("No classes available for training")]
    NoClasses,
    #[error("Label {label} is outside the {n_classes}-class label space")]
    LabelOutOfRange { label: usize, n_classes: usize },
    #[error("Invalid training options: {0}")]
    InvalidOptions(String),
    #[error("Failed to build training thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Invalid model: {0}")]
    InvalidModel(String),
}

#[derive(Debug, Error)]
pub enum ModelIoError {
    #[error("Failed to access model file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid model JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Model in {path} failed validation: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

/// Fitted logistic regression.
///
/// Only the classes that had training samples carry weights; probability vectors
/// still span the whole label space, with zero mass on unfitted classes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRegModel {
    pub model_version: i64,
    /// Size of the label space.
    pub n_classes: usize,
    /// Fitted label indices, ascending; row `i` of `weights` belongs to `classes[i]`.
    pub classes: Vec<usize>,
    pub dim: usize,
    pub weights: Array2<f64>,
    pub bias: Array1<f64>,
    /// Gradient-descent iterations used by the fit.
    #[serde(default)]
    pub iterations: usize,
}

impl LogRegModel {
    /// Check the model's shapes and class indices.
    pub fn validate(&self) -> Result<(), String> {
        if self.classes.is_empty() {
            return Err("No classes defined".to_string());
        }
        if self.classes.iter().any(|&class| class >= self.n_classes) {
            return Err("class index outside label space".to_string());
        }
        if self.classes.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err("classes must be strictly ascending".to_string());
        }
        // A single fitted class predicts itself and needs no weights.
        let rows = if self.classes.len() == 1 { 0 } else { self.classes.len() };
        if self.weights.dim() != (rows, self.dim) {
            return Err("weights shape mismatch".to_string());
        }
        if self.bias.len() != rows {
            return Err("bias length mismatch".to_string());
        }
        if self.weights.iter().chain(self.bias.iter()).any(|v| !v.is_finite()) {
            return Err("non-finite parameters".to_string());
        }
        Ok(())
    }

    /// Class probabilities for every row of `x` (`rows x n_classes`).
    ///
    /// Rows are processed on the current rayon pool.
    pub fn predict_proba_matrix(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>, TrainError> {
        if x.ncols() != self.dim {
            return Err(TrainError::DimensionMismatch {
                expected: self.dim,
                found: x.ncols(),
            });
        }
        let mut full = Array2::zeros((x.nrows(), self.n_classes));
        if let [only] = self.classes.as_slice() {
            full.column_mut(*only).fill(1.0);
            return Ok(full);
        }
        let mut fitted = x.dot(&self.weights.t()) + &self.bias;
        softmax_rows(&mut fitted);
        for (col, &class) in self.classes.iter().enumerate() {
            full.column_mut(class).assign(&fitted.column(col));
        }
        Ok(full)
    }

    /// Class probabilities for a single row; empty on a dimension mismatch.
    pub fn predict_proba(&self, row: &[f64]) -> Vec<f64> {
        let Ok(view) = ArrayView2::from_shape((1, row.len()), row) else {
            return Vec::new();
        };
        match self.predict_proba_matrix(view) {
            Ok(probs) => probs.row(0).to_vec(),
            Err(_) => Vec::new(),
        }
    }
}

/// Write a model as pretty JSON, creating parent directories.
pub fn save_model(path: &Path, model: &LogRegModel) -> Result<(), ModelIoError> {
    let io_err = |source| ModelIoError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let bytes = serde_json::to_vec_pretty(model).map_err(|source| ModelIoError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, bytes).map_err(io_err)
}

/// Read and validate a model written by [`save_model`].
pub fn load_model(path: &Path) -> Result<LogRegModel, ModelIoError> {
    let bytes = std::fs::read(path).map_err(|source| ModelIoError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let model: LogRegModel = serde_json::from_slice(&bytes).map_err(|source| ModelIoError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    model.validate().map_err(|reason| ModelIoError::Invalid {
        path: path.to_path_buf(),
        reason,
    })?;
    Ok(model)
}

/// Row-wise softmax in place, rows in parallel.
pub(crate) fn softmax_rows(logits: &mut Array2<f64>) {
    let width = logits.ncols();
    logits
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .for_each(|mut row| {
            let max = row.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            if sum > 0.0 && sum.is_finite() {
                row /= sum;
            } else {
                row.fill(1.0 / width as f64);
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use crate::ml::argmax;

    fn two_class_model() -> LogRegModel {
        LogRegModel {
            model_version: MODEL_VERSION,
            n_classes: 3,
            classes: vec![0, 2],
            dim: 2,
            weights: array![[1.0, 0.0], [-1.0, 0.0]],
            bias: array![0.0, 0.0],
            iterations: 0,
        }
    }

    #[test]
    fn probabilities_span_the_label_space() {
        let model = two_class_model();
        model.validate().unwrap();
        let probs = model.predict_proba(&[1.0, 5.0]);
        assert_eq!(probs.len(), 3);
        assert_eq!(probs[1], 0.0);
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert_eq!(argmax(&probs), 0);
        assert_eq!(argmax(&model.predict_proba(&[-1.0, 5.0])), 2);
    }

    #[test]
    fn dimension_mismatch_yields_empty_probabilities() {
        let model = two_class_model();
        assert!(model.predict_proba(&[1.0]).is_empty());
    }

    #[test]
    fn single_class_model_is_certain() {
        let model = LogRegModel {
            model_version: MODEL_VERSION,
            n_classes: 2,
            classes: vec![1],
            dim: 2,
            weights: Array2::zeros((0, 2)),
            bias: Array1::zeros(0),
            iterations: 0,
        };
        model.validate().unwrap();
        assert_eq!(model.predict_proba(&[3.0, 4.0]), vec![0.0, 1.0]);
    }

    #[test]
    fn save_then_load_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("model.json");
        let model = two_class_model();
        save_model(&path, &model).unwrap();
        let loaded = load_model(&path).unwrap();
        assert_eq!(loaded.classes, model.classes);
        assert_eq!(loaded.weights, model.weights);
    }

    #[test]
    fn validate_rejects_bad_shapes() {
        let mut model = two_class_model();
        model.bias = array![0.0];
        assert!(model.validate().is_err());
    }
}
