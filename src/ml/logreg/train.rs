use std::collections::BTreeSet;
use std::sync::Arc;

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{LogRegModel, MODEL_VERSION, TrainError, softmax_rows};

/// Hyperparameters for the logistic regression fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainOptions {
    /// Inverse L2 regularization strength; smaller values smooth more.
    pub inverse_regularization: f64,
    /// Weight each class by `n / (classes * count)` so rare labels are not starved.
    pub balance_classes: bool,
    pub fit_intercept: bool,
    pub max_iter: usize,
    /// Stop once the largest gradient component falls below this.
    pub tolerance: f64,
    /// Worker threads for fitting and prediction; 0 uses every core.
    pub threads: usize,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            inverse_regularization: 0.01,
            balance_classes: true,
            fit_intercept: true,
            max_iter: 2000,
            tolerance: 1e-6,
            threads: 0,
        }
    }
}

impl TrainOptions {
    pub fn validate(&self) -> Result<(), TrainError> {
        if !(self.inverse_regularization.is_finite() && self.inverse_regularization > 0.0) {
            return Err(TrainError::InvalidOptions(
                "inverse_regularization must be > 0".to_string(),
            ));
        }
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(TrainError::InvalidOptions("tolerance must be >= 0".to_string()));
        }
        Ok(())
    }
}

/// In-memory training set: one feature row per label.
#[derive(Debug, Clone)]
pub struct TrainDataset {
    /// Size of the label space the labels index into.
    pub n_classes: usize,
    pub x: Array2<f64>,
    pub y: Vec<usize>,
}

/// Logistic regression trainer bound to its own worker pool.
///
/// The classifier holds no learned state: every [`Classifier::fit`] starts from zero
/// weights.
#[derive(Debug, Clone)]
pub struct Classifier {
    options: TrainOptions,
    pool: Arc<rayon::ThreadPool>,
}

impl Classifier {
    pub fn new(options: TrainOptions) -> Result<Self, TrainError> {
        options.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.threads)
            .thread_name(|idx| format!("flightlabel-fit-{idx}"))
            .build()?;
        Ok(Self {
            options,
            pool: Arc::new(pool),
        })
    }

    pub fn options(&self) -> &TrainOptions {
        &self.options
    }

    /// Fit a new model on `dataset`.
    pub fn fit(&self, dataset: &TrainDataset) -> Result<LogRegModel, TrainError> {
        self.pool.install(|| fit_logreg(dataset, &self.options))
    }

    /// Probabilities for every row of `x`, computed on the classifier's pool.
    pub fn predict_proba(
        &self,
        model: &LogRegModel,
        x: &Array2<f64>,
    ) -> Result<Array2<f64>, TrainError> {
        self.pool.install(|| model.predict_proba_matrix(x.view()))
    }
}

/// Minimize `(1/S) Σ s_i CE_i + (1 / (2 C S)) ||W||²` by full-batch gradient descent.
///
/// `s_i` are the class weights and `S` their sum; the intercept is not penalized.
fn fit_logreg(dataset: &TrainDataset, options: &TrainOptions) -> Result<LogRegModel, TrainError> {
    let (rows, dim) = dataset.x.dim();
    if rows == 0 || dataset.y.is_empty() {
        return Err(TrainError::EmptyTrainingSet);
    }
    if rows != dataset.y.len() {
        return Err(TrainError::Mismatch {
            rows,
            labels: dataset.y.len(),
        });
    }
    if dataset.n_classes == 0 {
        return Err(TrainError::NoClasses);
    }
    if let Some(&label) = dataset.y.iter().find(|&&label| label >= dataset.n_classes) {
        return Err(TrainError::LabelOutOfRange {
            label,
            n_classes: dataset.n_classes,
        });
    }

    let classes: Vec<usize> = dataset.y.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
    if classes.len() == 1 {
        return Ok(LogRegModel {
            model_version: MODEL_VERSION,
            n_classes: dataset.n_classes,
            classes,
            dim,
            weights: Array2::zeros((0, dim)),
            bias: Array1::zeros(0),
            iterations: 0,
        });
    }
    let k = classes.len();
    let mut column_of = vec![usize::MAX; dataset.n_classes];
    for (col, &class) in classes.iter().enumerate() {
        column_of[class] = col;
    }

    let mut targets = Array2::<f64>::zeros((rows, k));
    let mut counts = vec![0f64; k];
    for (row, &label) in dataset.y.iter().enumerate() {
        let col = column_of[label];
        targets[[row, col]] = 1.0;
        counts[col] += 1.0;
    }
    let sample_weights: Array1<f64> = dataset
        .y
        .iter()
        .map(|&label| {
            if options.balance_classes {
                rows as f64 / (k as f64 * counts[column_of[label]])
            } else {
                1.0
            }
        })
        .collect();
    let total_weight = sample_weights.sum();
    let scale = (&sample_weights / total_weight).insert_axis(Axis(1));
    let l2 = 1.0 / (options.inverse_regularization * total_weight);

    // Softmax cross-entropy has curvature at most ||x||² / 2 per row.
    let intercept_term = if options.fit_intercept { 1.0 } else { 0.0 };
    let max_norm = dataset
        .x
        .rows()
        .into_iter()
        .map(|row| row.dot(&row) + intercept_term)
        .fold(0.0f64, f64::max);
    let step = 1.0 / (0.5 * max_norm + l2);

    let mut weights = Array2::<f64>::zeros((k, dim));
    let mut bias = Array1::<f64>::zeros(k);
    let mut iterations = 0usize;
    let mut converged = false;
    while iterations < options.max_iter {
        let mut residual = dataset.x.dot(&weights.t()) + &bias;
        softmax_rows(&mut residual);
        residual -= &targets;
        residual *= &scale;

        let mut grad_w = residual.t().dot(&dataset.x);
        grad_w.scaled_add(l2, &weights);
        let grad_b = residual.sum_axis(Axis(0));
        let mut largest = grad_w.iter().fold(0.0f64, |acc, g| acc.max(g.abs()));
        if options.fit_intercept {
            largest = grad_b.iter().fold(largest, |acc, g| acc.max(g.abs()));
        }
        if largest < options.tolerance {
            converged = true;
            break;
        }
        weights.scaled_add(-step, &grad_w);
        if options.fit_intercept {
            bias.scaled_add(-step, &grad_b);
        }
        iterations += 1;
    }
    debug!(rows, classes = k, iterations, converged, "Fitted logistic regression");

    let model = LogRegModel {
        model_version: MODEL_VERSION,
        n_classes: dataset.n_classes,
        classes,
        dim,
        weights,
        bias,
        iterations,
    };
    model.validate().map_err(TrainError::InvalidModel)?;
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn classifier() -> Classifier {
        Classifier::new(TrainOptions {
            threads: 2,
            ..TrainOptions::default()
        })
        .unwrap()
    }

    #[test]
    fn separates_two_clusters() {
        let dataset = TrainDataset {
            n_classes: 2,
            x: array![[2.0, 2.1], [2.2, 1.9], [0.2, 0.1], [0.1, 0.3]],
            y: vec![0, 0, 1, 1],
        };
        let clf = classifier();
        let model = clf.fit(&dataset).unwrap();
        let probs = clf.predict_proba(&model, &dataset.x).unwrap();
        for (row, &label) in dataset.y.iter().enumerate() {
            let predicted = crate::ml::argmax(&probs.row(row).to_vec());
            assert_eq!(predicted, label, "row {row}");
        }
    }

    #[test]
    fn strong_regularization_keeps_probabilities_soft() {
        let dataset = TrainDataset {
            n_classes: 2,
            x: array![[3.0], [-3.0]],
            y: vec![0, 1],
        };
        let model = classifier().fit(&dataset).unwrap();
        let p = model.predict_proba(&[3.0]);
        assert!(p[0] > 0.5 && p[0] < 0.99, "p = {p:?}");
    }

    #[test]
    fn balanced_weights_protect_minority_class() {
        // Nine majority rows against one minority row.
        let mut rows = vec![[1.0, 0.0]; 9];
        rows.push([0.0, 1.0]);
        let x = Array2::from_shape_fn((10, 2), |(r, c)| rows[r][c]);
        let mut y = vec![0; 9];
        y.push(1);
        let dataset = TrainDataset { n_classes: 2, x, y };

        let balanced = classifier().fit(&dataset).unwrap();
        let unbalanced = Classifier::new(TrainOptions {
            balance_classes: false,
            threads: 1,
            ..TrainOptions::default()
        })
        .unwrap()
        .fit(&dataset)
        .unwrap();
        let minority = [0.0, 1.0];
        assert!(balanced.predict_proba(&minority)[1] > unbalanced.predict_proba(&minority)[1]);
    }

    #[test]
    fn unfitted_classes_get_zero_probability() {
        let dataset = TrainDataset {
            n_classes: 4,
            x: array![[1.0], [-1.0]],
            y: vec![1, 3],
        };
        let model = classifier().fit(&dataset).unwrap();
        assert_eq!(model.classes, vec![1, 3]);
        let p = model.predict_proba(&[1.0]);
        assert_eq!(p.len(), 4);
        assert_eq!(p[0], 0.0);
        assert_eq!(p[2], 0.0);
    }

    #[test]
    fn single_class_training_predicts_that_class() {
        let dataset = TrainDataset {
            n_classes: 3,
            x: array![[1.0], [2.0]],
            y: vec![2, 2],
        };
        let model = classifier().fit(&dataset).unwrap();
        assert_eq!(model.predict_proba(&[0.0]), vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn rejects_invalid_inputs() {
        let clf = classifier();
        let empty = TrainDataset {
            n_classes: 2,
            x: Array2::zeros((0, 2)),
            y: vec![],
        };
        assert!(matches!(clf.fit(&empty), Err(TrainError::EmptyTrainingSet)));

        let out_of_range = TrainDataset {
            n_classes: 2,
            x: array![[1.0]],
            y: vec![2],
        };
        assert!(matches!(
            clf.fit(&out_of_range),
            Err(TrainError::LabelOutOfRange { label: 2, n_classes: 2 })
        ));

        let mismatch = TrainDataset {
            n_classes: 2,
            x: array![[1.0], [2.0]],
            y: vec![0],
        };
        assert!(matches!(clf.fit(&mismatch), Err(TrainError::Mismatch { .. })));
    }

    #[test]
    fn rejects_non_positive_regularization() {
        let err = Classifier::new(TrainOptions {
            inverse_regularization: 0.0,
            ..TrainOptions::default()
        })
        .unwrap_err();
        assert!(matches!(err, TrainError::InvalidOptions(_)));
    }
}
