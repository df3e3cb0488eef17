//! Active-learning loop over a feature store.
//!
//! [`ActiveLearner`] owns the working set, the human-confirmed labels and the single
//! trained model. Every scoring pass refits the classifier from scratch on the current
//! ledger, scores the rows nobody has labeled yet and hands them to the
//! [`SelectionPolicy`] to pick the next batch.

pub mod selection;

pub use selection::{RareClassHandling, SelectionPolicy, uncertain_count};

use std::path::Path;

use ndarray::Array2;
use ordered_float::OrderedFloat;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::dataset::{DataLoadError, FeatureRow, FeatureStore, ValidationSet, split_validation};
use crate::labeling::{LabelLedger, LabelSet, LedgerError};
use crate::ml::logreg::save_model;
use crate::ml::metrics::{ConfusionMatrix, ValidationReport};
use crate::ml::{Classifier, LogRegModel, ModelIoError, TrainDataset, TrainError, TrainOptions, argmax};

#[derive(Debug, Error)]
pub enum LearnerError {
    #[error("No labeled flights to train on")]
    EmptyTrainingSet,
    #[error("Label index {index} is not defined ({available} labels available)")]
    UnknownLabel { index: usize, available: usize },
    #[error("{count} rows have no provisional label to seed centroids from")]
    MissingProvisionalLabels { count: usize },
    #[error(transparent)]
    DataLoad(#[from] DataLoadError),
    #[error("Training failed: {0}")]
    Training(#[from] TrainError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    ModelIo(#[from] ModelIoError),
}

/// Where the labeling loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnerState {
    /// Nothing labeled yet.
    Uninitialized,
    /// Labels exist but no model has been trained on them.
    Seeded,
    /// At least one model has been trained.
    Active,
}

/// Knobs for an [`ActiveLearner`].
#[derive(Debug, Clone, PartialEq)]
pub struct LearnerOptions {
    pub batch_size: usize,
    pub classifier: TrainOptions,
    pub selection: SelectionPolicy,
}

impl Default for LearnerOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            classifier: TrainOptions::default(),
            selection: SelectionPolicy::default(),
        }
    }
}

/// Class probabilities for one unlabeled flight.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRow {
    pub identifier: String,
    /// One entry per label index.
    pub probabilities: Vec<f64>,
}

#[derive(Debug)]
pub struct ActiveLearner {
    labels: LabelSet,
    store: FeatureStore,
    ledger: LabelLedger,
    validation: Option<ValidationSet>,
    classifier: Classifier,
    policy: SelectionPolicy,
    batch_size: usize,
    model: Option<LogRegModel>,
    state: LearnerState,
    last_validation: Option<ValidationReport>,
}

impl ActiveLearner {
    pub fn new(
        labels: LabelSet,
        store: FeatureStore,
        options: LearnerOptions,
    ) -> Result<Self, LearnerError> {
        let classifier = Classifier::new(options.classifier)?;
        Ok(Self {
            labels,
            store,
            ledger: LabelLedger::new(),
            validation: None,
            classifier,
            policy: options.selection,
            batch_size: options.batch_size,
            model: None,
            state: LearnerState::Uninitialized,
            last_validation: None,
        })
    }

    /// Load the configured feature table and build a learner over it.
    pub fn from_config(config: &SessionConfig) -> Result<Self, LearnerError> {
        let store = FeatureStore::load(&config.feature_path(), &config.data_path())?;
        Self::new(
            LabelSet::new(config.labels.iter().cloned()),
            store,
            config.learner_options(),
        )
    }

    pub fn state(&self) -> LearnerState {
        self.state
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn ledger(&self) -> &LabelLedger {
        &self.ledger
    }

    pub fn store(&self) -> &FeatureStore {
        &self.store
    }

    pub fn validation(&self) -> Option<&ValidationSet> {
        self.validation.as_ref()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// The most recently trained model, if the ledger has not changed since.
    pub fn model(&self) -> Option<&LogRegModel> {
        self.model.as_ref()
    }

    /// Validation scores from the last [`ActiveLearner::labeled_test_snapshot`].
    pub fn last_validation(&self) -> Option<&ValidationReport> {
        self.last_validation.as_ref()
    }

    /// Carve the rows listed in `path` out of the working set as a validation set.
    ///
    /// A missing or unreadable file leaves validation disabled. Only the first
    /// successful load takes effect.
    pub fn load_validation(&mut self, path: &Path) -> bool {
        if self.validation.is_some() {
            warn!(path = %path.display(), "Validation set already loaded, ignoring");
            return false;
        }
        if !path.exists() {
            debug!(path = %path.display(), "No validation file");
            return false;
        }
        match split_validation(&mut self.store, &self.labels, path) {
            Ok(validation) => {
                self.validation = Some(validation);
                true
            }
            Err(err) => {
                warn!("{err}");
                false
            }
        }
    }

    /// One representative flight per provisional class, for the human to confirm.
    ///
    /// Fits a throwaway model on the provisional label column of the whole working set
    /// and returns, for each class in ascending order, the row with the highest
    /// predicted probability of its own class. Classes without members are skipped.
    pub fn seed_centroids(&self) -> Result<Vec<String>, LearnerError> {
        let missing = self.store.rows().iter().filter(|row| row.label.is_none()).count();
        if missing > 0 {
            return Err(LearnerError::MissingProvisionalLabels { count: missing });
        }
        let rows: Vec<&FeatureRow> = self.store.rows().iter().collect();
        let y: Vec<usize> = rows.iter().filter_map(|row| row.label).collect();
        let Some(&largest) = y.iter().max() else {
            return Err(LearnerError::EmptyTrainingSet);
        };
        let dataset = TrainDataset {
            n_classes: largest + 1,
            x: self.store.matrix(&rows),
            y,
        };
        let model = self.classifier.fit(&dataset)?;
        let probabilities = self.classifier.predict_proba(&model, &dataset.x)?;

        let mut best: Vec<Option<(f64, usize)>> = vec![None; dataset.n_classes];
        for (row, &class) in dataset.y.iter().enumerate() {
            let own = probabilities[[row, class]];
            match best[class] {
                Some((top, _)) if top >= own => {}
                _ => best[class] = Some((own, row)),
            }
        }
        let centroids: Vec<String> = best
            .into_iter()
            .flatten()
            .map(|(_, row)| rows[row].identifier.clone())
            .collect();
        info!(centroids = centroids.len(), "Selected seed centroids");
        Ok(centroids)
    }

    /// Record human labels; later pairs for the same flight win.
    pub fn label_flights<I, S>(&mut self, pairs: I) -> Result<(), LearnerError>
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        let pairs: Vec<(String, usize)> = pairs
            .into_iter()
            .map(|(identifier, label)| (identifier.into(), label))
            .collect();
        if let Some(&(_, index)) = pairs.iter().find(|(_, label)| *label >= self.labels.len()) {
            return Err(LearnerError::UnknownLabel {
                index,
                available: self.labels.len(),
            });
        }
        debug!(count = pairs.len(), "Labeled flights");
        self.ledger.merge(pairs);
        self.model = None;
        if self.state == LearnerState::Uninitialized && !self.ledger.is_empty() {
            self.state = LearnerState::Seeded;
        }
        Ok(())
    }

    /// Fit a fresh model on every labeled flight still in the working set.
    pub fn train(&mut self) -> Result<(), LearnerError> {
        let dataset = self.training_dataset()?;
        let model = self.classifier.fit(&dataset)?;
        info!(
            labeled = dataset.y.len(),
            classes = model.classes.len(),
            "Trained classifier"
        );
        self.model = Some(model);
        self.state = LearnerState::Active;
        Ok(())
    }

    /// Retrain, then score every working row that has no label yet.
    pub fn score_unlabeled(&mut self) -> Result<Vec<ScoredRow>, LearnerError> {
        self.train()?;
        let (rows, probabilities) = self.predict_unlabeled()?;
        Ok(rows
            .into_iter()
            .zip(probabilities.rows())
            .map(|(row, probs)| ScoredRow {
                identifier: row.identifier.clone(),
                probabilities: probs.to_vec(),
            })
            .collect())
    }

    /// Next flights to label, using the configured batch size.
    pub fn select_batch(&mut self) -> Result<Vec<String>, LearnerError> {
        self.select_batch_of(self.batch_size)
    }

    pub fn select_batch_of(&mut self, batch_size: usize) -> Result<Vec<String>, LearnerError> {
        let (identifiers, probabilities): (Vec<String>, Vec<Vec<f64>>) = self
            .score_unlabeled()?
            .into_iter()
            .map(|scored| (scored.identifier, scored.probabilities))
            .unzip();
        let batch = self.policy.select(&probabilities, &identifiers, batch_size);
        info!(
            candidates = identifiers.len(),
            selected = batch.len(),
            "Selected flights to label"
        );
        Ok(batch)
    }

    /// Ledger contents as parallel identifier and label-name vectors.
    pub fn labeled_training_snapshot(&self) -> Result<(Vec<String>, Vec<String>), LearnerError> {
        let (identifiers, indices) = self
            .ledger
            .as_training_pairs()
            .ok_or(LearnerError::EmptyTrainingSet)?;
        let names = indices
            .into_iter()
            .map(|index| self.label_name(index))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((identifiers, names))
    }

    /// Retrain and predict a label for every unlabeled flight.
    ///
    /// With `sort_by_confidence` the rows are ordered by their top probability,
    /// most confident first when `descending`. When a validation set is loaded the
    /// model is also scored against it.
    pub fn labeled_test_snapshot(
        &mut self,
        sort_by_confidence: bool,
        descending: bool,
    ) -> Result<(Vec<String>, Vec<String>), LearnerError> {
        self.train()?;
        let (rows, probabilities) = self.predict_unlabeled()?;
        let mut predictions: Vec<(&str, usize, f64)> = rows
            .iter()
            .zip(probabilities.rows())
            .map(|(row, probs)| {
                let probs = probs.to_vec();
                let class = argmax(&probs);
                (row.identifier.as_str(), class, probs[class])
            })
            .collect();
        if sort_by_confidence {
            predictions.sort_by_key(|&(_, _, confidence)| OrderedFloat(confidence));
            if descending {
                predictions.reverse();
            }
        }
        let mut identifiers = Vec::with_capacity(predictions.len());
        let mut names = Vec::with_capacity(predictions.len());
        for (identifier, class, _) in predictions {
            identifiers.push(identifier.to_string());
            names.push(self.label_name(class)?);
        }

        let report = self.evaluate_validation()?;
        self.last_validation = report;
        Ok((identifiers, names))
    }

    /// Label counts over human labels plus predictions for the unlabeled rest.
    pub fn label_distribution(&mut self) -> Result<Vec<usize>, LearnerError> {
        self.train()?;
        let (_, probabilities) = self.predict_unlabeled()?;
        let mut counts = vec![0usize; self.labels.len()];
        let predicted = probabilities.rows().into_iter().map(|probs| argmax(&probs.to_vec()));
        for label in self.ledger.iter().map(|(_, label)| label).chain(predicted) {
            if let Some(count) = counts.get_mut(label) {
                *count += 1;
            }
        }
        Ok(counts)
    }

    /// Replace the label names; existing labels and the model no longer apply.
    pub fn set_labels<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let previous = std::mem::replace(&mut self.labels, LabelSet::new(names));
        self.warn_if_validation_stale(&previous);
        self.restart();
        info!(labels = ?self.labels.names(), "Replaced label names");
    }

    /// Forget every label and the trained model.
    pub fn restart(&mut self) {
        self.ledger.reset();
        self.model = None;
        self.last_validation = None;
        self.state = LearnerState::Uninitialized;
    }

    pub fn save_labels(&self, path: &Path) -> Result<(), LearnerError> {
        self.ledger.persist(path, &self.labels)?;
        Ok(())
    }

    /// Replace the ledger and label names with a saved label file.
    ///
    /// Returns `false` and keeps the current state if the file cannot be used.
    pub fn load_labels(&mut self, path: &Path) -> bool {
        let previous = self.labels.clone();
        if !self.ledger.load(path, &mut self.labels) {
            return false;
        }
        self.warn_if_validation_stale(&previous);
        self.model = None;
        self.last_validation = None;
        self.state = if self.ledger.is_empty() {
            LearnerState::Uninitialized
        } else {
            LearnerState::Seeded
        };
        true
    }

    /// Retrain and write the model as JSON.
    pub fn export_model(&mut self, path: &Path) -> Result<(), LearnerError> {
        self.train()?;
        if let Some(model) = &self.model {
            save_model(path, model)?;
            info!(path = %path.display(), "Saved model");
        }
        Ok(())
    }

    /// Validation truth indices follow the names they were loaded with.
    fn warn_if_validation_stale(&self, previous: &LabelSet) -> bool {
        let stale = previous.names() != self.labels.names()
            && self.validation.as_ref().is_some_and(|set| !set.is_empty());
        if stale {
            warn!(
                previous = ?previous.names(),
                current = ?self.labels.names(),
                "Validation labels were mapped with the previous label names"
            );
        }
        stale
    }

    fn label_name(&self, index: usize) -> Result<String, LearnerError> {
        self.labels
            .name(index)
            .map(str::to_string)
            .ok_or(LearnerError::UnknownLabel {
                index,
                available: self.labels.len(),
            })
    }

    fn training_dataset(&self) -> Result<TrainDataset, LearnerError> {
        let mut rows = Vec::with_capacity(self.ledger.len());
        let mut y = Vec::with_capacity(self.ledger.len());
        for (identifier, label) in self.ledger.iter() {
            if let Some(row) = self.store.get(identifier) {
                rows.push(row);
                y.push(label);
            }
        }
        let skipped = self.ledger.len() - rows.len();
        if skipped > 0 {
            warn!(skipped, "Labeled flights missing from the working set were ignored");
        }
        if rows.is_empty() {
            return Err(LearnerError::EmptyTrainingSet);
        }
        Ok(TrainDataset {
            n_classes: self.labels.len(),
            x: self.store.matrix(&rows),
            y,
        })
    }

    fn predict_unlabeled(&self) -> Result<(Vec<&FeatureRow>, Array2<f64>), LearnerError> {
        let model = self.model.as_ref().ok_or(LearnerError::EmptyTrainingSet)?;
        let rows: Vec<&FeatureRow> = self
            .store
            .rows()
            .iter()
            .filter(|row| !self.ledger.contains(&row.identifier))
            .collect();
        let probabilities = self.classifier.predict_proba(model, &self.store.matrix(&rows))?;
        Ok((rows, probabilities))
    }

    fn evaluate_validation(&self) -> Result<Option<ValidationReport>, LearnerError> {
        let (Some(model), Some(validation)) = (&self.model, &self.validation) else {
            return Ok(None);
        };
        if validation.is_empty() {
            return Ok(None);
        }
        let rows: Vec<&FeatureRow> = validation.rows().iter().collect();
        let probabilities = self.classifier.predict_proba(model, &self.store.matrix(&rows))?;
        let pairs = rows
            .iter()
            .zip(probabilities.rows())
            .filter_map(|(row, probs)| row.label.map(|truth| (truth, argmax(&probs.to_vec()))));
        let report = ValidationReport::from_matrix(ConfusionMatrix::from_pairs(self.labels.len(), pairs));
        info!(
            rows = rows.len(),
            accuracy = report.accuracy,
            macro_f1 = report.macro_f1,
            "Validation scores"
        );
        info!("Validation confusion matrix:\n{}", report.matrix.render());
        Ok(Some(report))
    }
}
