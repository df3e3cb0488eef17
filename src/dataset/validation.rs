//! Held-out validation rows driven by an external label file.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use super::{FeatureRow, FeatureStore};
use crate::labeling::{LabelRecord, LabelSet};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Failed to read validation labels {path}: {source}")]
    Read { path: PathBuf, source: csv::Error },
}

/// Rows removed from the working set, each carrying its ground-truth label.
#[derive(Debug, Clone, Default)]
pub struct ValidationSet {
    rows: Vec<FeatureRow>,
}

impl ValidationSet {
    /// Validation rows; `label` holds the ground-truth index.
    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.rows.iter().any(|row| row.identifier == identifier)
    }
}

/// Move every working row named in `path` into a validation set.
///
/// Label names are mapped through the current `labels`; names the set does not know
/// are skipped. When the file lists an identifier twice the first label wins. The
/// store is only modified once the whole file has been read.
pub fn split_validation(
    store: &mut FeatureStore,
    labels: &LabelSet,
    path: &Path,
) -> Result<ValidationSet, ValidationError> {
    let read_err = |source| ValidationError::Read {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(read_err)?;
    let mut truth: HashMap<String, usize> = HashMap::new();
    let mut unknown = 0usize;
    for record in reader.deserialize::<LabelRecord>() {
        let record = record.map_err(read_err)?;
        match labels.index_of(&record.label) {
            Some(index) => {
                truth.entry(record.filename).or_insert(index);
            }
            None => unknown += 1,
        }
    }
    if unknown > 0 {
        warn!(unknown, path = %path.display(), "Skipped validation rows with unknown labels");
    }

    let present: HashSet<&str> = truth
        .keys()
        .map(String::as_str)
        .filter(|identifier| store.contains(identifier))
        .collect();
    let mut rows = store.remove(&present);
    for row in &mut rows {
        row.label = truth.get(&row.identifier).copied();
    }
    info!(
        validation = rows.len(),
        working = store.len(),
        "Split validation rows from working set"
    );
    Ok(ValidationSet { rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> FeatureStore {
        let rows = ["/d/a.csv", "/d/b.csv", "/d/c.csv"]
            .iter()
            .enumerate()
            .map(|(idx, id)| FeatureRow {
                identifier: id.to_string(),
                features: vec![idx as f64],
                label: Some(0),
            })
            .collect();
        FeatureStore::from_rows(vec!["x".into()], rows).unwrap()
    }

    #[test]
    fn moves_listed_rows_with_truth_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("validation.csv");
        std::fs::write(
            &path,
            "filename,label\n/d/b.csv,Cross-Country\n/d/zz.csv,Pattern Work\n/d/c.csv,Aerobatics\n",
        )
        .unwrap();
        let labels = LabelSet::new(["Pattern Work", "Local Maneuvers", "Cross-Country"]);

        let mut working = store();
        let validation = split_validation(&mut working, &labels, &path).unwrap();
        assert_eq!(validation.len(), 1);
        assert_eq!(validation.rows()[0].identifier, "/d/b.csv");
        assert_eq!(validation.rows()[0].label, Some(2));
        assert_eq!(working.len(), 2);
        assert!(!working.contains("/d/b.csv"));
        assert!(working.contains("/d/c.csv"));
    }

    #[test]
    fn missing_file_is_an_error_and_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut working = store();
        let result = split_validation(
            &mut working,
            &LabelSet::new(["a"]),
            &dir.path().join("none.csv"),
        );
        assert!(matches!(result, Err(ValidationError::Read { .. })));
        assert_eq!(working.len(), 3);
    }
}
